use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

/// Output format for list/show verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Plain,
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Plain => write!(f, "plain"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Render rows in the requested format.
pub fn render<R: Tabled + Serialize>(rows: &[R], format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new(rows);
            table.with(Style::blank());
            table.to_string()
        }
        OutputFormat::Plain => {
            let mut out = String::new();
            for row in rows {
                let fields = R::fields(row);
                out.push_str(&fields.join(","));
                out.push('\n');
            }
            out
        }
        OutputFormat::Json => serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".into()),
    }
}

/// Display row for `application list`.
#[derive(Debug, Serialize, Tabled)]
pub struct ApplicationRow {
    #[tabled(rename = "APPLICATION")]
    pub name: String,
    #[tabled(rename = "ALIAS")]
    pub alias: String,
    #[tabled(rename = "BUILD")]
    pub build: String,
    #[tabled(rename = "CLUSTER")]
    pub cluster: String,
}

/// Display row for `build list`.
#[derive(Debug, Serialize, Tabled)]
pub struct BuildRow {
    #[tabled(rename = "BUILD")]
    pub name: String,
    #[tabled(rename = "ROLE")]
    pub role: String,
    #[tabled(rename = "OS")]
    pub os: String,
    #[tabled(rename = "ARCH")]
    pub arch: String,
    #[tabled(rename = "DISK GB")]
    pub disk_gb: String,
    #[tabled(rename = "RAM MB")]
    pub ram_mb: String,
    #[tabled(rename = "PARENT")]
    pub parent: String,
}

/// Display row for `constant list`.
#[derive(Debug, Serialize, Tabled)]
pub struct ConstantRow {
    #[tabled(rename = "CONSTANT")]
    pub name: String,
    #[tabled(rename = "DESCRIPTION")]
    pub description: String,
}

/// Display row for `environment list`.
#[derive(Debug, Serialize, Tabled)]
pub struct EnvironmentRow {
    #[tabled(rename = "ENVIRONMENT")]
    pub name: String,
    #[tabled(rename = "ALIAS")]
    pub alias: String,
    #[tabled(rename = "DESCRIPTION")]
    pub description: String,
}

/// Display row for `file list`.
#[derive(Debug, Serialize, Tabled)]
pub struct FileRow {
    #[tabled(rename = "FILE")]
    pub name: String,
    #[tabled(rename = "PATH")]
    pub path: String,
    #[tabled(rename = "TYPE")]
    pub kind: String,
    #[tabled(rename = "OWNER")]
    pub owner: String,
    #[tabled(rename = "MODE")]
    pub octal: String,
}

/// Display row for `hypervisor list`.
#[derive(Debug, Serialize, Tabled)]
pub struct HypervisorRow {
    #[tabled(rename = "HYPERVISOR")]
    pub name: String,
    #[tabled(rename = "MGMT IP")]
    pub mgmt_ip: String,
    #[tabled(rename = "LOCATION")]
    pub location: String,
    #[tabled(rename = "VM PATH")]
    pub vm_path: String,
    #[tabled(rename = "ENABLED")]
    pub enabled: String,
}

/// Display row for `location list`.
#[derive(Debug, Serialize, Tabled)]
pub struct LocationRow {
    #[tabled(rename = "CODE")]
    pub code: String,
    #[tabled(rename = "NAME")]
    pub name: String,
    #[tabled(rename = "DESCRIPTION")]
    pub description: String,
}

/// Display row for `network list`.
#[derive(Debug, Serialize, Tabled)]
pub struct NetworkRow {
    #[tabled(rename = "NETWORK")]
    pub key: String,
    #[tabled(rename = "ADDRESS")]
    pub network: String,
    #[tabled(rename = "CIDR")]
    pub cidr: String,
    #[tabled(rename = "GATEWAY")]
    pub gateway: String,
    #[tabled(rename = "BUILD")]
    pub build_net: String,
    #[tabled(rename = "DEFAULT")]
    pub default_build: String,
}

/// Display row for `resource list`.
#[derive(Debug, Serialize, Tabled)]
pub struct ResourceRow {
    #[tabled(rename = "TYPE")]
    pub kind: String,
    #[tabled(rename = "VALUE")]
    pub value: String,
    #[tabled(rename = "ASSIGNED TO")]
    pub assigned: String,
    #[tabled(rename = "NAME")]
    pub name: String,
}

/// Display row for `system list`.
#[derive(Debug, Serialize, Tabled)]
pub struct SystemRow {
    #[tabled(rename = "SYSTEM")]
    pub name: String,
    #[tabled(rename = "BUILD")]
    pub build: String,
    #[tabled(rename = "IP")]
    pub ip: String,
    #[tabled(rename = "LOC")]
    pub location: String,
    #[tabled(rename = "ENV")]
    pub environment: String,
    #[tabled(rename = "KIND")]
    pub kind: String,
    #[tabled(rename = "LOCKED")]
    pub locked: String,
}

/// Display row for `network ip list-available` and friends.
#[derive(Debug, Serialize, Tabled)]
pub struct IpRow {
    #[tabled(rename = "ADDRESS")]
    pub ip: String,
    #[tabled(rename = "RESERVED")]
    pub reserved: String,
    #[tabled(rename = "DHCP")]
    pub dhcp: String,
    #[tabled(rename = "HOST")]
    pub hostname: String,
    #[tabled(rename = "COMMENT")]
    pub comment: String,
}
