use serde::Serialize;

use scs_core::error::{Result, ScsError};

use crate::record::Record;

/// What a resource is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Ip,
    ClusterIp,
    HaIp,
}

impl ResourceKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "ip" => Ok(Self::Ip),
            "cluster_ip" => Ok(Self::ClusterIp),
            "ha_ip" => Ok(Self::HaIp),
            _ => Err(ScsError::validation(format!("unknown resource type '{}'", value))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::ClusterIp => "cluster_ip",
            Self::HaIp => "ha_ip",
        }
    }
}

/// Who a resource is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ResourceAssign {
    Unassigned,
    /// Assigned to a system by name.
    Host(String),
    /// Assigned to `loc:env:app`.
    Application { location: String, environment: String, application: String },
}

impl ResourceAssign {
    fn parse(assign_type: &str, assign_to: &str) -> Result<Self> {
        match assign_type {
            "" => Ok(Self::Unassigned),
            "host" => {
                if assign_to.is_empty() {
                    return Err(ScsError::validation("host resource requires assign_to"));
                }
                Ok(Self::Host(assign_to.to_string()))
            }
            "application" => {
                let mut it = assign_to.split(':');
                match (it.next(), it.next(), it.next(), it.next()) {
                    (Some(loc), Some(env), Some(app), None)
                        if !loc.is_empty() && !env.is_empty() && !app.is_empty() =>
                    {
                        Ok(Self::Application {
                            location: loc.to_string(),
                            environment: env.to_string(),
                            application: app.to_string(),
                        })
                    }
                    _ => Err(ScsError::validation(format!(
                        "application resource assign_to must be loc:env:app, got '{}'",
                        assign_to
                    ))),
                }
            }
            _ => Err(ScsError::validation(format!("unknown assign_type '{}'", assign_type))),
        }
    }

    fn type_field(&self) -> &'static str {
        match self {
            Self::Unassigned => "",
            Self::Host(_) => "host",
            Self::Application { .. } => "application",
        }
    }

    fn to_field(&self) -> String {
        match self {
            Self::Unassigned => "not assigned".to_string(),
            Self::Host(system) => system.clone(),
            Self::Application { location, environment, application } => {
                format!("{}:{}:{}", location, environment, application)
            }
        }
    }
}

/// A physical or logical asset, typically an IP address, assigned to a
/// system or to an application in an environment.
#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub kind: ResourceKind,
    /// The asset itself; an IP address for all current kinds. Unique.
    pub value: String,
    pub assign: ResourceAssign,
    /// Optional short name; variables fall back to the type when empty.
    pub name: String,
    pub description: String,
}

impl Record for Resource {
    const FILE: &'static str = "resource";
    const KIND: &'static str = "resource";
    const FIELD_COUNT: usize = 6;

    fn key(&self) -> String {
        self.value.clone()
    }

    fn parse(f: &[&str]) -> Result<Self> {
        let assign = if f[3] == "not assigned" && f[2].is_empty() {
            ResourceAssign::Unassigned
        } else {
            ResourceAssign::parse(f[2], f[3])?
        };
        Ok(Self {
            kind: ResourceKind::parse(f[0])?,
            value: f[1].to_string(),
            assign,
            name: f[4].to_string(),
            description: f[5].to_string(),
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.kind.as_str().to_string(),
            self.value.clone(),
            self.assign.type_field().to_string(),
            self.assign.to_field(),
            self.name.clone(),
            self.description.clone(),
        ]
    }

    fn validate(&self) -> Result<()> {
        scs_core::fields::parse_ipv4(&self.value)?;
        // invariant I6 is structural: Host/Application always carry a target
        Ok(())
    }
}

/// Variable name this resource contributes to a system's map.
///
/// `cluster_ip` resources are namespaced `resource.<name>`; everything else
/// is `system.<name>`, falling back to the type when unnamed.
pub fn variable_name(res: &Resource) -> String {
    let base = if res.name.is_empty() {
        res.kind.as_str().to_string()
    } else {
        res.name.clone()
    };
    match res.kind {
        ResourceKind::ClusterIp => format!("resource.{}", base),
        _ => format!("system.{}", base),
    }
}
