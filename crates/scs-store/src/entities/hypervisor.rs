use serde::Serialize;

use scs_core::error::Result;
use scs_core::fields;

use crate::record::Record;

/// A registered KVM/libvirt host.
#[derive(Debug, Clone, Serialize)]
pub struct Hypervisor {
    pub name: String,
    pub mgmt_ip: String,
    pub location: String,
    /// Directory VM disk images live under.
    pub vm_path: String,
    pub min_free_disk_mb: u64,
    pub min_free_mem_mb: u64,
    pub enabled: bool,
}

impl Record for Hypervisor {
    const FILE: &'static str = "hypervisor";
    const KIND: &'static str = "hypervisor";
    const FIELD_COUNT: usize = 7;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            name: f[0].to_string(),
            mgmt_ip: f[1].to_string(),
            location: f[2].to_string(),
            vm_path: f[3].to_string(),
            min_free_disk_mb: parse_u64("min_free_disk_mb", f[4])?,
            min_free_mem_mb: parse_u64("min_free_mem_mb", f[5])?,
            enabled: fields::parse_yn("enabled", f[6])?,
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.mgmt_ip.clone(),
            self.location.clone(),
            self.vm_path.clone(),
            self.min_free_disk_mb.to_string(),
            self.min_free_mem_mb.to_string(),
            fields::yn(self.enabled).to_string(),
        ]
    }

    fn validate(&self) -> Result<()> {
        fields::validate_name("hypervisor", &self.name)?;
        fields::parse_ipv4(&self.mgmt_ip)?;
        Ok(())
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64> {
    value.parse().map_err(|_| {
        scs_core::ScsError::validation(format!("field '{}' must be an integer, got '{}'", name, value))
    })
}

/// Environment ↔ hypervisor link (many-to-many).
#[derive(Debug, Clone, Serialize)]
pub struct HvEnvironment {
    pub environment: String,
    pub hypervisor: String,
}

impl Record for HvEnvironment {
    const FILE: &'static str = "hv-environment";
    const KIND: &'static str = "hypervisor-environment link";
    const FIELD_COUNT: usize = 2;

    fn key(&self) -> String {
        format!("{}:{}", self.environment, self.hypervisor)
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            environment: f[0].to_string(),
            hypervisor: f[1].to_string(),
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![self.environment.clone(), self.hypervisor.clone()]
    }
}

/// Network ↔ hypervisor link carrying the interface the hypervisor uses to
/// reach that network.
#[derive(Debug, Clone, Serialize)]
pub struct HvNetwork {
    /// `loc-zone-alias` network key.
    pub network: String,
    pub hypervisor: String,
    pub interface: String,
}

impl Record for HvNetwork {
    const FILE: &'static str = "hv-network";
    const KIND: &'static str = "hypervisor-network link";
    const FIELD_COUNT: usize = 3;

    fn key(&self) -> String {
        format!("{}:{}", self.network, self.hypervisor)
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            network: f[0].to_string(),
            hypervisor: f[1].to_string(),
            interface: f[2].to_string(),
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![self.network.clone(), self.hypervisor.clone(), self.interface.clone()]
    }
}

/// Cache of where a VM has been observed. `preferred=y` marks the copy
/// currently expected to run.
#[derive(Debug, Clone, Serialize)]
pub struct HvSystem {
    pub system: String,
    pub hypervisor: String,
    pub preferred: bool,
}

impl Record for HvSystem {
    const FILE: &'static str = "hv-system";
    const KIND: &'static str = "hypervisor-system link";
    const FIELD_COUNT: usize = 3;

    fn key(&self) -> String {
        format!("{}:{}", self.system, self.hypervisor)
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            system: f[0].to_string(),
            hypervisor: f[1].to_string(),
            preferred: fields::parse_yn("preferred", f[2])?,
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.system.clone(),
            self.hypervisor.clone(),
            fields::yn(self.preferred).to_string(),
        ]
    }
}
