use serde::Serialize;

use scs_core::error::{Result, ScsError};
use scs_core::{Config, fields};

use crate::record::{Record, Store};

/// A build: role/OS/arch plus sizing, optionally layered on a parent build.
/// Unspecified disk/ram inherit transitively from the parent chain.
#[derive(Debug, Clone, Serialize)]
pub struct Build {
    pub name: String,
    /// Role handed to the post-install build script.
    pub role: String,
    pub description: String,
    pub os: String,
    pub arch: String,
    pub disk_gb: Option<u32>,
    pub ram_mb: Option<u32>,
    pub parent: Option<String>,
}

impl Record for Build {
    const FILE: &'static str = "build";
    const KIND: &'static str = "build";
    const FIELD_COUNT: usize = 8;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            name: f[0].to_string(),
            role: f[1].to_string(),
            description: f[2].to_string(),
            os: f[3].to_string(),
            arch: f[4].to_string(),
            disk_gb: parse_opt_u32("disk_gb", f[5])?,
            ram_mb: parse_opt_u32("ram_mb", f[6])?,
            parent: if f[7].is_empty() { None } else { Some(f[7].to_string()) },
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.role.clone(),
            self.description.clone(),
            self.os.clone(),
            self.arch.clone(),
            self.disk_gb.map(|v| v.to_string()).unwrap_or_default(),
            self.ram_mb.map(|v| v.to_string()).unwrap_or_default(),
            self.parent.clone().unwrap_or_default(),
        ]
    }

    fn validate(&self) -> Result<()> {
        fields::validate_name("build", &self.name)?;
        if self.parent.as_deref() == Some(self.name.as_str()) {
            return Err(ScsError::validation(format!(
                "build '{}' cannot be its own parent",
                self.name
            )));
        }
        Ok(())
    }
}

fn parse_opt_u32(name: &str, value: &str) -> Result<Option<u32>> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ScsError::validation(format!("field '{}' must be an integer, got '{}'", name, value)))
}

/// Create a build, verifying the parent exists and introduces no cycle.
pub fn create(cfg: &Config, build: Build) -> Result<()> {
    check_parent(cfg, &build)?;
    Store::<Build>::new(cfg).create(build)
}

/// Update a build; rejects an update that would introduce a parent cycle
/// (invariant I2).
pub fn update(cfg: &Config, key: &str, build: Build) -> Result<()> {
    check_parent(cfg, &build)?;
    // Walk up from the proposed parent; meeting the build being updated
    // again means the edit closes a loop.
    let store = Store::<Build>::new(cfg);
    let mut cursor = build.parent.clone();
    while let Some(parent) = cursor {
        if parent == *key || parent == build.name {
            return Err(ScsError::integrity(format!(
                "build '{}' with parent '{}' would create a cycle",
                build.name,
                build.parent.as_deref().unwrap_or_default()
            )));
        }
        cursor = store.load(&parent)?.parent;
    }
    store.update(key, build)
}

fn check_parent(cfg: &Config, build: &Build) -> Result<()> {
    if let Some(parent) = &build.parent
        && !Store::<Build>::new(cfg).exists(parent)?
    {
        return Err(ScsError::missing(format!("build '{}' does not exist", parent)));
    }
    Ok(())
}

/// Parent chain of a build, root first, ending with the build itself.
///
/// A cycle already on disk is an integrity error.
pub fn lineage(cfg: &Config, name: &str) -> Result<Vec<Build>> {
    let store = Store::<Build>::new(cfg);
    let mut chain = Vec::new();
    let mut seen = Vec::new();
    let mut cursor = Some(name.to_string());
    while let Some(n) = cursor {
        if seen.contains(&n) {
            return Err(ScsError::integrity(format!(
                "build parent graph contains a cycle through '{}'",
                n
            )));
        }
        seen.push(n.clone());
        let build = store.load(&n)?;
        cursor = build.parent.clone();
        chain.push(build);
    }
    chain.reverse();
    Ok(chain)
}

/// Names of the lineage, root first.
pub fn lineage_names(cfg: &Config, name: &str) -> Result<Vec<String>> {
    Ok(lineage(cfg, name)?.into_iter().map(|b| b.name).collect())
}

/// Disk size for a build, inherited from the nearest ancestor that sets it.
pub fn effective_disk_gb(cfg: &Config, name: &str) -> Result<Option<u32>> {
    Ok(lineage(cfg, name)?.iter().rev().find_map(|b| b.disk_gb))
}

/// RAM for a build, inherited from the nearest ancestor that sets it.
pub fn effective_ram_mb(cfg: &Config, name: &str) -> Result<Option<u32>> {
    Ok(lineage(cfg, name)?.iter().rev().find_map(|b| b.ram_mb))
}
