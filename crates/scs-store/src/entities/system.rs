use serde::{Deserialize, Serialize};

use scs_core::error::{Result, ScsError};
use scs_core::{Config, fields};

use crate::record::{Record, Store};

/// Derived kind of a virtual system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmKind {
    /// Standalone disk image.
    Single,
    /// Read-only base image other VMs overlay on.
    Backing,
    /// qcow2 overlay on a backing image.
    Overlay,
}

impl std::fmt::Display for VmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Backing => write!(f, "backing"),
            Self::Overlay => write!(f, "overlay"),
        }
    }
}

/// A configured host, physical or virtual.
#[derive(Debug, Clone, Serialize)]
pub struct System {
    pub name: String,
    pub build: String,
    /// Dotted quad or `dhcp`.
    pub ip: String,
    pub location: String,
    pub environment: String,
    pub virtual_machine: bool,
    /// Marks a backing image (only meaningful for virtual systems).
    pub backing_image: bool,
    /// Backing system name, `auto`, or empty for single/backing systems.
    pub overlay: Option<String>,
    pub locked: bool,
    /// Unix timestamp of the last provision, 0 when never built.
    pub build_date: i64,
}

impl System {
    /// Derived kind; `None` for physical systems.
    ///
    /// Overlay wins over backing: a backing image synthesized on top of a
    /// deeper base provisions as an overlay and is converted afterwards.
    pub fn vm_kind(&self) -> Option<VmKind> {
        if !self.virtual_machine {
            return None;
        }
        if self.overlay.is_some() {
            Some(VmKind::Overlay)
        } else if self.backing_image {
            Some(VmKind::Backing)
        } else {
            Some(VmKind::Single)
        }
    }

    pub fn is_dhcp(&self) -> bool {
        self.ip == "dhcp"
    }

    /// The static IP, when one is set.
    pub fn ipv4(&self) -> Option<std::net::Ipv4Addr> {
        self.ip.parse().ok()
    }
}

impl Record for System {
    const FILE: &'static str = "system";
    const KIND: &'static str = "system";
    const FIELD_COUNT: usize = 10;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn parse(f: &[&str]) -> Result<Self> {
        Ok(Self {
            name: f[0].to_string(),
            build: f[1].to_string(),
            ip: f[2].to_string(),
            location: f[3].to_string(),
            environment: f[4].to_string(),
            virtual_machine: fields::parse_yn("virtual", f[5])?,
            backing_image: fields::parse_yn("backing_image", f[6])?,
            overlay: if f[7].is_empty() { None } else { Some(f[7].to_string()) },
            locked: fields::parse_yn("locked", f[8])?,
            build_date: f[9]
                .parse()
                .map_err(|_| ScsError::validation(format!("bad build_date '{}'", f[9])))?,
        })
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.build.clone(),
            self.ip.clone(),
            self.location.clone(),
            self.environment.clone(),
            fields::yn(self.virtual_machine).to_string(),
            fields::yn(self.backing_image).to_string(),
            self.overlay.clone().unwrap_or_default(),
            fields::yn(self.locked).to_string(),
            self.build_date.to_string(),
        ]
    }

    fn validate(&self) -> Result<()> {
        fields::validate_name("system", &self.name)?;
        if self.ip != "dhcp" {
            fields::parse_ipv4(&self.ip)?;
        }
        if self.backing_image && !self.virtual_machine {
            return Err(ScsError::validation(format!(
                "system '{}' cannot be a backing image without virtual=y",
                self.name
            )));
        }
        Ok(())
    }
}

/// Create a system, enforcing invariant I3: a named overlay must reference
/// an existing backing-image system (or `auto`).
pub fn create(cfg: &Config, system: System) -> Result<()> {
    check_references(cfg, &system)?;
    Store::<System>::new(cfg).create(system)
}

pub fn update(cfg: &Config, key: &str, system: System) -> Result<()> {
    check_references(cfg, &system)?;
    Store::<System>::new(cfg).update(key, system)
}

fn check_references(cfg: &Config, system: &System) -> Result<()> {
    if !Store::<crate::entities::Build>::new(cfg).exists(&system.build)? {
        return Err(ScsError::missing(format!("build '{}' does not exist", system.build)));
    }
    if !Store::<crate::entities::Location>::new(cfg).exists(&system.location)? {
        return Err(ScsError::missing(format!(
            "location '{}' does not exist",
            system.location
        )));
    }
    if !Store::<crate::entities::Environment>::new(cfg).exists(&system.environment)? {
        return Err(ScsError::missing(format!(
            "environment '{}' does not exist",
            system.environment
        )));
    }
    if let Some(overlay) = &system.overlay
        && overlay != "auto"
    {
        let backing = Store::<System>::new(cfg).load(overlay).map_err(|_| {
            ScsError::missing(format!(
                "overlay target '{}' does not exist for system '{}'",
                overlay, system.name
            ))
        })?;
        if !backing.backing_image {
            return Err(ScsError::integrity(format!(
                "system '{}' overlays '{}', which is not a backing image",
                system.name, overlay
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Build, Environment, Location};
    use tempfile::TempDir;

    pub(crate) fn seed_refs(cfg: &Config) {
        Store::<Build>::new(cfg)
            .create(Build {
                name: "web-el7".to_string(),
                role: "web".to_string(),
                description: String::new(),
                os: "el7".to_string(),
                arch: "x86_64".to_string(),
                disk_gb: Some(20),
                ram_mb: Some(2048),
                parent: None,
            })
            .unwrap();
        Store::<Location>::new(cfg)
            .create(Location {
                code: "nyc".to_string(),
                name: "New York".to_string(),
                description: String::new(),
            })
            .unwrap();
        Store::<Environment>::new(cfg)
            .create(Environment {
                name: "production".to_string(),
                alias: "P".to_string(),
                description: String::new(),
            })
            .unwrap();
    }

    pub(crate) fn sys(name: &str, ip: &str) -> System {
        System {
            name: name.to_string(),
            build: "web-el7".to_string(),
            ip: ip.to_string(),
            location: "nyc".to_string(),
            environment: "production".to_string(),
            virtual_machine: true,
            backing_image: false,
            overlay: None,
            locked: false,
            build_date: 0,
        }
    }

    #[test]
    fn test_vm_kind_derivation() {
        let mut s = sys("web01", "10.0.0.5");
        assert_eq!(s.vm_kind(), Some(VmKind::Single));
        s.overlay = Some("base1".to_string());
        assert_eq!(s.vm_kind(), Some(VmKind::Overlay));
        s.overlay = None;
        s.backing_image = true;
        assert_eq!(s.vm_kind(), Some(VmKind::Backing));
        // a synthesized backing chained on a deeper base provisions as an
        // overlay first
        s.overlay = Some("auto".to_string());
        assert_eq!(s.vm_kind(), Some(VmKind::Overlay));
        s.virtual_machine = false;
        s.backing_image = false;
        s.overlay = None;
        assert_eq!(s.vm_kind(), None);
    }

    #[test]
    fn test_overlay_must_reference_backing_image() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::for_repo(dir.path());
        seed_refs(&cfg);

        let mut base = sys("base1", "dhcp");
        base.backing_image = true;
        create(&cfg, base).unwrap();

        let mut app = sys("app1", "10.0.0.5");
        app.overlay = Some("base1".to_string());
        create(&cfg, app).unwrap();

        let mut bad = sys("app2", "10.0.0.6");
        bad.overlay = Some("app1".to_string());
        assert!(matches!(create(&cfg, bad), Err(ScsError::Integrity(_))));

        let mut ghost = sys("app3", "10.0.0.7");
        ghost.overlay = Some("missing".to_string());
        assert!(matches!(create(&cfg, ghost), Err(ScsError::MissingReference(_))));
    }

    #[test]
    fn test_overlay_auto_allowed() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::for_repo(dir.path());
        seed_refs(&cfg);
        let mut s = sys("app1", "dhcp");
        s.overlay = Some("auto".to_string());
        create(&cfg, s).unwrap();
    }

    #[test]
    fn test_ip_validation() {
        let mut s = sys("web01", "dhcp");
        assert!(s.validate().is_ok());
        s.ip = "10.0.0.300".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::for_repo(dir.path());
        seed_refs(&cfg);
        let mut s = sys("web01", "10.0.0.5");
        s.build_date = 1700000000;
        create(&cfg, s).unwrap();
        let loaded = Store::<System>::new(&cfg).load("web01").unwrap();
        assert_eq!(loaded.build_date, 1700000000);
        assert_eq!(loaded.overlay, None);
    }
}
