//! Repository schema versioning. The `schema` file at the repository root
//! holds the version the on-disk layout conforms to; migrations upgrade it
//! one step at a time and each records its own completion.

use scs_core::error::{Result, ScsError};
use scs_core::Config;

/// Schema version this build of scs reads and writes.
pub const SCHEMA_VERSION: &str = "0.1";

/// One upgrade step, named by the version it upgrades from.
pub struct Migration {
    pub from: &'static str,
    pub to: &'static str,
    pub run: fn(&Config) -> Result<()>,
}

/// Ordered migration chain up to [`SCHEMA_VERSION`].
pub fn migrations() -> Vec<Migration> {
    vec![Migration {
        from: "0.0",
        to: "0.1",
        run: migrate_0_0,
    }]
}

/// 0.0 repositories predate the net/ index directory and the template
/// patch layout.
fn migrate_0_0(cfg: &Config) -> Result<()> {
    std::fs::create_dir_all(cfg.repo_path("net"))?;
    std::fs::create_dir_all(cfg.repo_path("template"))?;
    std::fs::create_dir_all(cfg.repo_path("value"))?;
    Ok(())
}

/// Stored schema version; absent file reads as `0.0`.
pub fn stored_version(cfg: &Config) -> Result<String> {
    match std::fs::read_to_string(cfg.repo_path("schema")) {
        Ok(s) => Ok(s.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok("0.0".to_string()),
        Err(e) => Err(e.into()),
    }
}

fn write_version(cfg: &Config, version: &str) -> Result<()> {
    std::fs::create_dir_all(&cfg.repo)?;
    std::fs::write(cfg.repo_path("schema"), format!("{}\n", version))?;
    Ok(())
}

/// Compare the stored schema with the compiled-in version.
///
/// Older + `auto_upgrade` runs each pending migration in sequence; older
/// without it is an error telling the operator to upgrade. Newer is always
/// refused.
pub fn check(cfg: &Config, auto_upgrade: bool) -> Result<()> {
    let stored = stored_version(cfg)?;
    if stored == SCHEMA_VERSION {
        return Ok(());
    }
    if version_cmp(&stored, SCHEMA_VERSION) == std::cmp::Ordering::Greater {
        return Err(ScsError::integrity(format!(
            "repository schema {} is newer than this binary's {}; upgrade scs",
            stored, SCHEMA_VERSION
        )));
    }
    if !auto_upgrade {
        return Err(ScsError::validation(format!(
            "repository schema {} is older than {}; run 'scs upgrade'",
            stored, SCHEMA_VERSION
        )));
    }
    upgrade(cfg)
}

/// Run every pending migration, updating the stored version after each.
pub fn upgrade(cfg: &Config) -> Result<()> {
    let mut current = stored_version(cfg)?;
    for m in migrations() {
        if m.from == current {
            tracing::info!(from = m.from, to = m.to, "running schema migration");
            (m.run)(cfg)?;
            write_version(cfg, m.to)?;
            current = m.to.to_string();
        }
    }
    if current != SCHEMA_VERSION {
        return Err(ScsError::integrity(format!(
            "no migration path from schema {} to {}",
            current, SCHEMA_VERSION
        )));
    }
    Ok(())
}

fn version_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> Vec<u32> {
        v.split('.').map(|p| p.parse().unwrap_or(0)).collect()
    };
    parse(a).cmp(&parse(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let cfg = Config::for_repo(dir.path());
        (dir, cfg)
    }

    #[test]
    fn test_missing_schema_reads_as_0_0() {
        let (_dir, cfg) = repo();
        assert_eq!(stored_version(&cfg).unwrap(), "0.0");
    }

    #[test]
    fn test_current_schema_passes() {
        let (_dir, cfg) = repo();
        write_version(&cfg, SCHEMA_VERSION).unwrap();
        check(&cfg, false).unwrap();
    }

    #[test]
    fn test_old_schema_requires_upgrade() {
        let (_dir, cfg) = repo();
        assert!(matches!(check(&cfg, false), Err(ScsError::Validation(_))));
        check(&cfg, true).unwrap();
        assert_eq!(stored_version(&cfg).unwrap(), SCHEMA_VERSION);
        assert!(cfg.repo_path("net").is_dir());
    }

    #[test]
    fn test_newer_schema_refused() {
        let (_dir, cfg) = repo();
        write_version(&cfg, "9.9").unwrap();
        assert!(matches!(check(&cfg, true), Err(ScsError::Integrity(_))));
    }

    #[test]
    fn test_version_cmp() {
        use std::cmp::Ordering::*;
        assert_eq!(version_cmp("0.1", "0.1"), Equal);
        assert_eq!(version_cmp("0.0", "0.1"), Less);
        assert_eq!(version_cmp("0.10", "0.9"), Greater);
    }
}
