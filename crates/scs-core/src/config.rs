use std::path::{Path, PathBuf};

use crate::error::{Result, ScsError};

/// Runtime configuration, resolved once at startup from `SCS_*` environment
/// variables and passed by reference through the call graph.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the configuration repository (`SCS_CONF`).
    pub repo: PathBuf,
    /// SSH identity key used for every remote connection (`SCS_IDENTITY`).
    pub identity: Option<PathBuf>,
    /// Directory compiled releases are written to (`SCS_RELEASES`).
    pub releases: PathBuf,
    /// How many remote backup tars the installer keeps; 0 keeps all
    /// (`SCS_REMOTE_BACKUPS`).
    pub remote_backups: u32,
    /// Remote login user (`SCS_REMOTE_USER`, default `root`).
    pub remote_user: String,
    /// Whether the repository is shared and mutation requires the lock
    /// (`SCS_SHARED_REPO`; `0` disables locking).
    pub shared_repo: bool,
    /// Scratch space for small temporary trees (`SCS_TEMP`).
    pub temp: PathBuf,
    /// Scratch space for large payloads such as staged disk images
    /// (`SCS_TEMP_LARGE`).
    pub temp_large: PathBuf,
    /// Username recorded in the repository lock and IP index rows.
    pub user: String,
}

impl Config {
    /// Build a Config from the process environment.
    ///
    /// `SCS_CONF` is required; everything else has a usable default.
    pub fn from_env() -> Result<Self> {
        let repo = std::env::var("SCS_CONF")
            .map(PathBuf::from)
            .map_err(|_| ScsError::validation("SCS_CONF is not set; point it at the repository"))?;

        let temp = std::env::var("SCS_TEMP")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("scs"));
        let temp_large = std::env::var("SCS_TEMP_LARGE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| temp.clone());
        let releases = std::env::var("SCS_RELEASES")
            .map(PathBuf::from)
            .unwrap_or_else(|_| repo.join("release"));

        let remote_backups = match std::env::var("SCS_REMOTE_BACKUPS") {
            Ok(v) => v.parse::<u32>().map_err(|_| {
                ScsError::validation(format!("SCS_REMOTE_BACKUPS must be an integer, got '{}'", v))
            })?,
            Err(_) => 5,
        };

        Ok(Self {
            repo,
            identity: std::env::var("SCS_IDENTITY").map(PathBuf::from).ok(),
            releases,
            remote_backups,
            remote_user: std::env::var("SCS_REMOTE_USER").unwrap_or_else(|_| "root".to_string()),
            shared_repo: std::env::var("SCS_SHARED_REPO").map(|v| v != "0").unwrap_or(true),
            temp,
            temp_large,
            user: current_user(),
        })
    }

    /// Config rooted at an explicit repository path, defaults elsewhere.
    /// Tests construct their Config this way against a tempdir.
    pub fn for_repo(repo: impl Into<PathBuf>) -> Self {
        let repo = repo.into();
        Self {
            releases: repo.join("release"),
            temp: std::env::temp_dir().join("scs"),
            temp_large: std::env::temp_dir().join("scs"),
            identity: None,
            remote_backups: 5,
            remote_user: "root".to_string(),
            shared_repo: true,
            user: current_user(),
            repo,
        }
    }

    /// Path of an entity or auxiliary file inside the repository.
    pub fn repo_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.repo.join(rel)
    }

    /// Repository lock sentinel.
    pub fn lock_path(&self) -> PathBuf {
        self.repo.join(".scs_lock")
    }

    /// Abort sentinel checked by every provisioning poll loop.
    pub fn abort_path(&self) -> PathBuf {
        self.repo.join(".scs_abort")
    }

    /// Background log appended to by detached phase-2 tasks.
    pub fn background_log_path(&self) -> PathBuf {
        self.temp.join("scs-background.log")
    }
}

/// Login name of the invoking user.
fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_repo_defaults() {
        let cfg = Config::for_repo("/tmp/scs-repo");
        assert_eq!(cfg.repo, PathBuf::from("/tmp/scs-repo"));
        assert_eq!(cfg.remote_user, "root");
        assert!(cfg.shared_repo);
        assert_eq!(cfg.remote_backups, 5);
        assert_eq!(cfg.releases, PathBuf::from("/tmp/scs-repo/release"));
    }

    #[test]
    fn test_repo_paths() {
        let cfg = Config::for_repo("/tmp/scs-repo");
        assert_eq!(cfg.lock_path(), PathBuf::from("/tmp/scs-repo/.scs_lock"));
        assert_eq!(cfg.abort_path(), PathBuf::from("/tmp/scs-repo/.scs_abort"));
        assert_eq!(
            cfg.repo_path("net/10.0.0.0"),
            PathBuf::from("/tmp/scs-repo/net/10.0.0.0")
        );
    }

    #[test]
    fn test_current_user_nonempty() {
        assert!(!current_user().is_empty());
    }
}
