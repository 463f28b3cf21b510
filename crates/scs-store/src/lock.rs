//! The single-writer repository lock: a sentinel file at the repository
//! root holding the owner's username. Locking is disabled entirely when
//! `SCS_SHARED_REPO=0` (single-user repositories).

use scs_core::error::{Result, ScsError};
use scs_core::Config;

use crate::vcs::Git;

/// Who currently holds the lock, if anyone.
pub fn owner(cfg: &Config) -> Result<Option<String>> {
    match std::fs::read_to_string(cfg.lock_path()) {
        Ok(s) => Ok(Some(s.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether the invoking user may mutate right now.
pub fn held_by_us(cfg: &Config) -> Result<bool> {
    if !cfg.shared_repo {
        return Ok(true);
    }
    Ok(owner(cfg)?.as_deref() == Some(cfg.user.as_str()))
}

/// Acquire the lock (or verify we already hold it). Every mutating verb
/// calls this before touching the store.
pub fn start_modify(cfg: &Config) -> Result<()> {
    if !cfg.shared_repo {
        return Ok(());
    }
    match owner(cfg)? {
        Some(user) if user == cfg.user => Ok(()),
        Some(user) => Err(ScsError::conflict(format!(
            "repository is locked by '{}'",
            user
        ))),
        None => {
            std::fs::create_dir_all(&cfg.repo)?;
            std::fs::write(cfg.lock_path(), format!("{}\n", cfg.user))?;
            Ok(())
        }
    }
}

/// Discard all pending changes (recursively into submodules) and release
/// the lock.
pub fn cancel_modify(cfg: &Config) -> Result<()> {
    ensure_ours(cfg)?;
    let git = Git::new(&cfg.repo);
    if git.available() {
        git.discard_all()?;
    }
    remove_sentinel(cfg)
}

/// Commit pending changes (showing the diff first), optionally push to the
/// tracking branch, and release the lock.
pub fn stop_modify(cfg: &Config, message: Option<&str>, push: bool) -> Result<()> {
    ensure_ours(cfg)?;
    let git = Git::new(&cfg.repo);
    if git.available() {
        if git.has_changes()? {
            let diff = git.diff(None)?;
            if !diff.is_empty() {
                println!("{}", diff);
            }
            git.commit_all(message.unwrap_or("scs update"))?;
        }
        if push {
            git.push_tracking()?;
        }
    }
    remove_sentinel(cfg)
}

/// Force-release the lock regardless of pending state. `unlock` verb only.
pub fn force_unlock(cfg: &Config) -> Result<()> {
    remove_sentinel(cfg)
}

fn ensure_ours(cfg: &Config) -> Result<()> {
    if !cfg.shared_repo {
        return Ok(());
    }
    match owner(cfg)? {
        None => Err(ScsError::validation("repository is not locked")),
        Some(user) if user == cfg.user => Ok(()),
        Some(user) => Err(ScsError::conflict(format!(
            "repository is locked by '{}'",
            user
        ))),
    }
}

fn remove_sentinel(cfg: &Config) -> Result<()> {
    match std::fs::remove_file(cfg.lock_path()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
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
    fn test_lock_acquire_and_reacquire() {
        let (_dir, cfg) = repo();
        assert_eq!(owner(&cfg).unwrap(), None);
        start_modify(&cfg).unwrap();
        assert_eq!(owner(&cfg).unwrap().as_deref(), Some(cfg.user.as_str()));
        // idempotent for the same user
        start_modify(&cfg).unwrap();
        assert!(held_by_us(&cfg).unwrap());
    }

    #[test]
    fn test_foreign_lock_conflicts() {
        let (_dir, cfg) = repo();
        std::fs::write(cfg.lock_path(), "someone-else\n").unwrap();
        assert!(matches!(start_modify(&cfg), Err(ScsError::Conflict(_))));
        assert!(!held_by_us(&cfg).unwrap());
        assert!(matches!(cancel_modify(&cfg), Err(ScsError::Conflict(_))));
    }

    #[test]
    fn test_shared_repo_disabled_skips_locking() {
        let (_dir, mut cfg) = repo();
        cfg.shared_repo = false;
        start_modify(&cfg).unwrap();
        assert_eq!(owner(&cfg).unwrap(), None);
        assert!(held_by_us(&cfg).unwrap());
    }

    #[test]
    fn test_cancel_releases() {
        let (_dir, cfg) = repo();
        start_modify(&cfg).unwrap();
        cancel_modify(&cfg).unwrap();
        assert_eq!(owner(&cfg).unwrap(), None);
    }

    #[test]
    fn test_cancel_unlocked_is_validation_error() {
        let (_dir, cfg) = repo();
        assert!(matches!(cancel_modify(&cfg), Err(ScsError::Validation(_))));
    }

    #[test]
    fn test_force_unlock() {
        let (_dir, cfg) = repo();
        std::fs::write(cfg.lock_path(), "someone-else\n").unwrap();
        force_unlock(&cfg).unwrap();
        assert_eq!(owner(&cfg).unwrap(), None);
    }
}
