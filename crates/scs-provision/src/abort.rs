//! The abort sentinel: a file whose presence tells every background task
//! to stop at its next polling boundary. It doubles as a soft lock on new
//! operations, which warn but proceed.

use scs_core::error::{Result, ScsError};
use scs_core::Config;
use tracing::warn;

/// Raise the abort flag.
pub fn enable(cfg: &Config) -> Result<()> {
    std::fs::create_dir_all(&cfg.repo)?;
    std::fs::write(cfg.abort_path(), format!("{}\n", cfg.user))?;
    Ok(())
}

/// Clear the abort flag.
pub fn disable(cfg: &Config) -> Result<()> {
    match std::fs::remove_file(cfg.abort_path()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn is_set(cfg: &Config) -> bool {
    cfg.abort_path().exists()
}

/// Polling boundaries call this between every remote wait.
pub fn check(cfg: &Config) -> Result<()> {
    if is_set(cfg) {
        return Err(ScsError::aborted("abort sentinel is present"));
    }
    Ok(())
}

/// New operations warn when the flag is up but are not blocked.
pub fn warn_if_set(cfg: &Config) {
    if is_set(cfg) {
        warn!("abort sentinel is present; proceeding anyway");
    }
}
