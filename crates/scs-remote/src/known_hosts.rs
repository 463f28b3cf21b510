//! Local `known_hosts` hygiene. Freshly kickstarted VMs change host keys;
//! the stale entry must be dropped before the next connection or ssh
//! refuses in BatchMode. Writes go under an advisory lock with a bounded
//! wait because concurrent background tasks share the file.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use fs2::FileExt;
use scs_core::error::{Result, ScsError};
use tracing::debug;

const LOCK_WAIT: Duration = Duration::from_secs(5);

fn known_hosts_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".ssh/known_hosts"))
}

/// Drop any recorded key for `host` (name or address). Missing files and
/// unknown hosts are fine.
pub fn forget(host: &str) -> Result<()> {
    let Some(path) = known_hosts_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let lock = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)?;
    lock_with_deadline(&lock)?;

    debug!(host, "removing stale known_hosts entry");
    let status = Command::new("ssh-keygen")
        .args(["-R", host, "-f"])
        .arg(&path)
        .output()
        .map_err(|e| ScsError::remote(format!("failed to run ssh-keygen: {}", e)))?;
    fs2::FileExt::unlock(&lock)?;

    if !status.status.success() {
        return Err(ScsError::remote(format!(
            "ssh-keygen -R {} failed: {}",
            host,
            String::from_utf8_lossy(&status.stderr).trim()
        )));
    }
    Ok(())
}

fn lock_with_deadline(file: &std::fs::File) -> Result<()> {
    let deadline = Instant::now() + LOCK_WAIT;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                return Err(ScsError::remote(format!(
                    "timed out waiting for known_hosts lock: {}",
                    e
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forget_without_home_is_noop() {
        // only verifies the no-file path does not error
        if known_hosts_path().is_none_or(|p| !p.exists()) {
            forget("nonexistent-host.invalid").unwrap();
        }
    }

    #[test]
    fn test_lock_with_deadline_on_plain_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        lock_with_deadline(f.as_file()).unwrap();
        fs2::FileExt::unlock(f.as_file()).unwrap();
    }
}
