//! /etc/hosts integration hook. When the repository carries an executable
//! `hosts-hook`, freshly provisioned systems are announced through it; the
//! shared hosts file itself is only ever touched under an advisory lock.

use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use fs2::FileExt;
use scs_core::error::{Result, ScsError};
use scs_core::Config;
use tracing::{debug, info};

const LOCK_WAIT: Duration = Duration::from_secs(10);

/// Whether the hook is configured for this repository.
pub fn enabled(cfg: &Config) -> bool {
    cfg.repo_path("hosts-hook").exists()
}

/// Announce `(name, ip)`, holding the hosts-file lock for the duration so
/// concurrent background tasks serialize.
pub fn update(cfg: &Config, name: &str, ip: &str) -> Result<()> {
    let hook = cfg.repo_path("hosts-hook");
    if !hook.exists() {
        debug!("hosts-hook not present; skipping");
        return Ok(());
    }
    let _lock = HostsLock::acquire(Path::new("/etc/hosts"))?;
    info!(system = name, ip, "running hosts hook");
    let output = Command::new(&hook)
        .args([name, ip])
        .output()
        .map_err(|e| ScsError::remote(format!("hosts-hook failed to start: {}", e)))?;
    if !output.status.success() {
        return Err(ScsError::remote(format!(
            "hosts-hook exited {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

struct HostsLock {
    file: std::fs::File,
}

impl HostsLock {
    fn acquire(path: &Path) -> Result<Option<Self>> {
        let Ok(file) = std::fs::OpenOptions::new().read(true).open(path) else {
            // no hosts file to protect
            return Ok(None);
        };
        let deadline = Instant::now() + LOCK_WAIT;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Some(Self { file })),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(200));
                }
                Err(e) => {
                    return Err(ScsError::remote(format!(
                        "timed out waiting for hosts lock: {}",
                        e
                    )));
                }
            }
        }
    }
}

impl Drop for HostsLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
