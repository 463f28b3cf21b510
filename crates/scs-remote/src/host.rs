use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use scs_core::error::{Result, ScsError};
use tracing::debug;

/// Outcome of one remote command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: String::new(),
            code: 0,
        }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.to_string(),
            code,
        }
    }
}

/// One reachable host. Implementations must not interpret the command;
/// it is handed to the remote shell verbatim.
pub trait RemoteHost: Send + Sync {
    /// Address or name this host is reached at.
    fn name(&self) -> &str;

    /// Run a command, capturing output. A non-zero exit is not an `Err`;
    /// transport failure is.
    fn exec(&self, cmd: &str) -> Result<ExecResult>;

    /// Copy a local file to a remote path.
    fn copy_to(&self, local: &Path, remote: &str) -> Result<()>;

    /// Copy a remote file to a local path.
    fn copy_from(&self, remote: &str, local: &Path) -> Result<()>;

    /// Whether SSH answers within the connectivity timeout.
    fn is_alive(&self) -> bool;

    /// Run a command and require success, returning trimmed stdout.
    fn exec_ok(&self, cmd: &str) -> Result<String> {
        let result = self.exec(cmd)?;
        if !result.success() {
            return Err(ScsError::remote(format!(
                "{}: '{}' exited {}: {}",
                self.name(),
                cmd,
                result.code,
                result.stderr.trim()
            )));
        }
        Ok(result.stdout.trim().to_string())
    }
}

/// Yields connections by host name. The provisioner never constructs an
/// [`SshHost`] itself; it asks its connector, which tests replace with the
/// mock.
pub trait Connector: Send + Sync {
    fn connect(&self, host: &str) -> Result<Arc<dyn RemoteHost>>;

    /// Drop any cached host key for `host`. Reinstalled systems present
    /// new keys; transports with no key cache do nothing.
    fn forget_host(&self, _host: &str) -> Result<()> {
        Ok(())
    }
}

/// Real SSH transport using the external ssh/scp binaries and a configured
/// identity key.
pub struct SshHost {
    host: String,
    user: String,
    identity: Option<PathBuf>,
}

impl SshHost {
    pub fn new(host: &str, user: &str, identity: Option<PathBuf>) -> Self {
        Self {
            host: host.to_string(),
            user: user.to_string(),
            identity,
        }
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=2".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if let Some(identity) = &self.identity {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn run(&self, program: &str, args: &[String]) -> Result<std::process::Output> {
        debug!(host = %self.host, program, "remote call");
        Command::new(program)
            .args(args)
            .output()
            .map_err(|e| ScsError::remote(format!("failed to run {}: {}", program, e)))
    }
}

impl RemoteHost for SshHost {
    fn name(&self) -> &str {
        &self.host
    }

    fn exec(&self, cmd: &str) -> Result<ExecResult> {
        let mut args = self.base_args();
        args.push(self.target());
        args.push(cmd.to_string());
        let output = self.run("ssh", &args)?;
        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code().unwrap_or(-1),
        })
    }

    fn copy_to(&self, local: &Path, remote: &str) -> Result<()> {
        let mut args = self.base_args();
        args.push(local.display().to_string());
        args.push(format!("{}:{}", self.target(), remote));
        let output = self.run("scp", &args)?;
        if !output.status.success() {
            return Err(ScsError::remote(format!(
                "scp to {}:{} failed: {}",
                self.host,
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn copy_from(&self, remote: &str, local: &Path) -> Result<()> {
        let mut args = self.base_args();
        args.push(format!("{}:{}", self.target(), remote));
        args.push(local.display().to_string());
        let output = self.run("scp", &args)?;
        if !output.status.success() {
            return Err(ScsError::remote(format!(
                "scp from {}:{} failed: {}",
                self.host,
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        ssh_port_open(&self.host, Duration::from_secs(2))
    }
}

/// TCP connect to port 22.
pub fn ssh_port_open(host: &str, timeout: Duration) -> bool {
    let Ok(mut addrs) = (host, 22u16).to_socket_addrs() else {
        return false;
    };
    addrs.any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok())
}

/// Connector producing real SSH transports.
pub struct SshConnector {
    user: String,
    identity: Option<PathBuf>,
}

impl SshConnector {
    pub fn new(user: &str, identity: Option<PathBuf>) -> Self {
        Self {
            user: user.to_string(),
            identity,
        }
    }

    pub fn from_config(cfg: &scs_core::Config) -> Self {
        Self::new(&cfg.remote_user, cfg.identity.clone())
    }
}

impl Connector for SshConnector {
    fn connect(&self, host: &str) -> Result<Arc<dyn RemoteHost>> {
        Ok(Arc::new(SshHost::new(host, &self.user, self.identity.clone())))
    }

    fn forget_host(&self, host: &str) -> Result<()> {
        crate::known_hosts::forget(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_result_success() {
        assert!(ExecResult::ok("out").success());
        assert!(!ExecResult::failed(2, "boom").success());
    }

    #[test]
    fn test_base_args_include_identity() {
        let host = SshHost::new("kvm01", "root", Some(PathBuf::from("/id/scs_rsa")));
        let args = host.base_args();
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"/id/scs_rsa".to_string()));
        assert_eq!(host.target(), "root@kvm01");
    }

    #[test]
    fn test_no_identity_omits_flag() {
        let host = SshHost::new("kvm01", "root", None);
        assert!(!host.base_args().contains(&"-i".to_string()));
    }

    #[test]
    fn test_ssh_port_open_unresolvable() {
        assert!(!ssh_port_open("no-such-host.invalid", Duration::from_millis(50)));
    }
}
