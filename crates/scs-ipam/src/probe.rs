//! Liveness probing for candidate addresses. An address that answers on
//! SSH, a web port, or ICMP is treated as in use even when the repository
//! has no record of it.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::process::Command;
use std::time::Duration;

use tracing::debug;

/// Extra TCP ports probed after SSH.
pub const EXTRA_PORTS: &[u16] = &[80, 443, 8080, 8443];

/// Abstraction over "does anything answer at this address", so allocation
/// logic can be tested without a network.
pub trait Liveness {
    /// Whether the address appears to be in use. `expected_hostname` is
    /// consulted for the `/etc/hosts` conflict check: a hosts entry naming
    /// someone else counts as in use.
    fn in_use(&self, ip: Ipv4Addr, expected_hostname: Option<&str>) -> bool;
}

/// Real network probe: TCP 22 (~2s), the extra ports (~1s each), four ICMP
/// echoes, then the local hosts file.
#[derive(Debug, Default)]
pub struct NetProbe;

impl Liveness for NetProbe {
    fn in_use(&self, ip: Ipv4Addr, expected_hostname: Option<&str>) -> bool {
        if tcp_open(ip, 22, Duration::from_secs(2)) {
            debug!(%ip, port = 22, "address answers on ssh");
            return true;
        }
        for &port in EXTRA_PORTS {
            if tcp_open(ip, port, Duration::from_secs(1)) {
                debug!(%ip, port, "address answers on tcp");
                return true;
            }
        }
        if ping(ip) {
            debug!(%ip, "address answers icmp");
            return true;
        }
        hosts_conflict(ip, expected_hostname, "/etc/hosts")
    }
}

/// Probe with a fixed set of live addresses; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct FixedProbe(pub Vec<Ipv4Addr>);

impl Liveness for FixedProbe {
    fn in_use(&self, ip: Ipv4Addr, _expected: Option<&str>) -> bool {
        self.0.contains(&ip)
    }
}

fn tcp_open(ip: Ipv4Addr, port: u16, timeout: Duration) -> bool {
    TcpStream::connect_timeout(&SocketAddr::from((ip, port)), timeout).is_ok()
}

fn ping(ip: Ipv4Addr) -> bool {
    Command::new("ping")
        .args(["-c", "4", "-W", "1", &ip.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Whether the hosts file maps `ip` to a name other than the expected one.
fn hosts_conflict(ip: Ipv4Addr, expected_hostname: Option<&str>, hosts_path: &str) -> bool {
    let Ok(content) = std::fs::read_to_string(hosts_path) else {
        return false;
    };
    let needle = ip.to_string();
    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("");
        let mut it = line.split_whitespace();
        if it.next() != Some(needle.as_str()) {
            continue;
        }
        let names: Vec<&str> = it.collect();
        if names.is_empty() {
            continue;
        }
        match expected_hostname {
            Some(expected) => {
                if !names.iter().any(|n| *n == expected || n.starts_with(&format!("{}.", expected))) {
                    return true;
                }
            }
            None => return true,
        }
    }
    false
}
