//! The per-/24 address index. Presence of a row means the address is
//! managed; absence means out-of-range. Rows are keyed by the fixed-width
//! octal form of the address so the files stay sorted numerically.
//!
//! Writers rely on the repository lock for serialization; there is no
//! intra-process locking here.

use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use scs_core::error::{Result, ScsError};
use scs_core::{Config, fields, time};
use scs_store::entities::Network;
use scs_store::Record;
use tracing::info;

use crate::addr;
use crate::probe::Liveness;

/// One managed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub ip: Ipv4Addr,
    pub reserved: bool,
    pub dhcp: bool,
    pub hostname: String,
    pub host_iface: String,
    pub comment: String,
    pub iface_comment: String,
    pub owner: String,
}

impl IndexRow {
    fn unmanaged(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            reserved: false,
            dhcp: false,
            hostname: String::new(),
            host_iface: String::new(),
            comment: String::new(),
            iface_comment: String::new(),
            owner: String::new(),
        }
    }

    pub fn available(&self) -> bool {
        !self.reserved && !self.dhcp && self.hostname.is_empty()
    }

    fn parse(line: &str, file: &str, lineno: usize) -> Result<Self> {
        let f: Vec<&str> = line.split(',').collect();
        if f.len() != 9 {
            return Err(ScsError::integrity(format!(
                "{}:{}: expected 9 fields, found {}",
                file,
                lineno + 1,
                f.len()
            )));
        }
        let ip = addr::from_octal_key(f[0])?;
        let dotted: Ipv4Addr = f[1]
            .parse()
            .map_err(|_| ScsError::integrity(format!("{}:{}: bad dotted address", file, lineno + 1)))?;
        if dotted != ip {
            return Err(ScsError::integrity(format!(
                "{}:{}: octal key {} does not match address {}",
                file,
                lineno + 1,
                f[0],
                dotted
            )));
        }
        Ok(Self {
            ip,
            reserved: fields::parse_yn("reserved", f[2])?,
            dhcp: fields::parse_yn("dhcp", f[3])?,
            hostname: f[4].to_string(),
            host_iface: f[5].to_string(),
            comment: f[6].to_string(),
            iface_comment: f[7].to_string(),
            owner: f[8].to_string(),
        })
    }

    fn line(&self) -> String {
        [
            addr::octal_key(self.ip),
            self.ip.to_string(),
            fields::yn(self.reserved).to_string(),
            fields::yn(self.dhcp).to_string(),
            self.hostname.clone(),
            self.host_iface.clone(),
            self.comment.clone(),
            self.iface_comment.clone(),
            self.owner.clone(),
        ]
        .join(",")
    }
}

/// Outcome of an assignment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    /// The address now belongs to the hostname.
    Assigned,
    /// The address answered the liveness probe; it was auto-reserved
    /// instead of assigned.
    Busy,
}

fn slice_path(cfg: &Config, slice: Ipv4Addr) -> PathBuf {
    cfg.repo_path(format!("net/{}", slice))
}

/// Path of the routes file belonging to a network's first /24.
pub fn routes_path(cfg: &Config, net: &Network) -> Result<PathBuf> {
    let base = addr::network_base(net)?;
    Ok(cfg.repo_path(format!("net/{}-routes", addr::slice_of(base))))
}

/// Rows of one /24 index, sorted. A missing file is an empty slice.
pub fn load_slice(cfg: &Config, slice: Ipv4Addr) -> Result<Vec<IndexRow>> {
    let path = slice_path(cfg, slice);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let file = format!("net/{}", slice);
    let mut rows = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        rows.push(IndexRow::parse(line, &file, lineno)?);
    }
    Ok(rows)
}

fn save_slice(cfg: &Config, slice: Ipv4Addr, mut rows: Vec<IndexRow>) -> Result<()> {
    rows.sort_by_key(|r| u32::from(r.ip));
    let path = slice_path(cfg, slice);
    let dir = path
        .parent()
        .ok_or_else(|| ScsError::validation(format!("bad index path {:?}", path)))?;
    std::fs::create_dir_all(dir)?;

    if rows.is_empty() {
        let _ = std::fs::remove_file(&path);
        return Ok(());
    }

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    for row in &rows {
        writeln!(tmp, "{}", row.line())?;
    }
    tmp.persist(&path).map_err(|e| ScsError::Io(e.error))?;
    Ok(())
}

/// The managed row for an address, if any.
pub fn find(cfg: &Config, ip: Ipv4Addr) -> Result<Option<IndexRow>> {
    Ok(load_slice(cfg, addr::slice_of(ip))?
        .into_iter()
        .find(|r| r.ip == ip))
}

fn mutate_row(
    cfg: &Config,
    ip: Ipv4Addr,
    mutate: impl FnOnce(&mut IndexRow) -> Result<()>,
) -> Result<()> {
    let slice = addr::slice_of(ip);
    let mut rows = load_slice(cfg, slice)?;
    let row = rows
        .iter_mut()
        .find(|r| r.ip == ip)
        .ok_or_else(|| ScsError::validation(format!("address {} is not managed", ip)))?;
    mutate(row)?;
    save_slice(cfg, slice, rows)
}

/// Assign an address to a system.
///
/// Reserved or foreign-owned addresses are conflicts unless `force`.
/// Re-assigning the same pair is a no-op. An unassigned address that
/// answers the liveness probe is auto-reserved and reported [`AssignOutcome::Busy`].
pub fn assign(
    cfg: &Config,
    probe: &dyn Liveness,
    ip: Ipv4Addr,
    hostname: &str,
    force: bool,
    comment: Option<&str>,
) -> Result<AssignOutcome> {
    let slice = addr::slice_of(ip);
    let mut rows = load_slice(cfg, slice)?;
    let row = rows
        .iter_mut()
        .find(|r| r.ip == ip)
        .ok_or_else(|| ScsError::validation(format!("address {} is not managed", ip)))?;

    if row.hostname == hostname {
        return Ok(AssignOutcome::Assigned);
    }
    if row.reserved && !force {
        return Err(ScsError::conflict(format!("address {} is reserved", ip)));
    }
    if !row.hostname.is_empty() && !force {
        return Err(ScsError::conflict(format!(
            "address {} is assigned to {}",
            ip, row.hostname
        )));
    }

    if row.hostname.is_empty() && !force && probe.in_use(ip, Some(hostname)) {
        row.reserved = true;
        row.comment = format!("auto-reserved in use {}", time::utc_now());
        save_slice(cfg, slice, rows)?;
        info!(%ip, "address answered probe; reserved instead of assigned");
        return Ok(AssignOutcome::Busy);
    }

    row.reserved = false;
    row.dhcp = false;
    row.hostname = hostname.to_string();
    row.comment = comment.map(fields::clean_description).unwrap_or_default();
    row.owner = cfg.user.clone();
    save_slice(cfg, slice, rows)?;
    Ok(AssignOutcome::Assigned)
}

/// Release an address: hostname and owner are cleared, the reservation
/// flag is left off.
pub fn unassign(cfg: &Config, ip: Ipv4Addr) -> Result<()> {
    mutate_row(cfg, ip, |row| {
        row.hostname.clear();
        row.host_iface.clear();
        row.owner.clear();
        row.reserved = false;
        Ok(())
    })
}

/// All unreserved, non-dhcp, unassigned rows across a network's slices.
pub fn list_available(cfg: &Config, net: &Network) -> Result<Vec<IndexRow>> {
    let (lo, hi) = addr::host_range(net)?;
    let mut out = Vec::new();
    for slice in addr::slices(net)? {
        for row in load_slice(cfg, slice)? {
            let v = u32::from(row.ip);
            if row.available() && v >= u32::from(lo) && v <= u32::from(hi) {
                out.push(row);
            }
        }
    }
    Ok(out)
}

/// First available address on a network, reserving nothing.
pub fn first_available(cfg: &Config, net: &Network) -> Result<Ipv4Addr> {
    list_available(cfg, net)?
        .first()
        .map(|r| r.ip)
        .ok_or_else(|| ScsError::conflict(format!("network '{}' has no free addresses", net.key())))
}

/// Probe every managed address in the network; unassigned rows that answer
/// are marked reserved with an auto-comment. Returns the newly reserved
/// addresses.
pub fn scan(cfg: &Config, probe: &dyn Liveness, net: &Network) -> Result<Vec<Ipv4Addr>> {
    let mut newly_reserved = Vec::new();
    for slice in addr::slices(net)? {
        let mut rows = load_slice(cfg, slice)?;
        let mut changed = false;
        for row in rows.iter_mut() {
            if row.available() && probe.in_use(row.ip, None) {
                row.reserved = true;
                row.comment = format!("auto-reserved by scan {}", time::utc_now());
                newly_reserved.push(row.ip);
                changed = true;
            }
        }
        if changed {
            save_slice(cfg, slice, rows)?;
        }
    }
    Ok(newly_reserved)
}

/// Every configured network containing the address.
pub fn locate(cfg: &Config, ip: Ipv4Addr) -> Result<Vec<Network>> {
    scs_store::entities::network::containing(cfg, ip)
}

/// Insert index rows for a range; rows that already exist are left alone.
/// The network address and broadcast are refused.
pub fn add_range(cfg: &Config, net: &Network, lo: Ipv4Addr, hi: Ipv4Addr) -> Result<usize> {
    check_range(net, lo, hi)?;
    let mut added = 0;
    for slice in addr::slices(net)? {
        let mut rows = load_slice(cfg, slice)?;
        let mut changed = false;
        for v in range_in_slice(slice, lo, hi) {
            let ip = Ipv4Addr::from(v);
            if !rows.iter().any(|r| r.ip == ip) {
                rows.push(IndexRow::unmanaged(ip));
                added += 1;
                changed = true;
            }
        }
        if changed {
            save_slice(cfg, slice, rows)?;
        }
    }
    Ok(added)
}

/// Delete index rows in a range. Assigned rows are refused.
pub fn remove_range(cfg: &Config, net: &Network, lo: Ipv4Addr, hi: Ipv4Addr) -> Result<usize> {
    check_range(net, lo, hi)?;
    let mut removed = 0;
    for slice in addr::slices(net)? {
        let rows = load_slice(cfg, slice)?;
        let mut keep = Vec::with_capacity(rows.len());
        for row in rows {
            let v = u32::from(row.ip);
            if v >= u32::from(lo) && v <= u32::from(hi) {
                if !row.hostname.is_empty() {
                    return Err(ScsError::conflict(format!(
                        "address {} is assigned to {}; unassign before removing",
                        row.ip, row.hostname
                    )));
                }
                removed += 1;
            } else {
                keep.push(row);
            }
        }
        save_slice(cfg, slice, keep)?;
    }
    Ok(removed)
}

/// Mark every managed row in a range reserved.
pub fn reserve_range(cfg: &Config, net: &Network, lo: Ipv4Addr, hi: Ipv4Addr) -> Result<usize> {
    check_range(net, lo, hi)?;
    let mut reserved = 0;
    for slice in addr::slices(net)? {
        let mut rows = load_slice(cfg, slice)?;
        let mut changed = false;
        for row in rows.iter_mut() {
            let v = u32::from(row.ip);
            if v >= u32::from(lo) && v <= u32::from(hi) && !row.reserved {
                row.reserved = true;
                reserved += 1;
                changed = true;
            }
        }
        if changed {
            save_slice(cfg, slice, rows)?;
        }
    }
    Ok(reserved)
}

fn check_range(net: &Network, lo: Ipv4Addr, hi: Ipv4Addr) -> Result<()> {
    let base = addr::network_base(net)?;
    let bcast = addr::broadcast(net)?;
    if u32::from(lo) <= u32::from(base) || u32::from(hi) >= u32::from(bcast) {
        return Err(ScsError::validation(format!(
            "range {}-{} must fall inside {} exclusive of network and broadcast",
            lo,
            hi,
            net.key()
        )));
    }
    Ok(())
}

fn range_in_slice(slice: Ipv4Addr, lo: Ipv4Addr, hi: Ipv4Addr) -> std::ops::RangeInclusive<u32> {
    let s = u32::from(slice);
    let lo = u32::from(lo).max(s);
    let hi = u32::from(hi).min(s + 255);
    lo..=hi
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::FixedProbe;
    use tempfile::TempDir;

    fn net(network: &str, cidr: u8) -> Network {
        Network {
            location: "nyc".to_string(),
            zone: "internal".to_string(),
            alias: "servers".to_string(),
            network: network.to_string(),
            mask: "255.255.255.0".to_string(),
            cidr,
            gateway: String::new(),
            static_routes: false,
            dns: String::new(),
            vlan: String::new(),
            description: String::new(),
            repo_addr: String::new(),
            repo_fs_path: String::new(),
            repo_url: String::new(),
            build_net: false,
            default_build: false,
            ntp: String::new(),
            dhcp: String::new(),
        }
    }

    fn repo() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let cfg = Config::for_repo(dir.path());
        (dir, cfg)
    }

    fn quiet() -> FixedProbe {
        FixedProbe(Vec::new())
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_add_range_and_list_available() {
        let (_dir, cfg) = repo();
        let n = net("10.0.0.0", 24);
        let added = add_range(&cfg, &n, ip("10.0.0.1"), ip("10.0.0.10")).unwrap();
        assert_eq!(added, 10);
        assert_eq!(list_available(&cfg, &n).unwrap().len(), 10);
        // idempotent
        assert_eq!(add_range(&cfg, &n, ip("10.0.0.1"), ip("10.0.0.10")).unwrap(), 0);
    }

    #[test]
    fn test_add_range_refuses_network_and_broadcast() {
        let (_dir, cfg) = repo();
        let n = net("10.0.0.0", 24);
        assert!(add_range(&cfg, &n, ip("10.0.0.0"), ip("10.0.0.10")).is_err());
        assert!(add_range(&cfg, &n, ip("10.0.0.250"), ip("10.0.0.255")).is_err());
    }

    #[test]
    fn test_assign_conflict_and_availability() {
        let (_dir, cfg) = repo();
        let n = net("10.0.0.0", 24);
        add_range(&cfg, &n, ip("10.0.0.1"), ip("10.0.0.10")).unwrap();

        assert_eq!(
            assign(&cfg, &quiet(), ip("10.0.0.5"), "sys1", false, None).unwrap(),
            AssignOutcome::Assigned
        );
        let err = assign(&cfg, &quiet(), ip("10.0.0.5"), "sys2", false, None).unwrap_err();
        assert!(matches!(err, ScsError::Conflict(_)));
        assert_eq!(list_available(&cfg, &n).unwrap().len(), 9);

        // force steals the address
        assert_eq!(
            assign(&cfg, &quiet(), ip("10.0.0.5"), "sys2", true, None).unwrap(),
            AssignOutcome::Assigned
        );
        assert_eq!(find(&cfg, ip("10.0.0.5")).unwrap().unwrap().hostname, "sys2");
    }

    #[test]
    fn test_assign_same_pair_is_noop() {
        let (_dir, cfg) = repo();
        let n = net("10.0.0.0", 24);
        add_range(&cfg, &n, ip("10.0.0.1"), ip("10.0.0.10")).unwrap();
        assign(&cfg, &quiet(), ip("10.0.0.5"), "sys1", false, Some("web tier")).unwrap();
        let before = find(&cfg, ip("10.0.0.5")).unwrap().unwrap();
        assign(&cfg, &quiet(), ip("10.0.0.5"), "sys1", false, None).unwrap();
        assert_eq!(find(&cfg, ip("10.0.0.5")).unwrap().unwrap(), before);
    }

    #[test]
    fn test_assign_unmanaged_rejected() {
        let (_dir, cfg) = repo();
        let err = assign(&cfg, &quiet(), ip("10.9.9.9"), "sys1", false, None).unwrap_err();
        assert!(matches!(err, ScsError::Validation(_)));
    }

    #[test]
    fn test_assign_live_address_reserves() {
        let (_dir, cfg) = repo();
        let n = net("10.0.0.0", 24);
        add_range(&cfg, &n, ip("10.0.0.1"), ip("10.0.0.10")).unwrap();
        let probe = FixedProbe(vec![ip("10.0.0.5")]);
        assert_eq!(
            assign(&cfg, &probe, ip("10.0.0.5"), "sys1", false, None).unwrap(),
            AssignOutcome::Busy
        );
        let row = find(&cfg, ip("10.0.0.5")).unwrap().unwrap();
        assert!(row.reserved);
        assert!(row.hostname.is_empty());
        assert!(row.comment.starts_with("auto-reserved"));
    }

    #[test]
    fn test_unassign_restores_row() {
        let (_dir, cfg) = repo();
        let n = net("10.0.0.0", 24);
        add_range(&cfg, &n, ip("10.0.0.1"), ip("10.0.0.10")).unwrap();
        let before = find(&cfg, ip("10.0.0.5")).unwrap().unwrap();
        assign(&cfg, &quiet(), ip("10.0.0.5"), "sys1", false, None).unwrap();
        unassign(&cfg, ip("10.0.0.5")).unwrap();
        let after = find(&cfg, ip("10.0.0.5")).unwrap().unwrap();
        // identical apart from comment policy
        assert_eq!(after.hostname, before.hostname);
        assert_eq!(after.owner, before.owner);
        assert_eq!(after.reserved, before.reserved);
        assert_eq!(after.dhcp, before.dhcp);
    }

    #[test]
    fn test_reserved_blocks_assign_without_force() {
        let (_dir, cfg) = repo();
        let n = net("10.0.0.0", 24);
        add_range(&cfg, &n, ip("10.0.0.1"), ip("10.0.0.10")).unwrap();
        reserve_range(&cfg, &n, ip("10.0.0.5"), ip("10.0.0.5")).unwrap();
        assert!(matches!(
            assign(&cfg, &quiet(), ip("10.0.0.5"), "sys1", false, None),
            Err(ScsError::Conflict(_))
        ));
        assert_eq!(
            assign(&cfg, &quiet(), ip("10.0.0.5"), "sys1", true, None).unwrap(),
            AssignOutcome::Assigned
        );
    }

    #[test]
    fn test_scan_reserves_live_rows() {
        let (_dir, cfg) = repo();
        let n = net("10.0.0.0", 24);
        add_range(&cfg, &n, ip("10.0.0.1"), ip("10.0.0.10")).unwrap();
        assign(&cfg, &quiet(), ip("10.0.0.2"), "sys1", false, None).unwrap();
        let probe = FixedProbe(vec![ip("10.0.0.2"), ip("10.0.0.3")]);
        let reserved = scan(&cfg, &probe, &n).unwrap();
        // assigned row untouched, free live row reserved
        assert_eq!(reserved, vec![ip("10.0.0.3")]);
        assert_eq!(find(&cfg, ip("10.0.0.2")).unwrap().unwrap().hostname, "sys1");
        assert!(find(&cfg, ip("10.0.0.3")).unwrap().unwrap().reserved);
    }

    #[test]
    fn test_remove_range_refuses_assigned() {
        let (_dir, cfg) = repo();
        let n = net("10.0.0.0", 24);
        add_range(&cfg, &n, ip("10.0.0.1"), ip("10.0.0.10")).unwrap();
        assign(&cfg, &quiet(), ip("10.0.0.5"), "sys1", false, None).unwrap();
        assert!(matches!(
            remove_range(&cfg, &n, ip("10.0.0.1"), ip("10.0.0.10")),
            Err(ScsError::Conflict(_))
        ));
        unassign(&cfg, ip("10.0.0.5")).unwrap();
        assert_eq!(remove_range(&cfg, &n, ip("10.0.0.1"), ip("10.0.0.10")).unwrap(), 10);
    }

    #[test]
    fn test_wide_network_spans_slices() {
        let (_dir, cfg) = repo();
        let n = net("10.0.0.0", 23);
        add_range(&cfg, &n, ip("10.0.0.200"), ip("10.0.1.50")).unwrap();
        assert_eq!(load_slice(&cfg, ip("10.0.0.0")).unwrap().len(), 56);
        assert_eq!(load_slice(&cfg, ip("10.0.1.0")).unwrap().len(), 51);
        assert_eq!(list_available(&cfg, &n).unwrap().len(), 107);
    }

    #[test]
    fn test_first_available() {
        let (_dir, cfg) = repo();
        let n = net("10.0.0.0", 24);
        add_range(&cfg, &n, ip("10.0.0.5"), ip("10.0.0.7")).unwrap();
        assert_eq!(first_available(&cfg, &n).unwrap(), ip("10.0.0.5"));
        assign(&cfg, &quiet(), ip("10.0.0.5"), "a", false, None).unwrap();
        assign(&cfg, &quiet(), ip("10.0.0.6"), "b", false, None).unwrap();
        assign(&cfg, &quiet(), ip("10.0.0.7"), "c", false, None).unwrap();
        assert!(matches!(first_available(&cfg, &n), Err(ScsError::Conflict(_))));
    }
}
