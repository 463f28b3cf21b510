//! Hypervisor capacity polling, candidate selection, and the ranking rule
//! used to place new VMs.

use scs_core::error::{Result, ScsError};
use scs_core::Config;
use scs_remote::host::{Connector, RemoteHost};
use scs_store::entities::{HvEnvironment, HvNetwork, Hypervisor, System};
use scs_store::record::Store;
use tracing::{debug, info};

/// A hypervisor that passed the structural filters, with its live capacity.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub hv: Hypervisor,
    pub free_mem_mb: u64,
    pub free_disk_mb: u64,
    pub running: Vec<String>,
    /// Interface names for the build and final networks.
    pub build_iface: String,
    pub final_iface: String,
}

/// Free memory in MB, floored to 0 when under the configured minimum.
pub fn poll_free_memory(remote: &dyn RemoteHost, hv: &Hypervisor) -> Result<u64> {
    let out = remote.exec_ok("free -m | awk '/^Mem:/ {print $7}'")?;
    let mb: u64 = out.trim().parse().unwrap_or(0);
    Ok(if mb < hv.min_free_mem_mb { 0 } else { mb })
}

/// Free disk under the VM path in MB, floored to 0 under the minimum.
pub fn poll_free_disk(remote: &dyn RemoteHost, hv: &Hypervisor) -> Result<u64> {
    let out = remote.exec_ok(&format!("df -Pm '{}' | awk 'NR==2 {{print $4}}'", hv.vm_path))?;
    let mb: u64 = out.trim().parse().unwrap_or(0);
    Ok(if mb < hv.min_free_disk_mb { 0 } else { mb })
}

/// Names of the VMs currently defined as running.
pub fn running_vms(remote: &dyn RemoteHost) -> Result<Vec<String>> {
    let out = remote.exec_ok("virsh list --name")?;
    Ok(out.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
}

/// Hypervisors currently holding a domain for `system`, with its state.
pub fn locate(
    cfg: &Config,
    connector: &dyn Connector,
    system: &str,
) -> Result<Vec<(String, String)>> {
    let mut found = Vec::new();
    for hv in Store::<Hypervisor>::new(cfg).filter(|h| h.enabled)? {
        let Ok(remote) = connector.connect(&hv.mgmt_ip) else {
            continue;
        };
        let result = remote.exec(&format!("virsh domstate {}", system))?;
        if result.success() {
            found.push((hv.name.clone(), result.stdout.trim().to_string()));
        }
    }
    Ok(found)
}

/// Search all enabled hypervisors for running VMs matching a substring.
pub fn search(
    cfg: &Config,
    connector: &dyn Connector,
    needle: &str,
) -> Result<Vec<(String, String)>> {
    let mut hits = Vec::new();
    for hv in Store::<Hypervisor>::new(cfg).filter(|h| h.enabled)? {
        let Ok(remote) = connector.connect(&hv.mgmt_ip) else {
            continue;
        };
        for vm in running_vms(remote.as_ref())? {
            if vm.contains(needle) {
                hits.push((hv.name.clone(), vm));
            }
        }
    }
    Ok(hits)
}

/// Structural + capacity filtering for a system build.
///
/// A candidate must be enabled, at the system's location, linked to the
/// system's environment and to both the build and final networks, above
/// its capacity minima, and, for overlays, must carry the backing image.
pub fn candidates(
    cfg: &Config,
    connector: &dyn Connector,
    system: &System,
    build_net: &str,
    final_net: &str,
    backing: Option<&str>,
) -> Result<Vec<Candidate>> {
    let env_links = Store::<HvEnvironment>::new(cfg).list()?;
    let net_links = Store::<HvNetwork>::new(cfg).list()?;

    let mut out = Vec::new();
    for hv in Store::<Hypervisor>::new(cfg).list()? {
        if !hv.enabled || hv.location != system.location {
            continue;
        }
        if !env_links
            .iter()
            .any(|l| l.hypervisor == hv.name && l.environment == system.environment)
        {
            continue;
        }
        let build_iface = net_links
            .iter()
            .find(|l| l.hypervisor == hv.name && l.network == build_net)
            .map(|l| l.interface.clone());
        let final_iface = net_links
            .iter()
            .find(|l| l.hypervisor == hv.name && l.network == final_net)
            .map(|l| l.interface.clone());
        let (Some(build_iface), Some(final_iface)) = (build_iface, final_iface) else {
            continue;
        };

        let Ok(remote) = connector.connect(&hv.mgmt_ip) else {
            debug!(hv = %hv.name, "unreachable; skipped");
            continue;
        };
        if let Some(backing) = backing {
            let img = format!("{}/backing_images/{}.img", hv.vm_path, backing);
            if !remote.exec(&format!("test -f {}", img))?.success() {
                debug!(hv = %hv.name, backing, "missing backing image; skipped");
                continue;
            }
        }
        let free_mem_mb = poll_free_memory(remote.as_ref(), &hv)?;
        let free_disk_mb = poll_free_disk(remote.as_ref(), &hv)?;
        if free_mem_mb == 0 || free_disk_mb == 0 {
            debug!(hv = %hv.name, "below capacity minima; skipped");
            continue;
        }
        let running = running_vms(remote.as_ref())?;
        out.push(Candidate {
            hv,
            free_mem_mb,
            free_disk_mb,
            running,
            build_iface,
            final_iface,
        });
    }
    Ok(out)
}

/// Pick the best candidate: a candidate takes the selection when its free
/// memory beats the current best by more than 5 percent, with free disk as
/// the secondary criterion. An `avoid` substring skips hosts running a
/// matching VM unless every candidate matches.
pub fn rank<'a>(cands: &'a [Candidate], avoid: Option<&str>) -> Option<&'a Candidate> {
    let avoid = avoid.filter(|a| {
        let all_match = cands
            .iter()
            .all(|c| c.running.iter().any(|vm| vm.contains(a)));
        if all_match {
            info!(avoid = a, "every candidate matches --avoid; ignoring it");
        }
        !all_match
    });

    let mut best: Option<&Candidate> = None;
    let mut mem: i64 = 0;
    let mut disk: i64 = 0;
    for c in cands {
        if let Some(a) = avoid
            && c.running.iter().any(|vm| vm.contains(a))
        {
            continue;
        }
        let mem_pct = (c.free_mem_mb as i64 - mem) * 100 / (mem + 1);
        let disk_pct = (c.free_disk_mb as i64 - disk) * 100 / (disk + 1);
        if mem_pct > 5 || (mem_pct >= -5 && disk_pct > 5) {
            best = Some(c);
            mem = c.free_mem_mb as i64;
            disk = c.free_disk_mb as i64;
        }
    }
    best
}

/// Select a hypervisor for the system or explain why none fit.
pub fn select<'a>(cands: &'a [Candidate], avoid: Option<&str>) -> Result<&'a Candidate> {
    rank(cands, avoid).ok_or_else(|| {
        ScsError::validation("no hypervisor satisfies the placement constraints")
    })
}
