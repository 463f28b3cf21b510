//! Provisioning phase 1: validate, plan, deliver the kickstart, create the
//! domain, and record where it landed. Runs synchronously in the
//! foreground; phase 2 picks up from the returned plan.

use serde::{Deserialize, Serialize};

use scs_core::error::{Result, ScsError};
use scs_core::{Config, time};
use scs_ipam::index::{self, AssignOutcome};
use scs_ipam::probe::Liveness;
use scs_remote::host::{Connector, RemoteHost};
use scs_store::entities::{Build, HvSystem, Network, System, VmKind, build, network, system};
use scs_store::record::Store;
use scs_store::Record;
use tracing::{info, instrument};

use crate::{abort, hypervisor, ids, kickstart, overlay};

/// Everything phase 2 needs, serialized to disk when phase 2 runs as a
/// detached process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionPlan {
    pub system: String,
    pub kind: VmKind,
    pub hypervisor: String,
    pub hypervisor_ip: String,
    pub vm_path: String,
    pub build_net: String,
    pub final_net: String,
    pub build_ip: String,
    pub final_ip: String,
    pub uuid: String,
    pub mac: String,
    pub build_iface: String,
    pub final_iface: String,
    pub kickstart_url: Option<String>,
    pub backing: Option<String>,
    /// Converted to a backing image at the end of phase 2.
    pub backing_image: bool,
    pub role: String,
    pub os: String,
    pub arch: String,
    pub disk_gb: u32,
    pub ram_mb: u32,
    pub distribute: bool,
}

/// Caller-facing options for a provision run.
#[derive(Debug, Clone, Default)]
pub struct ProvisionOpts {
    /// Skip hypervisors running a VM matching this substring.
    pub avoid: Option<String>,
    /// Run phase 2 inline instead of detaching.
    pub foreground: bool,
    /// After converting a backing system, push the image everywhere.
    pub distribute: bool,
}

/// The build and final networks for a system. The build network is the
/// system's own network when that network allows builds, otherwise the
/// location's default build network; the final network is wherever the
/// system's address lives (the build network for dhcp systems).
pub fn resolve_networks(cfg: &Config, sys: &System) -> Result<(Network, Network)> {
    let home = match sys.ipv4() {
        Some(ip) => network::containing(cfg, ip)?.into_iter().next(),
        None => None,
    };

    let build_net = match &home {
        Some(net) if net.build_net => net.clone(),
        _ => network::default_build_network(cfg, &sys.location)?.ok_or_else(|| {
            ScsError::missing(format!(
                "location '{}' has no default build network",
                sys.location
            ))
        })?,
    };
    let final_net = home.unwrap_or_else(|| build_net.clone());

    if build_net.gateway.is_empty() || build_net.mask.is_empty() {
        return Err(ScsError::validation(format!(
            "build network '{}' is missing gateway or netmask",
            build_net.key()
        )));
    }
    Ok((build_net, final_net))
}

/// Run phase 1 for a system and return the plan for phase 2.
#[instrument(skip_all, fields(system = system_name))]
pub fn provision(
    cfg: &Config,
    connector: &dyn Connector,
    probe: &dyn Liveness,
    system_name: &str,
    opts: &ProvisionOpts,
) -> Result<ProvisionPlan> {
    abort::warn_if_set(cfg);

    let systems = Store::<System>::new(cfg);
    let mut sys = systems.load(system_name)?;
    if !sys.virtual_machine {
        return Err(ScsError::validation(format!(
            "system '{}' is physical; provisioning applies to virtual systems",
            sys.name
        )));
    }
    if sys.locked {
        return Err(ScsError::validation(format!("system '{}' is locked", sys.name)));
    }
    let located = hypervisor::locate(cfg, connector, &sys.name)?;
    if !located.is_empty() {
        return Err(ScsError::conflict(format!(
            "system '{}' already exists on {}",
            sys.name, located[0].0
        )));
    }
    if let Some(ip) = sys.ipv4()
        && probe.in_use(ip, Some(&sys.name))
    {
        return Err(ScsError::conflict(format!(
            "address {} is already alive; refusing to build over it",
            ip
        )));
    }

    let (build_net, final_net) = resolve_networks(cfg, &sys)?;
    let build_rec = Store::<Build>::new(cfg).load(&sys.build)?;
    let disk_gb = build::effective_disk_gb(cfg, &sys.build)?.ok_or_else(|| {
        ScsError::validation(format!("build '{}' lineage sets no disk size", sys.build))
    })?;
    let ram_mb = build::effective_ram_mb(cfg, &sys.build)?.ok_or_else(|| {
        ScsError::validation(format!("build '{}' lineage sets no ram size", sys.build))
    })?;

    // overlay=auto resolves (or synthesizes) its backing chain first
    if sys.overlay.as_deref() == Some("auto") {
        let backing = overlay::resolve_auto(cfg, connector, probe, &sys)?;
        info!(system = %sys.name, backing = %backing, "auto overlay resolved");
        sys.overlay = Some(backing);
        system::update(cfg, &sys.name, sys.clone())?;
    }
    let kind = sys.vm_kind().unwrap_or(VmKind::Single);
    let backing = match kind {
        VmKind::Overlay => sys.overlay.clone(),
        _ => None,
    };

    // dry compile proves every template variable resolves before any
    // remote effect happens
    scs_release::compile(cfg, &sys.name)?;

    let cands = hypervisor::candidates(
        cfg,
        connector,
        &sys,
        &build_net.key(),
        &final_net.key(),
        backing.as_deref(),
    )?;
    let selected = hypervisor::select(&cands, opts.avoid.as_deref())?.clone();
    info!(hv = %selected.hv.name, mem = selected.free_mem_mb, "hypervisor selected");

    // build address: the final IP when it sits on the build network,
    // otherwise an auto-allocated build-network address
    let build_ip = match sys.ipv4() {
        Some(ip) if network::contains(&build_net, ip) => ip,
        _ => index::first_available(cfg, &build_net)?,
    };
    match index::assign(cfg, probe, build_ip, &sys.name, false, Some("build address"))? {
        AssignOutcome::Assigned => {}
        AssignOutcome::Busy => {
            return Err(ScsError::conflict(format!(
                "build address {} answered the liveness probe",
                build_ip
            )));
        }
    }

    let (uuid, mac) = ids::allocate(cfg, connector)?;

    let kickstart_url = if kind == VmKind::Overlay {
        None
    } else {
        let full_vars = scs_release::resolver::resolve(cfg, &sys)?;
        let vars =
            kickstart::kickstart_vars(&sys, &build_rec, &build_net, &build_ip.to_string(), &full_vars);
        let rendered = kickstart::render(cfg, &build_rec.os, &vars)?;
        Some(kickstart::publish(cfg, connector, &build_net, &sys.name, &rendered)?)
    };

    let hv_remote = connector.connect(&selected.hv.mgmt_ip)?;
    let create_cmd = creator_command(
        &sys.name,
        &build_rec.arch,
        disk_gb,
        ram_mb,
        &mac,
        &uuid,
        &selected.build_iface,
        kickstart_url.as_deref(),
        backing.as_deref(),
    );
    hv_remote.exec_ok(&create_cmd)?;

    let links = Store::<HvSystem>::new(cfg);
    let link = HvSystem {
        system: sys.name.clone(),
        hypervisor: selected.hv.name.clone(),
        preferred: false,
    };
    if links.exists(&link.key())? {
        links.update(&link.key(), link)?;
    } else {
        links.create(link)?;
    }

    sys.build_date = time::unix_now();
    system::update(cfg, &sys.name, sys.clone())?;

    Ok(ProvisionPlan {
        system: sys.name,
        kind,
        hypervisor: selected.hv.name.clone(),
        hypervisor_ip: selected.hv.mgmt_ip.clone(),
        vm_path: selected.hv.vm_path.clone(),
        build_net: build_net.key(),
        final_net: final_net.key(),
        build_ip: build_ip.to_string(),
        final_ip: sys.ip,
        uuid,
        mac,
        build_iface: selected.build_iface,
        final_iface: selected.final_iface,
        kickstart_url,
        backing,
        backing_image: sys.backing_image,
        role: build_rec.role,
        os: build_rec.os,
        arch: build_rec.arch,
        disk_gb,
        ram_mb,
        distribute: opts.distribute,
    })
}

#[allow(clippy::too_many_arguments)]
fn creator_command(
    name: &str,
    arch: &str,
    disk_gb: u32,
    ram_mb: u32,
    mac: &str,
    uuid: &str,
    interface: &str,
    kickstart_url: Option<&str>,
    backing: Option<&str>,
) -> String {
    let mut cmd = format!(
        "/usr/local/sbin/kvm-install.sh --arch {} --disk {} --ram {} --mac {} --uuid {} --interface {}",
        arch, disk_gb, ram_mb, mac, uuid, interface
    );
    match (backing, kickstart_url) {
        (Some(base), _) => {
            cmd.push_str(&format!(" --no-install --base {}.img", base));
        }
        (None, Some(url)) => {
            cmd.push_str(&format!(" --ks {}", url));
        }
        (None, None) => {}
    }
    cmd.push(' ');
    cmd.push_str(name);
    cmd
}

/// Plan file used to hand phase 2 to a detached process.
pub fn plan_path(cfg: &Config, system: &str) -> std::path::PathBuf {
    cfg.temp.join(format!("scs-phase2-{}.json", system))
}

pub fn save_plan(cfg: &Config, plan: &ProvisionPlan) -> Result<std::path::PathBuf> {
    std::fs::create_dir_all(&cfg.temp)?;
    let path = plan_path(cfg, &plan.system);
    let json = serde_json::to_string_pretty(plan)
        .map_err(|e| ScsError::validation(format!("plan serialization failed: {}", e)))?;
    std::fs::write(&path, json)?;
    Ok(path)
}

pub fn load_plan(path: &std::path::Path) -> Result<ProvisionPlan> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json)
        .map_err(|e| ScsError::validation(format!("plan file {} is invalid: {}", path.display(), e)))
}
