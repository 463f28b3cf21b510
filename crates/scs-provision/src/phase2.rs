//! Provisioning phase 2: everything after the domain is created. Runs as
//! a detached process (or inline with `--foreground`), appends to the
//! background log, and checks the abort sentinel between every remote
//! wait. Remote shells never loop on their own; every wait is a local poll
//! so cancellation is always observed.

use std::time::Duration;

use scs_core::error::{Result, ScsError};
use scs_core::Config;
use scs_remote::host::{Connector, RemoteHost};
use scs_store::entities::{HvSystem, Network, VmKind};
use scs_store::record::Store;
use scs_store::Record;
use tracing::{info, instrument, warn};

use crate::phase1::ProvisionPlan;
use crate::{abort, convert, hosts, kickstart, phase1};

/// Pacing for the polling loops. Tests drop the interval to zero.
#[derive(Debug, Clone)]
pub struct Phase2Opts {
    pub poll: Duration,
    /// Poll budget per wait; at the default 10s interval this is two
    /// hours.
    pub max_polls: u32,
}

impl Default for Phase2Opts {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(10),
            max_polls: 720,
        }
    }
}

/// Run phase 2 to completion for a plan produced by phase 1.
#[instrument(skip_all, fields(system = %plan.system))]
pub fn run_phase2(
    cfg: &Config,
    connector: &dyn Connector,
    plan: &ProvisionPlan,
    opts: &Phase2Opts,
) -> Result<()> {
    let hv = connector.connect(&plan.hypervisor_ip)?;

    if plan.kind != VmKind::Overlay {
        // the kickstart install ends in a shutdown; wait for it, then
        // boot the installed system
        wait_until(cfg, opts, "kickstart install to finish", || {
            Ok(domstate(hv.as_ref(), &plan.system)? != "running")
        })?;
        hv.exec_ok(&format!("virsh start {}", plan.system))?;
    }

    // a freshly installed system has new host keys
    connector.forget_host(&plan.build_ip)?;
    let target = connector.connect(&plan.build_ip)?;
    wait_for_ssh(cfg, opts, target.as_ref(), "first boot")?;

    push_build_scripts(cfg, target.as_ref())?;
    // installs packages for the role, then powers the guest off
    let role_cmd = format!(
        "ESG/system-builds/role.sh scs-build --name {} --shutdown {}",
        plan.system, plan.role
    );
    info!(cmd = %role_cmd, "launching role build");
    let result = target.exec(&role_cmd)?;
    if !result.success() {
        // the shutdown races the ssh session; only a clean refusal is fatal
        warn!(code = result.code, "role script exited non-zero (may be the shutdown)");
    }

    wait_until(cfg, opts, "role build shutdown", || {
        Ok(domstate(hv.as_ref(), &plan.system)? != "running")
    })?;
    hv.exec_ok(&format!("virsh start {}", plan.system))?;
    wait_for_ssh(cfg, opts, target.as_ref(), "post-build boot")?;

    if plan.kickstart_url.is_some() {
        let build_net = load_network(cfg, &plan.build_net)?;
        kickstart::retract(connector, &build_net, &plan.system)?;
    }

    install_release(cfg, target.as_ref(), &plan.system)?;

    // backing images lose their hardware identity while still reachable
    if plan.backing_image {
        flush_identity(target.as_ref())?;
    }

    let needs_ip_change = plan.final_ip != plan.build_ip;
    if needs_ip_change {
        change_address(target.as_ref(), plan)?;
        hv.exec_ok(&format!("virsh destroy {} 2>/dev/null; true", plan.system))?;
        abort::check(cfg)?;
    }

    if plan.final_iface != plan.build_iface {
        hv.exec_ok(&format!(
            "sed -i 's/{build}/{fin}/g' /etc/libvirt/qemu/{name}.xml \
             && virsh define /etc/libvirt/qemu/{name}.xml",
            build = plan.build_iface,
            fin = plan.final_iface,
            name = plan.system
        ))?;
    }

    if plan.backing_image {
        if !needs_ip_change {
            target.exec("shutdown -h now 2>/dev/null; true")?;
        }
        wait_until(cfg, opts, "shutdown before conversion", || {
            Ok(domstate(hv.as_ref(), &plan.system)? != "running")
        })?;
        convert::to_backing(cfg, connector, &plan.system, plan.distribute)?;
        info!("backing system converted");
        return Ok(());
    }

    // single/overlay: make sure it is up on its final address
    hv.exec_ok(&format!("virsh start {} 2>/dev/null; true", plan.system))?;
    if plan.final_ip != "dhcp" {
        hosts::update(cfg, &plan.system, &plan.final_ip)?;
        connector.forget_host(&plan.final_ip)?;
        let final_host = connector.connect(&plan.final_ip)?;
        wait_for_ssh(cfg, opts, final_host.as_ref(), "final address")?;
    } else {
        wait_for_ssh(cfg, opts, target.as_ref(), "final boot")?;
    }

    mark_preferred(cfg, plan)?;
    info!("provision complete");
    Ok(())
}

/// Local polling loop with the abort sentinel observed every iteration.
fn wait_until(
    cfg: &Config,
    opts: &Phase2Opts,
    what: &str,
    mut ready: impl FnMut() -> Result<bool>,
) -> Result<()> {
    for _ in 0..opts.max_polls {
        abort::check(cfg)?;
        if ready()? {
            return Ok(());
        }
        std::thread::sleep(opts.poll);
    }
    Err(ScsError::remote(format!("timed out waiting for {}", what)))
}

fn wait_for_ssh(
    cfg: &Config,
    opts: &Phase2Opts,
    target: &dyn RemoteHost,
    what: &str,
) -> Result<()> {
    wait_until(cfg, opts, what, || {
        if !target.is_alive() {
            return Ok(false);
        }
        Ok(target.exec("true").map(|r| r.success()).unwrap_or(false))
    })
}

fn domstate(hv: &dyn RemoteHost, name: &str) -> Result<String> {
    let result = hv.exec(&format!("virsh domstate {}", name))?;
    if !result.success() {
        return Err(ScsError::remote(format!(
            "virsh domstate {} failed: {}",
            name,
            result.stderr.trim()
        )));
    }
    Ok(result.stdout.trim().to_string())
}

/// Stage the repo's build scripts onto the target under `ESG/`.
fn push_build_scripts(cfg: &Config, target: &dyn RemoteHost) -> Result<()> {
    let root = cfg.repo_path("system-builds");
    if !root.is_dir() {
        return Err(ScsError::missing(format!(
            "repository has no system-builds directory at {}",
            root.display()
        )));
    }
    target.exec_ok("mkdir -p ESG/system-builds")?;
    for entry in std::fs::read_dir(&root)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            let dest = format!("ESG/system-builds/{}", entry.file_name().to_string_lossy());
            target.copy_to(&entry.path(), &dest)?;
        }
    }
    target.exec_ok("chmod +x ESG/system-builds/role.sh")?;
    Ok(())
}

/// Compile the release, push it, and run the installer.
fn install_release(cfg: &Config, target: &dyn RemoteHost, system: &str) -> Result<()> {
    let release = scs_release::compile(cfg, system)?;
    let archive = release.write_archive(cfg)?;
    let remote_path = format!("/root/{}", archive.file_name().unwrap_or_default().to_string_lossy());
    target.copy_to(&archive, &remote_path)?;
    target.exec_ok(&format!("/bin/bash {} --install", remote_path))?;
    target.exec_ok(&format!("rm -f {}", remote_path))?;
    info!(system, "release installed");
    Ok(())
}

/// Rewrite the primary interface config to the final address (or DHCP).
fn change_address(target: &dyn RemoteHost, plan: &ProvisionPlan) -> Result<()> {
    let cmd = if plan.final_ip == "dhcp" {
        "sed -i -e 's/^BOOTPROTO=.*/BOOTPROTO=dhcp/' -e '/^IPADDR=/d' -e '/^NETMASK=/d' \
         -e '/^GATEWAY=/d' /etc/sysconfig/network-scripts/ifcfg-eth0"
            .to_string()
    } else {
        format!(
            "sed -i -e 's/^BOOTPROTO=.*/BOOTPROTO=static/' -e 's/^IPADDR=.*/IPADDR={}/' \
             /etc/sysconfig/network-scripts/ifcfg-eth0",
            plan.final_ip
        )
    };
    target.exec_ok(&cmd)?;
    info!(ip = %plan.final_ip, "final address configured");
    Ok(())
}

/// Strip hardware-level identity before a system becomes a backing image:
/// MAC pinning, ssh host keys, udev persistent-net rules.
fn flush_identity(target: &dyn RemoteHost) -> Result<()> {
    target.exec_ok(
        "sed -i '/^HWADDR=/d' /etc/sysconfig/network-scripts/ifcfg-eth0; \
         rm -f /etc/ssh/ssh_host_* /etc/udev/rules.d/70-persistent-net.rules",
    )?;
    Ok(())
}

fn load_network(cfg: &Config, key: &str) -> Result<Network> {
    Store::<Network>::new(cfg).load(key)
}

fn mark_preferred(cfg: &Config, plan: &ProvisionPlan) -> Result<()> {
    let links = Store::<HvSystem>::new(cfg);
    let mut all = links.filter(|l| l.system == plan.system)?;
    for link in all.iter_mut() {
        link.preferred = link.hypervisor == plan.hypervisor;
        links.update(&link.key(), link.clone())?;
    }
    Ok(())
}

/// Detach phase 2 into its own session so it outlives the invoking CLI.
/// The plan is serialized to disk and replayed by the hidden `__phase2`
/// entry point; output goes to the background log.
pub fn detach(cfg: &Config, plan: &ProvisionPlan) -> Result<u32> {
    let plan_file = phase1::save_plan(cfg, plan)?;
    let exe = std::env::current_exe()?;
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(cfg.background_log_path())?;

    let mut command = std::process::Command::new(exe);
    command
        .arg("__phase2")
        .arg(&plan_file)
        .stdin(std::process::Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // new session: surviving the parent is the whole point
        unsafe {
            command.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }
    let child = command.spawn()?;
    info!(pid = child.id(), plan = %plan_file.display(), "phase 2 detached");
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scs_remote::host::ExecResult;
    use scs_remote::mock::{MockConnector, MockRemote};
    use tempfile::TempDir;

    fn opts() -> Phase2Opts {
        Phase2Opts {
            poll: Duration::ZERO,
            max_polls: 50,
        }
    }

    fn cfg_with_repo() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::for_repo(dir.path().join("repo"));
        cfg.temp = dir.path().join("tmp");
        cfg.releases = dir.path().join("releases");
        std::fs::create_dir_all(&cfg.repo).unwrap();
        (dir, cfg)
    }

    #[test]
    fn test_wait_until_observes_abort() {
        let (_dir, cfg) = cfg_with_repo();
        abort::enable(&cfg).unwrap();
        let err = wait_until(&cfg, &opts(), "anything", || Ok(false)).unwrap_err();
        assert!(matches!(err, ScsError::Aborted(_)));
    }

    #[test]
    fn test_wait_until_times_out() {
        let (_dir, cfg) = cfg_with_repo();
        let err = wait_until(&cfg, &opts(), "the heat death", || Ok(false)).unwrap_err();
        assert!(matches!(err, ScsError::Remote(_)));
    }

    #[test]
    fn test_wait_until_returns_on_ready() {
        let (_dir, cfg) = cfg_with_repo();
        let mut polls = 0;
        wait_until(&cfg, &opts(), "three polls", || {
            polls += 1;
            Ok(polls == 3)
        })
        .unwrap();
        assert_eq!(polls, 3);
    }

    #[test]
    fn test_domstate_error_propagates() {
        let host = MockRemote::new("hv").on("virsh domstate", ExecResult::failed(1, "no domain"));
        let err = domstate(&*host, "web01").unwrap_err();
        assert!(matches!(err, ScsError::Remote(_)));
    }

    #[test]
    fn test_push_build_scripts() {
        let (_dir, cfg) = cfg_with_repo();
        std::fs::create_dir_all(cfg.repo_path("system-builds")).unwrap();
        std::fs::write(cfg.repo_path("system-builds/role.sh"), "#!/bin/sh\n").unwrap();
        std::fs::write(cfg.repo_path("system-builds/packages.list"), "nginx\n").unwrap();

        let target = MockRemote::new("10.10.0.9");
        push_build_scripts(&cfg, &*target).unwrap();
        assert!(target.saw("mkdir -p ESG/system-builds"));
        assert!(target.read_file("ESG/system-builds/role.sh").is_some());
        assert!(target.read_file("ESG/system-builds/packages.list").is_some());
        assert!(target.saw("chmod +x ESG/system-builds/role.sh"));
    }

    #[test]
    fn test_push_build_scripts_requires_directory() {
        let (_dir, cfg) = cfg_with_repo();
        let target = MockRemote::new("10.10.0.9");
        assert!(matches!(
            push_build_scripts(&cfg, &*target),
            Err(ScsError::MissingReference(_))
        ));
    }

    #[test]
    fn test_change_address_static_and_dhcp() {
        let target = MockRemote::new("t");
        let mut plan = sample_plan();
        plan.final_ip = "10.20.0.9".to_string();
        change_address(&*target, &plan).unwrap();
        assert!(target.saw("IPADDR=10.20.0.9"));

        let target = MockRemote::new("t");
        plan.final_ip = "dhcp".to_string();
        change_address(&*target, &plan).unwrap();
        assert!(target.saw("BOOTPROTO=dhcp"));
    }

    pub(crate) fn sample_plan() -> ProvisionPlan {
        ProvisionPlan {
            system: "web01".to_string(),
            kind: VmKind::Single,
            hypervisor: "kvm01".to_string(),
            hypervisor_ip: "10.1.0.10".to_string(),
            vm_path: "/vm".to_string(),
            build_net: "nyc-internal-build".to_string(),
            final_net: "nyc-internal-build".to_string(),
            build_ip: "10.10.0.9".to_string(),
            final_ip: "10.10.0.9".to_string(),
            uuid: "u-u-i-d".to_string(),
            mac: "54:52:00:aa:bb:cc".to_string(),
            build_iface: "br0".to_string(),
            final_iface: "br0".to_string(),
            kickstart_url: None,
            backing: None,
            backing_image: false,
            role: "web".to_string(),
            os: "el7".to_string(),
            arch: "x86_64".to_string(),
            disk_gb: 20,
            ram_mb: 2048,
            distribute: false,
        }
    }

    #[test]
    fn test_plan_roundtrip_through_disk() {
        let (_dir, cfg) = cfg_with_repo();
        let plan = sample_plan();
        let path = phase1::save_plan(&cfg, &plan).unwrap();
        let loaded = phase1::load_plan(&path).unwrap();
        assert_eq!(loaded.system, "web01");
        assert_eq!(loaded.kind, VmKind::Single);
        assert_eq!(loaded.build_ip, "10.10.0.9");
    }
}
