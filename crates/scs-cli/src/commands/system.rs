use anyhow::{Context, Result};
use clap::Subcommand;

use scs_core::Config;
use scs_ipam::{Liveness, NetProbe, index};
use scs_provision::disk::DiskSource;
use scs_provision::{Phase2Opts, ProvisionOpts};
use scs_remote::SshConnector;
use scs_remote::host::{Connector, RemoteHost};
use scs_store::entities::{System, system};
use scs_store::record::Store;

use crate::display::{OutputFormat, SystemRow, render};

#[derive(Subcommand)]
pub enum Cmd {
    /// Register a system
    Create {
        name: String,
        build: String,
        /// Dotted quad or "dhcp"
        ip: String,
        location: String,
        environment: String,
        /// Physical host rather than a VM
        #[arg(long)]
        physical: bool,
        /// This system is a backing image
        #[arg(long)]
        backing_image: bool,
        /// Overlay on this backing system ("auto" resolves at provision)
        #[arg(long)]
        overlay: Option<String>,
        #[arg(long)]
        locked: bool,
    },
    /// Remove a system and free its address
    Delete {
        name: String,
        #[arg(long = "yes-i-am-sure")]
        yes: bool,
    },
    List,
    Show {
        name: String,
    },
    Update {
        name: String,
        #[arg(long)]
        build: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        overlay: Option<String>,
        #[arg(long)]
        locked: Option<bool>,
    },
    /// Build the VM end to end
    Provision {
        name: String,
        /// Run phase 2 inline instead of detaching
        #[arg(long)]
        foreground: bool,
        /// Skip hypervisors running a VM matching this substring
        #[arg(long)]
        avoid: Option<String>,
        /// Distribute the backing image after conversion
        #[arg(long)]
        distribute: bool,
    },
    /// Destroy the VM everywhere and free its resources
    Deprovision {
        name: String,
        #[arg(long = "yes-i-am-sure")]
        yes: bool,
    },
    /// Convert between single and backing image
    Convert {
        name: String,
        #[arg(long, conflicts_with = "single")]
        backing: bool,
        #[arg(long)]
        single: bool,
        /// With --backing: push the image to every eligible hypervisor
        #[arg(long)]
        distribute: bool,
    },
    /// Compile a release archive
    Release {
        name: String,
    },
    /// Audit a live host against its compiled release (exit 1 on FAIL)
    Audit {
        name: String,
    },
    /// Push the compiled release to a host and install it
    Deploy {
        name: String,
        /// Target address; defaults to the system's address
        #[arg(long)]
        host: Option<String>,
    },
    /// Push a backing system's images to every eligible hypervisor
    Distribute {
        name: String,
    },
    /// Attach a secondary disk
    DiskAdd {
        name: String,
        /// Short name; the image lands at <vm_path>/<name>.<alias>.img
        alias: String,
        /// Size in GB
        #[arg(long, conflicts_with = "backing")]
        size: Option<u32>,
        /// Overlay on an existing image path
        #[arg(long)]
        backing: Option<String>,
        #[arg(long, default_value = "virtio")]
        bus: String,
    },
    /// Print the fully resolved variable map
    Vars {
        name: String,
    },
}

pub fn run(cfg: &Config, cmd: Cmd, output: OutputFormat) -> Result<i32> {
    let connector = SshConnector::from_config(cfg);
    let probe = NetProbe;
    match cmd {
        Cmd::Create { name, build, ip, location, environment, physical, backing_image, overlay, locked } => {
            super::start_modify(cfg)?;
            let sys = System {
                name: name.clone(),
                build,
                ip: ip.clone(),
                location,
                environment,
                virtual_machine: !physical,
                backing_image,
                overlay,
                locked,
                build_date: 0,
            };
            // the address index row has to exist before the record claims
            // the address
            if let Some(parsed) = sys.ipv4()
                && index::find(cfg, parsed)?.is_some()
            {
                match index::assign(cfg, &probe, parsed, &name, false, None)? {
                    index::AssignOutcome::Assigned => {}
                    index::AssignOutcome::Busy => {
                        anyhow::bail!("{} answered the liveness probe; reserved instead", parsed)
                    }
                }
            }
            if let Err(e) = system::create(cfg, sys.clone()) {
                if let Some(parsed) = sys.ipv4()
                    && index::find(cfg, parsed)?.is_some()
                {
                    index::unassign(cfg, parsed)?;
                }
                return Err(e.into());
            }
            println!("system '{}' created", name);
        }
        Cmd::Delete { name, yes } => {
            super::start_modify(cfg)?;
            let sys = Store::<System>::new(cfg).load(&name)?;
            if !yes && !super::confirm(&format!("delete system '{}'?", name))? {
                println!("cancelled");
                return Ok(0);
            }
            if let Some(ip) = sys.ipv4()
                && index::find(cfg, ip)?.is_some()
            {
                index::unassign(cfg, ip)?;
            }
            Store::<System>::new(cfg).delete(&name)?;
            println!("system '{}' deleted", name);
        }
        Cmd::List => {
            let rows: Vec<SystemRow> =
                Store::<System>::new(cfg).list()?.into_iter().map(row).collect();
            print!("{}", render(&rows, output));
        }
        Cmd::Show { name } => {
            let rows = vec![row(Store::<System>::new(cfg).load(&name)?)];
            print!("{}", render(&rows, output));
        }
        Cmd::Update { name, build, ip, overlay, locked } => {
            super::start_modify(cfg)?;
            update_system(cfg, &probe, &name, build, ip, overlay, locked)?;
            println!("system '{}' updated", name);
        }
        Cmd::Provision { name, foreground, avoid, distribute } => {
            super::start_modify(cfg)?;
            let opts = ProvisionOpts { avoid, foreground, distribute };
            let plan = scs_provision::provision(cfg, &connector, &probe, &name, &opts)
                .context("provision phase 1 failed")?;
            if foreground {
                scs_provision::run_phase2(cfg, &connector, &plan, &Phase2Opts::default())
                    .context("provision phase 2 failed")?;
                println!("system '{}' provisioned", name);
            } else {
                let pid = scs_provision::phase2::detach(cfg, &plan)?;
                println!(
                    "system '{}' creating; phase 2 detached (pid {}, log {})",
                    name,
                    pid,
                    cfg.background_log_path().display()
                );
            }
        }
        Cmd::Deprovision { name, yes } => {
            super::start_modify(cfg)?;
            if !yes
                && !super::confirm(&format!(
                    "destroy '{}' and delete its disk images everywhere?",
                    name
                ))?
            {
                println!("cancelled");
                return Ok(0);
            }
            scs_provision::deprovision::deprovision(cfg, &connector, &name)?;
            println!("system '{}' deprovisioned", name);
        }
        Cmd::Convert { name, backing, single, distribute } => {
            super::start_modify(cfg)?;
            if backing {
                scs_provision::convert::to_backing(cfg, &connector, &name, distribute)?;
                println!("system '{}' converted to a backing image", name);
            } else if single {
                scs_provision::convert::from_backing(cfg, &connector, &name)?;
                println!("system '{}' restored from a backing image", name);
            } else {
                anyhow::bail!("convert requires --backing or --single");
            }
        }
        Cmd::Release { name } => {
            let release = scs_release::compile(cfg, &name)?;
            let path = release.write_archive(cfg)?;
            println!("{}", path.display());
        }
        Cmd::Audit { name } => {
            let report = scs_release::audit::audit(cfg, &connector, &name)?;
            if report.passed() {
                println!("PASS");
            } else {
                for failure in &report.failures {
                    println!("{}", failure);
                }
                println!("FAIL ({} problems)", report.failures.len());
                return Ok(1);
            }
        }
        Cmd::Deploy { name, host } => {
            let release = scs_release::compile(cfg, &name)?;
            let archive = release.write_archive(cfg)?;
            let target = host.unwrap_or_else(|| release.system.ip.clone());
            let remote = connector.connect(&target)?;
            let remote_path = format!(
                "/root/{}",
                archive.file_name().unwrap_or_default().to_string_lossy()
            );
            remote.copy_to(&archive, &remote_path)?;
            remote.exec_ok(&format!("/bin/bash {} --install", remote_path))?;
            remote.exec_ok(&format!("rm -f {}", remote_path))?;
            println!("release installed on {}", target);
        }
        Cmd::Distribute { name } => {
            scs_provision::distribute::distribute(cfg, &connector, &name)?;
            println!("backing images distributed");
        }
        Cmd::DiskAdd { name, alias, size, backing, bus } => {
            super::start_modify(cfg)?;
            let source = match (size, backing) {
                (Some(gb), None) => DiskSource::SizeGb(gb),
                (None, Some(path)) => DiskSource::Backing(path),
                _ => anyhow::bail!("disk-add requires exactly one of --size or --backing"),
            };
            scs_provision::disk::add_disk(cfg, &connector, &name, &alias, &source, &bus)?;
            println!("disk '{}' attached to '{}'", alias, name);
        }
        Cmd::Vars { name } => {
            let sys = Store::<System>::new(cfg).load(&name)?;
            let vars = scs_release::resolver::resolve(cfg, &sys)?;
            print!("{}", vars.to_lines());
        }
    }
    Ok(0)
}

/// Apply field changes to a system, keeping the address index in step when
/// the address moves: the new address is reserved before the record
/// changes, and the old row is released only once the update persists.
fn update_system(
    cfg: &Config,
    probe: &dyn Liveness,
    name: &str,
    build: Option<String>,
    ip: Option<String>,
    overlay: Option<String>,
    locked: Option<bool>,
) -> Result<()> {
    let mut sys = Store::<System>::new(cfg).load(name)?;
    let old_ip = sys.ipv4();
    if let Some(build) = build {
        sys.build = build;
    }
    if let Some(ip) = ip {
        sys.ip = ip;
    }
    if let Some(overlay) = overlay {
        sys.overlay = if overlay.is_empty() { None } else { Some(overlay) };
    }
    if let Some(locked) = locked {
        sys.locked = locked;
    }

    let new_ip = sys.ipv4();
    let ip_changed = new_ip != old_ip;
    if ip_changed
        && let Some(parsed) = new_ip
        && index::find(cfg, parsed)?.is_some()
    {
        match index::assign(cfg, probe, parsed, name, false, None)? {
            index::AssignOutcome::Assigned => {}
            index::AssignOutcome::Busy => {
                anyhow::bail!("{} answered the liveness probe; reserved instead", parsed)
            }
        }
    }
    if let Err(e) = system::update(cfg, name, sys) {
        if ip_changed
            && let Some(parsed) = new_ip
            && index::find(cfg, parsed)?.is_some()
        {
            index::unassign(cfg, parsed)?;
        }
        return Err(e.into());
    }
    // the old row may have been force-reassigned elsewhere; only release
    // a row that still names this system
    if ip_changed
        && let Some(parsed) = old_ip
        && let Some(row) = index::find(cfg, parsed)?
        && row.hostname == name
    {
        index::unassign(cfg, parsed)?;
    }
    Ok(())
}

fn row(s: System) -> SystemRow {
    let kind = match s.vm_kind() {
        Some(k) => k.to_string(),
        None => "physical".to_string(),
    };
    SystemRow {
        name: s.name,
        build: s.build,
        ip: s.ip,
        location: s.location,
        environment: s.environment,
        kind,
        locked: scs_core::fields::yn(s.locked).to_string(),
    }
}
