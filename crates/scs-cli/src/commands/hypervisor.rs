use anyhow::Result;
use clap::Subcommand;

use scs_core::Config;
use scs_provision::hypervisor;
use scs_remote::SshConnector;
use scs_remote::host::Connector;
use scs_store::entities::{HvEnvironment, HvNetwork, Hypervisor, System};
use scs_store::record::Store;
use scs_store::Record;

use crate::display::{HypervisorRow, OutputFormat, render};

#[derive(Subcommand)]
pub enum Cmd {
    /// Register a hypervisor
    Create {
        name: String,
        mgmt_ip: String,
        location: String,
        #[arg(long, default_value = "/var/lib/libvirt/images")]
        vm_path: String,
        #[arg(long, default_value_t = 10240)]
        min_disk_mb: u64,
        #[arg(long, default_value_t = 2048)]
        min_mem_mb: u64,
        #[arg(long)]
        disabled: bool,
    },
    Delete {
        name: String,
    },
    List,
    Show {
        name: String,
    },
    Update {
        name: String,
        #[arg(long)]
        mgmt_ip: Option<String>,
        #[arg(long)]
        vm_path: Option<String>,
        #[arg(long)]
        min_disk_mb: Option<u64>,
        #[arg(long)]
        min_mem_mb: Option<u64>,
        #[arg(long)]
        enabled: Option<bool>,
    },
    /// Poll live capacity (free disk and memory)
    Poll {
        name: String,
    },
    /// Rank all eligible hypervisors for a system build
    Rank {
        system: String,
        #[arg(long)]
        avoid: Option<String>,
    },
    /// Find which hypervisors hold a VM
    Locate {
        system: String,
    },
    /// Search running VMs by name fragment
    Search {
        pattern: String,
    },
    /// Link this hypervisor to an environment
    AddEnvironment {
        name: String,
        environment: String,
    },
    /// Link this hypervisor to a network through an interface
    AddNetwork {
        name: String,
        /// loc-zone-alias network key
        network: String,
        interface: String,
    },
}

pub fn run(cfg: &Config, cmd: Cmd, output: OutputFormat) -> Result<i32> {
    let connector = SshConnector::from_config(cfg);
    match cmd {
        Cmd::Create { name, mgmt_ip, location, vm_path, min_disk_mb, min_mem_mb, disabled } => {
            super::start_modify(cfg)?;
            Store::<scs_store::entities::Location>::new(cfg).load(&location)?;
            Store::<Hypervisor>::new(cfg).create(Hypervisor {
                name: name.clone(),
                mgmt_ip,
                location,
                vm_path,
                min_free_disk_mb: min_disk_mb,
                min_free_mem_mb: min_mem_mb,
                enabled: !disabled,
            })?;
            println!("hypervisor '{}' created", name);
        }
        Cmd::Delete { name } => {
            super::start_modify(cfg)?;
            let links = Store::<HvEnvironment>::new(cfg);
            links.save_all(links.filter(|l| l.hypervisor != name)?)?;
            let nets = Store::<HvNetwork>::new(cfg);
            nets.save_all(nets.filter(|l| l.hypervisor != name)?)?;
            Store::<Hypervisor>::new(cfg).delete(&name)?;
            println!("hypervisor '{}' deleted", name);
        }
        Cmd::List => {
            let rows: Vec<HypervisorRow> =
                Store::<Hypervisor>::new(cfg).list()?.into_iter().map(row).collect();
            print!("{}", render(&rows, output));
        }
        Cmd::Show { name } => {
            let rows = vec![row(Store::<Hypervisor>::new(cfg).load(&name)?)];
            print!("{}", render(&rows, output));
        }
        Cmd::Update { name, mgmt_ip, vm_path, min_disk_mb, min_mem_mb, enabled } => {
            super::start_modify(cfg)?;
            let mut hv = Store::<Hypervisor>::new(cfg).load(&name)?;
            if let Some(mgmt_ip) = mgmt_ip {
                hv.mgmt_ip = mgmt_ip;
            }
            if let Some(vm_path) = vm_path {
                hv.vm_path = vm_path;
            }
            if let Some(v) = min_disk_mb {
                hv.min_free_disk_mb = v;
            }
            if let Some(v) = min_mem_mb {
                hv.min_free_mem_mb = v;
            }
            if let Some(v) = enabled {
                hv.enabled = v;
            }
            Store::<Hypervisor>::new(cfg).update(&name, hv)?;
            println!("hypervisor '{}' updated", name);
        }
        Cmd::Poll { name } => {
            let hv = Store::<Hypervisor>::new(cfg).load(&name)?;
            let remote = connector.connect(&hv.mgmt_ip)?;
            let mem = hypervisor::poll_free_memory(remote.as_ref(), &hv)?;
            let disk = hypervisor::poll_free_disk(remote.as_ref(), &hv)?;
            println!("{}: {} MB memory free, {} MB disk free", name, mem, disk);
        }
        Cmd::Rank { system, avoid } => {
            let sys = Store::<System>::new(cfg).load(&system)?;
            let (build_net, final_net) = scs_provision::phase1::resolve_networks(cfg, &sys)?;
            let backing = sys.overlay.clone().filter(|o| o != "auto");
            let cands = hypervisor::candidates(
                cfg,
                &connector,
                &sys,
                &build_net.key(),
                &final_net.key(),
                backing.as_deref(),
            )?;
            for c in &cands {
                println!(
                    "{} mem={}MB disk={}MB vms={}",
                    c.hv.name,
                    c.free_mem_mb,
                    c.free_disk_mb,
                    c.running.len()
                );
            }
            if let Some(best) = hypervisor::rank(&cands, avoid.as_deref()) {
                println!("selected: {}", best.hv.name);
            } else {
                anyhow::bail!("no eligible hypervisor");
            }
        }
        Cmd::Locate { system } => {
            for (hv, state) in hypervisor::locate(cfg, &connector, &system)? {
                println!("{} {}", hv, state);
            }
        }
        Cmd::Search { pattern } => {
            for (hv, vm) in hypervisor::search(cfg, &connector, &pattern)? {
                println!("{} {}", hv, vm);
            }
        }
        Cmd::AddEnvironment { name, environment } => {
            super::start_modify(cfg)?;
            Store::<Hypervisor>::new(cfg).load(&name)?;
            Store::<scs_store::entities::Environment>::new(cfg).load(&environment)?;
            Store::<HvEnvironment>::new(cfg).create(HvEnvironment {
                environment: environment.clone(),
                hypervisor: name.clone(),
            })?;
            println!("hypervisor '{}' linked to environment '{}'", name, environment);
        }
        Cmd::AddNetwork { name, network, interface } => {
            super::start_modify(cfg)?;
            Store::<Hypervisor>::new(cfg).load(&name)?;
            Store::<scs_store::entities::Network>::new(cfg).load(&network)?;
            Store::<HvNetwork>::new(cfg).create(HvNetwork {
                network: network.clone(),
                hypervisor: name.clone(),
                interface,
            })?;
            println!("hypervisor '{}' linked to network '{}'", name, network);
        }
    }
    Ok(0)
}

fn row(h: Hypervisor) -> HypervisorRow {
    HypervisorRow {
        name: h.name,
        mgmt_ip: h.mgmt_ip,
        location: h.location,
        vm_path: h.vm_path,
        enabled: scs_core::fields::yn(h.enabled).to_string(),
    }
}
