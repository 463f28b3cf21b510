use anyhow::Result;
use clap::Subcommand;

use scs_core::Config;
use scs_ipam::{NetProbe, addr, index};
use scs_store::entities::{Network, network};
use scs_store::record::Store;
use scs_store::Record;

use crate::display::{IpRow, NetworkRow, OutputFormat, render};

#[derive(Subcommand)]
pub enum Cmd {
    /// Register a network
    Create {
        location: String,
        zone: String,
        alias: String,
        /// Network address, dotted quad
        #[arg(long)]
        network: String,
        #[arg(long, default_value = "255.255.255.0")]
        mask: String,
        #[arg(long, default_value_t = 24)]
        cidr: u8,
        #[arg(long, default_value = "")]
        gateway: String,
        #[arg(long)]
        static_routes: bool,
        #[arg(long, default_value = "")]
        dns: String,
        #[arg(long, default_value = "")]
        vlan: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        repo_addr: String,
        #[arg(long, default_value = "")]
        repo_path: String,
        #[arg(long, default_value = "")]
        repo_url: String,
        /// Systems may be built while attached here
        #[arg(long)]
        build: bool,
        /// The location's default build network
        #[arg(long)]
        default_build: bool,
        #[arg(long, default_value = "")]
        ntp: String,
        #[arg(long, default_value = "")]
        dhcp: String,
    },
    Delete {
        key: String,
    },
    List,
    Show {
        key: String,
    },
    /// Address-level operations
    Ip {
        #[command(subcommand)]
        cmd: IpCmd,
    },
}

#[derive(Subcommand)]
pub enum IpCmd {
    /// Add index rows for a range (start end, or start/cidr)
    AddRange {
        /// loc-zone-alias network key
        net: String,
        start: String,
        end: Option<String>,
    },
    /// Delete index rows in a range
    RemoveRange {
        net: String,
        start: String,
        end: Option<String>,
    },
    /// Mark a range reserved
    ReserveRange {
        net: String,
        start: String,
        end: Option<String>,
    },
    /// Show free addresses on a network
    ListAvailable {
        net: String,
    },
    /// Assign an address to a system
    Assign {
        ip: String,
        hostname: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Release an address
    Unassign {
        ip: String,
    },
    /// Show every configured network containing an address
    Locate {
        ip: String,
    },
    /// Probe every managed address and reserve the live ones
    Scan {
        net: String,
    },
    /// Liveness and registration report for one address
    Check {
        ip: String,
    },
}

pub fn run(cfg: &Config, cmd: Cmd, output: OutputFormat) -> Result<i32> {
    match cmd {
        Cmd::Create {
            location,
            zone,
            alias,
            network: net_addr,
            mask,
            cidr,
            gateway,
            static_routes,
            dns,
            vlan,
            description,
            repo_addr,
            repo_path,
            repo_url,
            build,
            default_build,
            ntp,
            dhcp,
        } => {
            super::start_modify(cfg)?;
            Store::<scs_store::entities::Location>::new(cfg).load(&location)?;
            let net = Network {
                location,
                zone,
                alias,
                network: net_addr,
                mask,
                cidr,
                gateway,
                static_routes,
                dns,
                vlan,
                description: scs_core::fields::clean_description(&description),
                repo_addr,
                repo_fs_path: repo_path,
                repo_url,
                build_net: build || default_build,
                default_build,
                ntp,
                dhcp,
            };
            let key = net.key();
            network::create(cfg, net)?;
            println!("network '{}' created", key);
        }
        Cmd::Delete { key } => {
            super::start_modify(cfg)?;
            Store::<Network>::new(cfg).delete(&key)?;
            println!("network '{}' deleted", key);
        }
        Cmd::List => {
            let rows: Vec<NetworkRow> =
                Store::<Network>::new(cfg).list()?.into_iter().map(row).collect();
            print!("{}", render(&rows, output));
        }
        Cmd::Show { key } => {
            let rows = vec![row(Store::<Network>::new(cfg).load(&key)?)];
            print!("{}", render(&rows, output));
        }
        Cmd::Ip { cmd } => return run_ip(cfg, cmd, output),
    }
    Ok(0)
}

fn run_ip(cfg: &Config, cmd: IpCmd, output: OutputFormat) -> Result<i32> {
    let probe = NetProbe;
    match cmd {
        IpCmd::AddRange { net, start, end } => {
            super::start_modify(cfg)?;
            let net = Store::<Network>::new(cfg).load(&net)?;
            let (lo, hi) = addr::parse_range(&start, end.as_deref())?;
            let added = index::add_range(cfg, &net, lo, hi)?;
            println!("{} addresses added", added);
        }
        IpCmd::RemoveRange { net, start, end } => {
            super::start_modify(cfg)?;
            let net = Store::<Network>::new(cfg).load(&net)?;
            let (lo, hi) = addr::parse_range(&start, end.as_deref())?;
            let removed = index::remove_range(cfg, &net, lo, hi)?;
            println!("{} addresses removed", removed);
        }
        IpCmd::ReserveRange { net, start, end } => {
            super::start_modify(cfg)?;
            let net = Store::<Network>::new(cfg).load(&net)?;
            let (lo, hi) = addr::parse_range(&start, end.as_deref())?;
            let reserved = index::reserve_range(cfg, &net, lo, hi)?;
            println!("{} addresses reserved", reserved);
        }
        IpCmd::ListAvailable { net } => {
            let net = Store::<Network>::new(cfg).load(&net)?;
            let rows: Vec<IpRow> =
                index::list_available(cfg, &net)?.into_iter().map(ip_row).collect();
            print!("{}", render(&rows, output));
        }
        IpCmd::Assign { ip, hostname, force, comment } => {
            super::start_modify(cfg)?;
            let ip = scs_core::fields::parse_ipv4(&ip)?;
            match index::assign(cfg, &probe, ip, &hostname, force, comment.as_deref())? {
                index::AssignOutcome::Assigned => println!("{} assigned to {}", ip, hostname),
                index::AssignOutcome::Busy => {
                    anyhow::bail!("{} answered the liveness probe; reserved instead", ip)
                }
            }
        }
        IpCmd::Unassign { ip } => {
            super::start_modify(cfg)?;
            let ip = scs_core::fields::parse_ipv4(&ip)?;
            index::unassign(cfg, ip)?;
            println!("{} unassigned", ip);
        }
        IpCmd::Locate { ip } => {
            let ip = scs_core::fields::parse_ipv4(&ip)?;
            for net in index::locate(cfg, ip)? {
                println!("{}", net.key());
            }
        }
        IpCmd::Scan { net } => {
            super::start_modify(cfg)?;
            let net = Store::<Network>::new(cfg).load(&net)?;
            let reserved = index::scan(cfg, &probe, &net)?;
            for ip in &reserved {
                println!("{} reserved (in use)", ip);
            }
            println!("{} addresses newly reserved", reserved.len());
        }
        IpCmd::Check { ip } => {
            let parsed = scs_core::fields::parse_ipv4(&ip)?;
            use scs_ipam::Liveness;
            let alive = probe.in_use(parsed, None);
            match index::find(cfg, parsed)? {
                Some(r) => println!(
                    "{}: managed reserved={} dhcp={} host='{}' alive={}",
                    parsed,
                    scs_core::fields::yn(r.reserved),
                    scs_core::fields::yn(r.dhcp),
                    r.hostname,
                    alive
                ),
                None => println!("{}: unmanaged alive={}", parsed, alive),
            }
        }
    }
    Ok(0)
}

fn row(n: Network) -> NetworkRow {
    NetworkRow {
        key: n.key(),
        network: n.network.clone(),
        cidr: format!("/{}", n.cidr),
        gateway: n.gateway.clone(),
        build_net: scs_core::fields::yn(n.build_net).to_string(),
        default_build: scs_core::fields::yn(n.default_build).to_string(),
    }
}

fn ip_row(r: index::IndexRow) -> IpRow {
    IpRow {
        ip: r.ip.to_string(),
        reserved: scs_core::fields::yn(r.reserved).to_string(),
        dhcp: scs_core::fields::yn(r.dhcp).to_string(),
        hostname: r.hostname,
        comment: r.comment,
    }
}
