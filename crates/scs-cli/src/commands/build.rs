use anyhow::Result;
use clap::Subcommand;

use scs_core::Config;
use scs_store::entities::{Build, System, build};
use scs_store::record::Store;
use tracing::warn;

use crate::display::{BuildRow, OutputFormat, render};

#[derive(Subcommand)]
pub enum Cmd {
    /// Register a build
    Create {
        name: String,
        #[arg(long, default_value = "")]
        role: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "linux")]
        os: String,
        #[arg(long, default_value = "x86_64")]
        arch: String,
        /// Disk size in GB; inherited from the parent when omitted
        #[arg(long)]
        disk: Option<u32>,
        /// RAM in MB; inherited from the parent when omitted
        #[arg(long)]
        ram: Option<u32>,
        #[arg(long)]
        parent: Option<String>,
    },
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
        role: Option<String>,
        #[arg(long)]
        os: Option<String>,
        #[arg(long)]
        arch: Option<String>,
        #[arg(long)]
        disk: Option<u32>,
        #[arg(long)]
        ram: Option<u32>,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Print the parent chain, root first (names only with --reverse)
    Lineage {
        name: String,
        #[arg(long)]
        reverse: bool,
    },
}

pub fn run(cfg: &Config, cmd: Cmd, output: OutputFormat) -> Result<i32> {
    match cmd {
        Cmd::Create { name, role, description, os, arch, disk, ram, parent } => {
            super::start_modify(cfg)?;
            build::create(
                cfg,
                Build {
                    name: name.clone(),
                    role,
                    description: scs_core::fields::clean_description(&description),
                    os,
                    arch,
                    disk_gb: disk,
                    ram_mb: ram,
                    parent,
                },
            )?;
            println!("build '{}' created", name);
        }
        Cmd::Delete { name, yes } => {
            super::start_modify(cfg)?;
            let users = Store::<System>::new(cfg).filter(|s| s.build == name)?;
            if !users.is_empty() {
                warn!(
                    build = %name,
                    systems = users.len(),
                    "build is still referenced by systems"
                );
            }
            if !yes && !super::confirm(&format!("delete build '{}'?", name))? {
                println!("cancelled");
                return Ok(0);
            }
            Store::<Build>::new(cfg).delete(&name)?;
            println!("build '{}' deleted", name);
        }
        Cmd::List => {
            let rows: Vec<BuildRow> =
                Store::<Build>::new(cfg).list()?.into_iter().map(row).collect();
            print!("{}", render(&rows, output));
        }
        Cmd::Show { name } => {
            let rows = vec![row(Store::<Build>::new(cfg).load(&name)?)];
            print!("{}", render(&rows, output));
        }
        Cmd::Update { name, role, os, arch, disk, ram, parent } => {
            super::start_modify(cfg)?;
            let mut b = Store::<Build>::new(cfg).load(&name)?;
            if let Some(role) = role {
                b.role = role;
            }
            if let Some(os) = os {
                b.os = os;
            }
            if let Some(arch) = arch {
                b.arch = arch;
            }
            if disk.is_some() {
                b.disk_gb = disk;
            }
            if ram.is_some() {
                b.ram_mb = ram;
            }
            if parent.is_some() {
                b.parent = parent;
            }
            build::update(cfg, &name, b)?;
            println!("build '{}' updated", name);
        }
        Cmd::Lineage { name, reverse } => {
            let chain = build::lineage(cfg, &name)?;
            if reverse {
                // leaf to root, names only
                for b in chain.iter().rev() {
                    println!("{}", b.name);
                }
            } else {
                let names: Vec<&str> = chain.iter().map(|b| b.name.as_str()).collect();
                println!("{}", names.join(" -> "));
            }
        }
    }
    Ok(0)
}

fn row(b: Build) -> BuildRow {
    BuildRow {
        name: b.name,
        role: b.role,
        os: b.os,
        arch: b.arch,
        disk_gb: b.disk_gb.map(|v| v.to_string()).unwrap_or_default(),
        ram_mb: b.ram_mb.map(|v| v.to_string()).unwrap_or_default(),
        parent: b.parent.unwrap_or_default(),
    }
}
