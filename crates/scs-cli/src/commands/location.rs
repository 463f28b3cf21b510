use anyhow::Result;
use clap::Subcommand;

use scs_core::Config;
use scs_store::entities::Location;
use scs_store::record::Store;

use crate::display::{LocationRow, OutputFormat, render};

#[derive(Subcommand)]
pub enum Cmd {
    /// Register a location (3-character code)
    Create {
        code: String,
        name: String,
        #[arg(default_value = "")]
        description: String,
    },
    Delete {
        code: String,
    },
    List,
    Show {
        code: String,
    },
    Update {
        code: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
}

pub fn run(cfg: &Config, cmd: Cmd, output: OutputFormat) -> Result<i32> {
    match cmd {
        Cmd::Create { code, name, description } => {
            super::start_modify(cfg)?;
            Store::<Location>::new(cfg).create(Location {
                code: code.clone(),
                name,
                description: scs_core::fields::clean_description(&description),
            })?;
            println!("location '{}' created", code);
        }
        Cmd::Delete { code } => {
            super::start_modify(cfg)?;
            Store::<Location>::new(cfg).delete(&code)?;
            println!("location '{}' deleted", code);
        }
        Cmd::List => {
            let rows: Vec<LocationRow> = Store::<Location>::new(cfg)
                .list()?
                .into_iter()
                .map(|l| LocationRow {
                    code: l.code,
                    name: l.name,
                    description: l.description,
                })
                .collect();
            print!("{}", render(&rows, output));
        }
        Cmd::Show { code } => {
            let l = Store::<Location>::new(cfg).load(&code)?;
            let rows = vec![LocationRow {
                code: l.code,
                name: l.name,
                description: l.description,
            }];
            print!("{}", render(&rows, output));
        }
        Cmd::Update { code, name, description } => {
            super::start_modify(cfg)?;
            let mut loc = Store::<Location>::new(cfg).load(&code)?;
            if let Some(name) = name {
                loc.name = name;
            }
            if let Some(description) = description {
                loc.description = scs_core::fields::clean_description(&description);
            }
            Store::<Location>::new(cfg).update(&code, loc)?;
            println!("location '{}' updated", code);
        }
    }
    Ok(0)
}
