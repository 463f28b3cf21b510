use anyhow::Result;
use clap::Subcommand;

use scs_core::Config;
use scs_store::entities::{Environment, environment};
use scs_store::record::Store;

use crate::display::{EnvironmentRow, OutputFormat, render};

#[derive(Subcommand)]
pub enum Cmd {
    /// Register an environment
    Create {
        name: String,
        /// Single upper-case letter, unique
        alias: String,
        #[arg(default_value = "")]
        description: String,
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
        alias: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
}

pub fn run(cfg: &Config, cmd: Cmd, output: OutputFormat) -> Result<i32> {
    match cmd {
        Cmd::Create { name, alias, description } => {
            super::start_modify(cfg)?;
            environment::create(
                cfg,
                Environment {
                    name: name.clone(),
                    alias,
                    description: scs_core::fields::clean_description(&description),
                },
            )?;
            println!("environment '{}' created", name);
        }
        Cmd::Delete { name } => {
            super::start_modify(cfg)?;
            Store::<Environment>::new(cfg).delete(&name)?;
            println!("environment '{}' deleted", name);
        }
        Cmd::List => {
            let rows: Vec<EnvironmentRow> = Store::<Environment>::new(cfg)
                .list()?
                .into_iter()
                .map(row)
                .collect();
            print!("{}", render(&rows, output));
        }
        Cmd::Show { name } => {
            let rows = vec![row(Store::<Environment>::new(cfg).load(&name)?)];
            print!("{}", render(&rows, output));
        }
        Cmd::Update { name, alias, description } => {
            super::start_modify(cfg)?;
            let mut env = Store::<Environment>::new(cfg).load(&name)?;
            if let Some(alias) = alias {
                env.alias = alias;
            }
            if let Some(description) = description {
                env.description = scs_core::fields::clean_description(&description);
            }
            environment::update(cfg, &name, env)?;
            println!("environment '{}' updated", name);
        }
    }
    Ok(0)
}

fn row(e: Environment) -> EnvironmentRow {
    EnvironmentRow {
        name: e.name,
        alias: e.alias,
        description: e.description,
    }
}
