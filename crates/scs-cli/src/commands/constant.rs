use anyhow::Result;
use clap::{Args, Subcommand};

use scs_core::Config;
use scs_store::entities::Constant;
use scs_store::record::Store;
use scs_store::values::{self, Scope};

use crate::display::{ConstantRow, OutputFormat, render};

/// Scope selector shared by define/undefine/show.
#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    /// Per-environment value
    #[arg(long)]
    pub environment: Option<String>,
    /// Per-application value (with --environment: application in that
    /// environment)
    #[arg(long)]
    pub application: Option<String>,
    /// Per-location value; requires --environment
    #[arg(long)]
    pub location: Option<String>,
}

impl ScopeArgs {
    fn to_scope(&self) -> Result<Scope> {
        match (&self.environment, &self.application, &self.location) {
            (None, None, None) => Ok(Scope::Global),
            (None, Some(app), None) => Ok(Scope::Application(app.clone())),
            (Some(env), None, None) => Ok(Scope::Environment(env.clone())),
            (Some(env), None, Some(loc)) => Ok(Scope::EnvLocation(env.clone(), loc.clone())),
            (Some(env), Some(app), None) => Ok(Scope::EnvApplication(env.clone(), app.clone())),
            _ => anyhow::bail!("--location requires --environment and excludes --application"),
        }
    }
}

#[derive(Subcommand)]
pub enum Cmd {
    /// Register a constant name
    Create {
        name: String,
        #[arg(default_value = "")]
        description: String,
    },
    /// Remove a constant from the registry
    Delete {
        name: String,
    },
    List,
    Show {
        name: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Set a constant's value at a scope
    Define {
        name: String,
        value: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Remove a constant's value at a scope
    Undefine {
        name: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

pub fn run(cfg: &Config, cmd: Cmd, output: OutputFormat) -> Result<i32> {
    match cmd {
        Cmd::Create { name, description } => {
            super::start_modify(cfg)?;
            Store::<Constant>::new(cfg).create(Constant::new(&name, &description))?;
            println!("constant '{}' created", name.to_lowercase());
        }
        Cmd::Delete { name } => {
            super::start_modify(cfg)?;
            Store::<Constant>::new(cfg).delete(&name.to_lowercase())?;
            println!("constant '{}' deleted", name.to_lowercase());
        }
        Cmd::List => {
            let rows: Vec<ConstantRow> = Store::<Constant>::new(cfg)
                .list()?
                .into_iter()
                .map(|c| ConstantRow {
                    name: c.name,
                    description: c.description,
                })
                .collect();
            print!("{}", render(&rows, output));
        }
        Cmd::Show { name, scope } => {
            let scope = scope.to_scope()?;
            match values::get(cfg, &scope, &name)? {
                Some(value) => println!("{}", value),
                None => anyhow::bail!(
                    "constant '{}' is not defined at scope {}",
                    name.to_lowercase(),
                    scope
                ),
            }
        }
        Cmd::Define { name, value, scope } => {
            super::start_modify(cfg)?;
            let scope = scope.to_scope()?;
            values::set(cfg, &scope, &name, &value)?;
            println!("{} = {} ({})", name.to_lowercase(), value, scope);
        }
        Cmd::Undefine { name, scope } => {
            super::start_modify(cfg)?;
            let scope = scope.to_scope()?;
            values::unset(cfg, &scope, &name)?;
            println!("{} undefined ({})", name.to_lowercase(), scope);
        }
    }
    Ok(0)
}
