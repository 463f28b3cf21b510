use anyhow::Result;
use clap::Subcommand;

use scs_core::Config;
use scs_store::entities::{Resource, ResourceAssign, ResourceKind};
use scs_store::record::Store;

use crate::display::{OutputFormat, ResourceRow, render};

#[derive(Subcommand)]
pub enum Cmd {
    /// Register a resource (ip, cluster_ip, or ha_ip)
    Create {
        /// ip, cluster_ip, or ha_ip
        kind: String,
        /// The asset, an IP address
        value: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Delete {
        value: String,
    },
    List,
    Show {
        value: String,
    },
    /// Assign a resource to a system or to an application in an
    /// environment at a location
    Assign {
        value: String,
        /// Assign to this system
        #[arg(long, conflicts_with_all = ["location", "environment", "application"])]
        host: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        environment: Option<String>,
        #[arg(long)]
        application: Option<String>,
    },
    /// Return a resource to the pool
    Unassign {
        value: String,
    },
}

pub fn run(cfg: &Config, cmd: Cmd, output: OutputFormat) -> Result<i32> {
    let store = Store::<Resource>::new(cfg);
    match cmd {
        Cmd::Create { kind, value, name, description } => {
            super::start_modify(cfg)?;
            store.create(Resource {
                kind: ResourceKind::parse(&kind)?,
                value: value.clone(),
                assign: ResourceAssign::Unassigned,
                name,
                description: scs_core::fields::clean_description(&description),
            })?;
            println!("resource {} created", value);
        }
        Cmd::Delete { value } => {
            super::start_modify(cfg)?;
            store.delete(&value)?;
            println!("resource {} deleted", value);
        }
        Cmd::List => {
            let rows: Vec<ResourceRow> = store.list()?.into_iter().map(row).collect();
            print!("{}", render(&rows, output));
        }
        Cmd::Show { value } => {
            let rows = vec![row(store.load(&value)?)];
            print!("{}", render(&rows, output));
        }
        Cmd::Assign { value, host, location, environment, application } => {
            super::start_modify(cfg)?;
            let mut res = store.load(&value)?;
            res.assign = match (host, location, environment, application) {
                (Some(system), None, None, None) => {
                    Store::<scs_store::entities::System>::new(cfg).load(&system)?;
                    ResourceAssign::Host(system)
                }
                (None, Some(location), Some(environment), Some(application)) => {
                    ResourceAssign::Application { location, environment, application }
                }
                _ => anyhow::bail!(
                    "assign requires --host, or --location with --environment and --application"
                ),
            };
            store.update(&value, res)?;
            println!("resource {} assigned", value);
        }
        Cmd::Unassign { value } => {
            super::start_modify(cfg)?;
            let mut res = store.load(&value)?;
            res.assign = ResourceAssign::Unassigned;
            store.update(&value, res)?;
            println!("resource {} unassigned", value);
        }
    }
    Ok(0)
}

fn row(r: Resource) -> ResourceRow {
    let assigned = match &r.assign {
        ResourceAssign::Unassigned => "not assigned".to_string(),
        ResourceAssign::Host(system) => system.clone(),
        ResourceAssign::Application { location, environment, application } => {
            format!("{}:{}:{}", location, environment, application)
        }
    };
    ResourceRow {
        kind: r.kind.as_str().to_string(),
        value: r.value,
        assigned,
        name: r.name,
    }
}
