use anyhow::Result;
use clap::Subcommand;

use scs_core::Config;
use scs_store::entities::{Application, EnvFlags, FileMap, application};
use scs_store::record::Store;

use crate::display::{ApplicationRow, OutputFormat, render};

#[derive(Subcommand)]
pub enum Cmd {
    /// Register an application
    Create {
        name: String,
        alias: String,
        /// Build this application deploys on
        #[arg(long, default_value = "")]
        build: String,
        /// Instances of this application cluster
        #[arg(long)]
        cluster: bool,
    },
    /// Remove an application and everything it owns
    Delete {
        name: String,
        #[arg(long = "yes-i-am-sure")]
        yes: bool,
    },
    List,
    Show {
        name: String,
    },
    /// Change alias, build, or clustering
    Update {
        name: String,
        #[arg(long)]
        alias: Option<String>,
        #[arg(long)]
        build: Option<String>,
        #[arg(long)]
        cluster: Option<bool>,
    },
    /// Map a file to this application
    FileAdd {
        name: String,
        file: String,
        /// Environment flags: all, none, all-envA-envB, none+envA+envB
        #[arg(long, default_value = "all")]
        environments: String,
    },
    /// Unmap a file from this application
    FileRemove {
        name: String,
        file: String,
    },
    /// List the files mapped to this application
    FileList {
        name: String,
    },
    /// Assign this application to an environment at a location
    Bind {
        name: String,
        location: String,
        environment: String,
    },
    /// Remove a location/environment assignment
    Unbind {
        name: String,
        location: String,
        environment: String,
    },
}

pub fn run(cfg: &Config, cmd: Cmd, output: OutputFormat) -> Result<i32> {
    match cmd {
        Cmd::Create { name, alias, build, cluster } => {
            super::start_modify(cfg)?;
            application::create(cfg, Application { name: name.clone(), alias, build, cluster })?;
            println!("application '{}' created", name);
        }
        Cmd::Delete { name, yes } => {
            super::start_modify(cfg)?;
            if !yes && !super::confirm(&format!("delete application '{}' and its file maps and values?", name))? {
                println!("cancelled");
                return Ok(0);
            }
            application::delete(cfg, &name)?;
            println!("application '{}' deleted", name);
        }
        Cmd::List => {
            let rows: Vec<ApplicationRow> = Store::<Application>::new(cfg)
                .list()?
                .into_iter()
                .map(|a| ApplicationRow {
                    name: a.name,
                    alias: a.alias,
                    build: a.build,
                    cluster: scs_core::fields::yn(a.cluster).to_string(),
                })
                .collect();
            print!("{}", render(&rows, output));
        }
        Cmd::Show { name } => {
            let a = Store::<Application>::new(cfg).load(&name)?;
            let rows = vec![ApplicationRow {
                name: a.name,
                alias: a.alias,
                build: a.build,
                cluster: scs_core::fields::yn(a.cluster).to_string(),
            }];
            print!("{}", render(&rows, output));
        }
        Cmd::Update { name, alias, build, cluster } => {
            super::start_modify(cfg)?;
            let mut app = Store::<Application>::new(cfg).load(&name)?;
            if let Some(alias) = alias {
                app.alias = alias;
            }
            if let Some(build) = build {
                app.build = build;
            }
            if let Some(cluster) = cluster {
                app.cluster = cluster;
            }
            application::update(cfg, &name, app)?;
            println!("application '{}' updated", name);
        }
        Cmd::FileAdd { name, file, environments } => {
            super::start_modify(cfg)?;
            Store::<Application>::new(cfg).load(&name)?;
            Store::<scs_store::entities::FileDef>::new(cfg).load(&file)?;
            Store::<FileMap>::new(cfg).create(FileMap {
                file: file.clone(),
                application: name.clone(),
                flags: EnvFlags::parse(&environments)?,
            })?;
            println!("file '{}' mapped to application '{}'", file, name);
        }
        Cmd::FileRemove { name, file } => {
            super::start_modify(cfg)?;
            Store::<FileMap>::new(cfg).delete(&FileMap::composite_key(&file, &name))?;
            println!("file '{}' unmapped from application '{}'", file, name);
        }
        Cmd::FileList { name } => {
            Store::<Application>::new(cfg).load(&name)?;
            for map in Store::<FileMap>::new(cfg).filter(|m| m.application == name)? {
                println!("{} {}", map.file, map.flags.as_str());
            }
        }
        Cmd::Bind { name, location, environment } => {
            super::start_modify(cfg)?;
            Store::<Application>::new(cfg).load(&name)?;
            Store::<scs_store::entities::Location>::new(cfg).load(&location)?;
            Store::<scs_store::entities::Environment>::new(cfg).load(&environment)?;
            scs_store::values::bind_application(cfg, &location, &environment, &name)?;
            println!("application '{}' assigned to {}/{}", name, location, environment);
        }
        Cmd::Unbind { name, location, environment } => {
            super::start_modify(cfg)?;
            scs_store::values::unbind_application(cfg, &location, &environment, &name)?;
            println!("application '{}' unassigned from {}/{}", name, location, environment);
        }
    }
    Ok(0)
}
