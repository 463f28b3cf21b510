use anyhow::Result;
use clap::Subcommand;

use scs_core::Config;
use scs_store::entities::{FileDef, FileKind, file};
use scs_store::record::Store;

use crate::display::{FileRow, OutputFormat, render};

#[derive(Subcommand)]
pub enum Cmd {
    /// Register a managed file
    Create {
        name: String,
        /// Path on the target system
        path: String,
        /// file, directory, symlink, binary, copy, delete, or download
        #[arg(long = "type", default_value = "file")]
        kind: String,
        #[arg(long, default_value = "root")]
        owner: String,
        #[arg(long, default_value = "root")]
        group: String,
        #[arg(long, default_value = "0644")]
        mode: String,
        /// Link target, copy source, or download URL
        #[arg(long, default_value = "")]
        target: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Remove a file, its template, patches, and file maps
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
        path: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        target: Option<String>,
    },
    /// Render a file for a system (through patches and templates)
    Cat {
        name: String,
        #[arg(long)]
        system: String,
        /// Report missing variables instead of failing
        #[arg(long)]
        verbose: bool,
        /// Ignore missing variables silently
        #[arg(long)]
        silent: bool,
    },
}

pub fn run(cfg: &Config, cmd: Cmd, output: OutputFormat) -> Result<i32> {
    match cmd {
        Cmd::Create { name, path, kind, owner, group, mode, target, description } => {
            super::start_modify(cfg)?;
            Store::<FileDef>::new(cfg).create(FileDef {
                name: name.clone(),
                path: path.trim_start_matches('/').to_string(),
                kind: FileKind::parse(&kind)?,
                owner,
                group,
                octal: mode,
                target,
                description: scs_core::fields::clean_description(&description),
            })?;
            println!("file '{}' created", name);
        }
        Cmd::Delete { name, yes } => {
            super::start_modify(cfg)?;
            if !yes
                && !super::confirm(&format!(
                    "delete file '{}', its template, patches, and maps?",
                    name
                ))?
            {
                println!("cancelled");
                return Ok(0);
            }
            file::delete(cfg, &name)?;
            println!("file '{}' deleted", name);
        }
        Cmd::List => {
            let rows: Vec<FileRow> =
                Store::<FileDef>::new(cfg).list()?.into_iter().map(row).collect();
            print!("{}", render(&rows, output));
        }
        Cmd::Show { name } => {
            let rows = vec![row(Store::<FileDef>::new(cfg).load(&name)?)];
            print!("{}", render(&rows, output));
        }
        Cmd::Update { name, path, owner, group, mode, target } => {
            super::start_modify(cfg)?;
            let mut def = Store::<FileDef>::new(cfg).load(&name)?;
            if let Some(path) = path {
                def.path = path.trim_start_matches('/').to_string();
            }
            if let Some(owner) = owner {
                def.owner = owner;
            }
            if let Some(group) = group {
                def.group = group;
            }
            if let Some(mode) = mode {
                def.octal = mode;
            }
            if let Some(target) = target {
                def.target = target;
            }
            Store::<FileDef>::new(cfg).update(&name, def)?;
            println!("file '{}' updated", name);
        }
        Cmd::Cat { name, system, verbose, silent } => {
            let policy = if silent {
                scs_release::MissingPolicy::Silent
            } else if verbose {
                scs_release::MissingPolicy::Verbose
            } else {
                scs_release::MissingPolicy::Strict
            };
            let (text, missing) = scs_release::compiler::render_file(cfg, &name, &system, policy)?;
            if verbose {
                for name in &missing {
                    eprintln!("undefined variable: {}", name);
                }
            }
            print!("{}", text);
        }
    }
    Ok(0)
}

fn row(f: FileDef) -> FileRow {
    FileRow {
        name: f.name,
        path: f.path,
        kind: f.kind.as_str().to_string(),
        owner: format!("{}:{}", f.owner, f.group),
        octal: f.octal,
    }
}
