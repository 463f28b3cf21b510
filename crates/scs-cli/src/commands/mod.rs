//! Command implementations. Each noun gets a module with its subcommand
//! enum and a `run` function; global verbs are handled in [`dispatch`].

pub mod application;
pub mod build;
pub mod constant;
pub mod environment;
pub mod file;
pub mod hypervisor;
pub mod location;
pub mod network;
pub mod resource;
pub mod system;

use anyhow::{Context, Result};
use colored::Colorize;
use scs_core::Config;
use scs_store::{lock, schema, vcs::Git};

use crate::{Cli, Command};

/// Route a parsed invocation to its implementation. Returns the process
/// exit code.
pub fn dispatch(cli: Cli) -> Result<i32> {
    let cfg = Config::from_env()?;

    // the schema gate runs before anything touches the store
    match &cli.command {
        Command::Upgrade => {
            schema::upgrade(&cfg)?;
            println!("repository schema is {}", schema::SCHEMA_VERSION);
            return Ok(0);
        }
        _ => schema::check(&cfg, false)?,
    }

    let output = cli.output;
    match cli.command {
        Command::Application { cmd } => application::run(&cfg, cmd, output),
        Command::Build { cmd } => build::run(&cfg, cmd, output),
        Command::Constant { cmd } => constant::run(&cfg, cmd, output),
        Command::Environment { cmd } => environment::run(&cfg, cmd, output),
        Command::File { cmd } => file::run(&cfg, cmd, output),
        Command::Hypervisor { cmd } => hypervisor::run(&cfg, cmd, output),
        Command::Location { cmd } => location::run(&cfg, cmd, output),
        Command::Network { cmd } => network::run(&cfg, cmd, output),
        Command::Resource { cmd } => resource::run(&cfg, cmd, output),
        Command::System { cmd } => system::run(&cfg, cmd, output),

        Command::Abort { disable } => {
            if disable {
                scs_provision::abort::disable(&cfg)?;
                println!("abort sentinel cleared");
            } else {
                scs_provision::abort::enable(&cfg)?;
                println!("abort sentinel raised; background tasks will stop");
            }
            Ok(0)
        }
        Command::Cancel => {
            lock::cancel_modify(&cfg).context("cancel failed")?;
            println!("pending changes discarded; lock released");
            Ok(0)
        }
        Command::Commit { message, push } => {
            lock::stop_modify(&cfg, message.as_deref(), push).context("commit failed")?;
            println!("changes committed; lock released");
            Ok(0)
        }
        Command::Diff { target } => {
            let git = Git::new(&cfg.repo);
            if git.available() {
                print!("{}", git.diff(target.as_deref())?);
            }
            Ok(0)
        }
        Command::Dir => {
            println!("{}", cfg.repo.display());
            Ok(0)
        }
        Command::Lock => {
            lock::start_modify(&cfg)?;
            println!("lock acquired by {}", cfg.user);
            Ok(0)
        }
        Command::Log { limit } => {
            let git = Git::new(&cfg.repo);
            if git.available() {
                print!("{}", git.log(limit)?);
            }
            Ok(0)
        }
        Command::Pdir => {
            println!("{}", cfg.releases.display());
            Ok(0)
        }
        Command::Status => {
            let git = Git::new(&cfg.repo);
            if git.available() {
                print!("{}", git.status()?);
            }
            match lock::owner(&cfg)? {
                Some(user) => {
                    println!("{}", format!("locked by {}", user).yellow());
                    Ok(1)
                }
                None => {
                    println!("{}", "unlocked".green());
                    Ok(0)
                }
            }
        }
        Command::Unlock => {
            lock::force_unlock(&cfg)?;
            println!("lock released");
            Ok(0)
        }
        Command::Upgrade => unreachable!("handled above"),

        Command::Phase2Resume { plan } => {
            let plan = scs_provision::phase1::load_plan(&plan)?;
            let connector = scs_remote::SshConnector::from_config(&cfg);
            scs_provision::run_phase2(
                &cfg,
                &connector,
                &plan,
                &scs_provision::Phase2Opts::default(),
            )?;
            Ok(0)
        }
    }
}

/// Every mutating verb goes through here first.
pub(crate) fn start_modify(cfg: &Config) -> Result<()> {
    scs_provision::abort::warn_if_set(cfg);
    lock::start_modify(cfg)?;
    Ok(())
}

/// Interactive yes/no gate for destructive verbs.
pub(crate) fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{} [y/N] ", prompt);
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
