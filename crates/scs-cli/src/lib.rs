//! The `scs` command surface: verb-noun dispatch over the library crates.
//! Commands stay thin; anything interesting lives in the subsystem crates.

pub mod commands;
pub mod display;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use display::OutputFormat;

#[derive(Parser)]
#[command(
    name = "scs",
    version,
    about = "Simple configuration management for servers and KVM hypervisors"
)]
pub struct Cli {
    /// Output format for list/show commands
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Manage applications
    Application {
        #[command(subcommand)]
        cmd: commands::application::Cmd,
    },
    /// Manage builds
    Build {
        #[command(subcommand)]
        cmd: commands::build::Cmd,
    },
    /// Manage constants and their scoped values
    Constant {
        #[command(subcommand)]
        cmd: commands::constant::Cmd,
    },
    /// Manage environments
    Environment {
        #[command(subcommand)]
        cmd: commands::environment::Cmd,
    },
    /// Manage files and templates
    File {
        #[command(subcommand)]
        cmd: commands::file::Cmd,
    },
    /// Manage hypervisors
    Hypervisor {
        #[command(subcommand)]
        cmd: commands::hypervisor::Cmd,
    },
    /// Manage locations
    Location {
        #[command(subcommand)]
        cmd: commands::location::Cmd,
    },
    /// Manage networks and addresses
    Network {
        #[command(subcommand)]
        cmd: commands::network::Cmd,
    },
    /// Manage resources
    Resource {
        #[command(subcommand)]
        cmd: commands::resource::Cmd,
    },
    /// Manage systems and their lifecycle
    System {
        #[command(subcommand)]
        cmd: commands::system::Cmd,
    },

    /// Raise the abort sentinel (or clear it with --disable)
    Abort {
        /// Remove the sentinel instead of creating it
        #[arg(long)]
        disable: bool,
    },
    /// Discard pending changes and release the lock
    Cancel,
    /// Commit pending changes and release the lock
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
        /// Push to the upstream tracking branch afterwards
        #[arg(long)]
        push: bool,
    },
    /// Show pending changes (optionally against a branch)
    Diff {
        target: Option<String>,
    },
    /// Print the repository path
    Dir,
    /// Acquire the repository lock
    Lock,
    /// Show recent repository history
    Log {
        #[arg(short = 'n', long, default_value_t = 25)]
        limit: usize,
    },
    /// Print the release output path
    Pdir,
    /// Repository and lock status (exit 1 when locked)
    Status,
    /// Force-release the repository lock
    Unlock,
    /// Run pending schema migrations
    Upgrade,

    #[command(name = "__phase2", hide = true)]
    Phase2Resume {
        plan: PathBuf,
    },
}

/// Parse arguments, dispatch, and return the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();

    let background = matches!(cli.command, Command::Phase2Resume { .. });
    init_logging(background);

    match commands::dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("scs: error: {}", err);
            err.downcast_ref::<scs_core::ScsError>()
                .map(|e| e.exit_code())
                .unwrap_or(1)
        }
    }
}

fn init_logging(background: bool) {
    let log_path = std::env::var("SCS_TEMP")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("scs"))
        .join("scs-background.log");
    let mode = if background {
        scs_core::logging::LogMode::Background
    } else {
        scs_core::logging::LogMode::Interactive
    };
    scs_core::logging::init(mode, &log_path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_nouns_and_verbs() {
        Cli::try_parse_from(["scs", "system", "list"]).unwrap();
        Cli::try_parse_from(["scs", "application", "create", "web", "w", "--build", "web-el7"])
            .unwrap();
        Cli::try_parse_from(["scs", "network", "ip", "assign", "10.0.0.5", "web01"]).unwrap();
        Cli::try_parse_from(["scs", "status"]).unwrap();
        Cli::try_parse_from(["scs", "abort", "--disable"]).unwrap();
        Cli::try_parse_from(["scs", "commit", "-m", "msg", "--push"]).unwrap();
    }

    #[test]
    fn test_cli_rejects_unknown_noun() {
        assert!(Cli::try_parse_from(["scs", "nonsense"]).is_err());
    }

    #[test]
    fn test_output_flag_is_global() {
        let cli =
            Cli::try_parse_from(["scs", "system", "list", "--output", "json"]).unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
    }

    #[test]
    fn test_hidden_phase2_entry() {
        Cli::try_parse_from(["scs", "__phase2", "/tmp/plan.json"]).unwrap();
    }
}
