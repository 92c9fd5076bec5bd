//! Conductor: cross-platform sync orchestration CLI.
//!
//! # Usage
//!
//! ```text
//! conductor validate [--config <path>]
//! conductor targets [--json] [--config <path>]
//! conductor status [--json]
//! conductor sync <platform/data_type>
//! conductor daemon start|stop|status [--config <path>]
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, status::StatusArgs, sync::SyncArgs, targets::TargetsArgs,
    validate::ValidateArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "conductor",
    version,
    about = "Schedule and coordinate data syncs across business platforms",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the target configuration without starting anything.
    Validate(ValidateArgs),

    /// List configured targets in dispatch order.
    Targets(TargetsArgs),

    /// Show per-target and conflict status from the running daemon.
    Status(StatusArgs),

    /// Force one target to sync now through the running daemon.
    Sync(SyncArgs),

    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// `--config` when given, otherwise `~/.conductor/targets.yaml`.
pub(crate) fn resolve_config(config: Option<PathBuf>) -> Result<PathBuf> {
    match config {
        Some(path) => Ok(path),
        None => Ok(conductor_daemon::paths::config_path(&home_dir()?)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate(args) => args.run(),
        Commands::Targets(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
