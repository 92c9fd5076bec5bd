//! `conductor daemon`: foreground runtime and socket control.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use conductor_daemon::paths::socket_path;
use conductor_daemon::{request_status, request_stop, start_blocking, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (tick loop + socket server).
    Start(StartArgs),
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Target configuration file (default `~/.conductor/targets.yaml`).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = crate::home_dir()?;

    match command {
        DaemonCommand::Start(args) => {
            let config = crate::resolve_config(args.config)?;
            start_blocking(&home, &config).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => {
                let payload = serde_json::json!({
                    "running": status.running,
                    "started_at": status.started_at,
                    "socket": status.socket,
                    "tick_secs": status.tick_secs,
                    "targets": status.report.targets.len(),
                    "unresolved_conflicts": status.report.unresolved_conflicts().count(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let payload = serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
    }

    Ok(())
}
