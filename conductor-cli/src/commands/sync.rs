//! `conductor sync`: force one target through the running daemon.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use conductor_core::{ExecutionStatus, TargetKey};
use conductor_daemon::{request_sync, DaemonError};

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Target to sync, as `platform/data_type`.
    pub target: TargetKey,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = crate::home_dir()?;
        let reply = match request_sync(&home, &self.target) {
            Ok(reply) => reply,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                anyhow::bail!("daemon is not running; start it with `conductor daemon start`")
            }
            Err(err) => {
                return Err(err).with_context(|| format!("sync failed for '{}'", self.target))
            }
        };

        let record = &reply.record;
        let retries = match reply.attempts {
            1 => String::new(),
            n => format!(" after {n} attempts"),
        };
        match record.status {
            ExecutionStatus::Success => println!(
                "{} '{}' synced {} records in {}ms{retries}",
                "✓".green().bold(),
                self.target,
                record.records_synced,
                record.duration_ms,
            ),
            status => {
                println!(
                    "{} '{}' {status}{retries}: {}",
                    "✗".red().bold(),
                    self.target,
                    record.error.as_deref().unwrap_or("no error recorded"),
                );
                anyhow::bail!("sync of '{}' did not succeed", self.target);
            }
        }
        Ok(())
    }
}
