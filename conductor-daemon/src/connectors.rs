//! Command-backed connector.
//!
//! Runs the program configured for a target once per sync. The target and
//! sync parameters are passed through the environment:
//!
//! | variable                 | value                  |
//! |--------------------------|------------------------|
//! | `CONDUCTOR_PLATFORM`     | target platform        |
//! | `CONDUCTOR_DATA_TYPE`    | target data type       |
//! | `CONDUCTOR_BATCH_SIZE`   | batch size             |
//! | `CONDUCTOR_TIMEOUT_SECS` | timeout, whole seconds |
//!
//! The program prints one JSON object on stdout:
//! `{"records_synced": 12, "records_failed": 0, "records": [...]}`; every
//! field is optional and empty output counts as `{}`. Exit status 75
//! (`EX_TEMPFAIL`) or a failure to spawn is transient; any other non-zero
//! exit or unreadable output is permanent.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use conductor_conflicts::BusinessRecord;
use conductor_core::{ConnectorConfig, TargetKey};
use conductor_sync::{Connector, ConnectorError, SyncBatch};

pub const EX_TEMPFAIL: i32 = 75;

#[derive(Debug, Default, Deserialize)]
struct ConnectorReply {
    #[serde(default)]
    records_synced: Option<u64>,
    #[serde(default)]
    records_failed: u64,
    #[serde(default)]
    records: Vec<BusinessRecord>,
}

#[derive(Debug, Clone)]
pub struct CommandConnector {
    key: TargetKey,
    config: ConnectorConfig,
}

impl CommandConnector {
    pub fn new(key: TargetKey, config: ConnectorConfig) -> Self {
        Self { key, config }
    }

    fn command(&self, batch_size: u32, timeout: Duration) -> Command {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .env("CONDUCTOR_PLATFORM", &self.key.platform.0)
            .env("CONDUCTOR_DATA_TYPE", &self.key.data_type.0)
            .env("CONDUCTOR_BATCH_SIZE", batch_size.to_string())
            .env("CONDUCTOR_TIMEOUT_SECS", timeout.as_secs().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Connector for CommandConnector {
    async fn sync(&self, batch_size: u32, timeout: Duration) -> Result<SyncBatch, ConnectorError> {
        let program = self.config.command.display().to_string();
        let output = self
            .command(batch_size, timeout)
            .output()
            .await
            .map_err(|err| ConnectorError::transient(format!("failed to run {program}: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            let message = match detail {
                "" => format!("{program} exited with {}", output.status),
                detail => format!("{program} exited with {}: {}", output.status, detail.trim()),
            };
            return Err(match output.status.code() {
                Some(EX_TEMPFAIL) => ConnectorError::Transient(message),
                _ => ConnectorError::Permanent(message),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let reply: ConnectorReply = if stdout.trim().is_empty() {
            ConnectorReply::default()
        } else {
            serde_json::from_str(stdout.trim()).map_err(|err| {
                ConnectorError::permanent(format!("{program} printed invalid output: {err}"))
            })?
        };

        tracing::debug!(
            key = %self.key,
            records = reply.records.len(),
            "connector command finished",
        );
        Ok(SyncBatch {
            records_synced: reply
                .records_synced
                .unwrap_or(reply.records.len() as u64),
            records_failed: reply.records_failed,
            records: reply.records,
        })
    }
}
