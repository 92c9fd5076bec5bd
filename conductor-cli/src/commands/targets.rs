//! `conductor targets`: configured targets in dispatch order.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use conductor_core::{config, PriorityTier, SyncTarget};

#[derive(Args, Debug)]
pub struct TargetsArgs {
    /// Target configuration file (default `~/.conductor/targets.yaml`).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct TargetJson {
    key: String,
    priority: PriorityTier,
    interval_secs: u64,
    batch_size: u32,
    retry_budget: u32,
    timeout_secs: u64,
    depends_on: Vec<String>,
    conflict_resolution: bool,
}

#[derive(Tabled)]
struct TargetRow {
    #[tabled(rename = "target")]
    target: String,
    #[tabled(rename = "tier")]
    tier: String,
    #[tabled(rename = "every")]
    every: String,
    #[tabled(rename = "retries")]
    retries: u32,
    #[tabled(rename = "timeout")]
    timeout: String,
    #[tabled(rename = "depends on")]
    depends_on: String,
}

impl TargetsArgs {
    pub fn run(self) -> Result<()> {
        let path = crate::resolve_config(self.config)?;
        let registry = config::load_from(&path)
            .and_then(|config| config.build_registry())
            .with_context(|| format!("invalid configuration in {}", path.display()))?;

        // Tier order, registry order within a tier.
        let ordered: Vec<&SyncTarget> = PriorityTier::ALL
            .iter()
            .flat_map(|tier| registry.targets_by_tier(*tier))
            .collect();

        if self.json {
            let payload: Vec<TargetJson> = ordered
                .into_iter()
                .map(|target| TargetJson {
                    key: target.key.to_string(),
                    priority: target.priority,
                    interval_secs: target.interval.as_secs(),
                    batch_size: target.batch_size,
                    retry_budget: target.retry_budget,
                    timeout_secs: target.timeout.as_secs(),
                    depends_on: target.depends_on.iter().map(ToString::to_string).collect(),
                    conflict_resolution: target.conflict_resolution,
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize targets")?
            );
            return Ok(());
        }

        if ordered.is_empty() {
            println!("No targets configured in {}.", path.display());
            return Ok(());
        }

        let rows: Vec<TargetRow> = ordered
            .into_iter()
            .map(|target| TargetRow {
                target: target.key.to_string(),
                tier: target.priority.to_string(),
                every: format!("{}s", target.interval.as_secs()),
                retries: target.retry_budget,
                timeout: format!("{}s", target.timeout.as_secs()),
                depends_on: target
                    .depends_on
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
