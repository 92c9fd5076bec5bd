//! `conductor validate`: load and check the target configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use conductor_core::config;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Target configuration file (default `~/.conductor/targets.yaml`).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ValidateArgs {
    pub fn run(self) -> Result<()> {
        let path = crate::resolve_config(self.config)?;
        let config = config::load_from(&path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        let orchestrator = conductor_daemon::build_orchestrator(&config)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;

        let registry = orchestrator.registry();
        let with_deps = registry
            .targets()
            .iter()
            .filter(|target| !target.depends_on.is_empty())
            .count();
        println!(
            "{} {} ({} targets, {} with dependencies, tick every {}s)",
            "✓".green().bold(),
            path.display(),
            registry.len(),
            with_deps,
            orchestrator.tick_period().as_secs(),
        );
        Ok(())
    }
}
