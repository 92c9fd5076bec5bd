//! `conductor status`: per-target and conflict visibility from the daemon.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use conductor_core::ExecutionStatus;
use conductor_daemon::{request_status, DaemonError, DaemonStatus};
use conductor_sync::{ConflictStatus, TargetStatus};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct TargetRow {
    #[tabled(rename = "target")]
    target: String,
    #[tabled(rename = "tier")]
    tier: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "last run")]
    last_run: String,
    #[tabled(rename = "success rate")]
    success_rate: String,
    #[tabled(rename = "next due")]
    next_due: String,
    #[tabled(rename = "last error")]
    last_error: String,
}

#[derive(Tabled)]
struct ConflictRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "category")]
    category: String,
    #[tabled(rename = "record")]
    business_id: String,
    #[tabled(rename = "platforms")]
    platforms: String,
    #[tabled(rename = "severity")]
    severity: String,
    #[tabled(rename = "outcome")]
    outcome: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = crate::home_dir()?;
        let status = match request_status(&home) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                anyhow::bail!("daemon is not running; start it with `conductor daemon start`")
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_tables(&status);
        Ok(())
    }
}

fn print_tables(status: &DaemonStatus) {
    let report = &status.report;
    let unresolved = report.unresolved_conflicts().count();
    println!(
        "Conductor v{} | {} targets | {} conflicts ({} unresolved) | tick {}s",
        env!("CARGO_PKG_VERSION"),
        report.targets.len(),
        report.conflicts.len(),
        unresolved,
        status.tick_secs,
    );

    if report.targets.is_empty() {
        println!("No targets configured.");
    } else {
        let now = report.generated_at;
        let rows: Vec<TargetRow> = report.targets.iter().map(|t| target_row(t, now)).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    if !report.conflicts.is_empty() {
        let rows: Vec<ConflictRow> = report.conflicts.iter().map(conflict_row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
}

fn target_row(target: &TargetStatus, now: DateTime<Utc>) -> TargetRow {
    TargetRow {
        target: target.key.to_string(),
        tier: target.priority.to_string(),
        status: status_label(target.status),
        last_run: target
            .last_record
            .as_ref()
            .map(|record| format_age(now, record.recorded_at))
            .unwrap_or_else(|| "never".to_string()),
        success_rate: if target.metrics.total_attempts == 0 {
            "-".to_string()
        } else {
            format!("{:.0}%", target.metrics.success_rate * 100.0)
        },
        next_due: target
            .next_due
            .map(|due| format_due(now, due))
            .unwrap_or_else(|| "-".to_string()),
        last_error: match (&target.error_code, &target.last_error) {
            (Some(code), Some(error)) => format!("[{code}] {error}"),
            (None, Some(error)) => error.clone(),
            _ => String::new(),
        },
    }
}

fn conflict_row(conflict: &ConflictStatus) -> ConflictRow {
    let outcome = if conflict.resolved {
        match (&conflict.strategy, &conflict.winner) {
            (Some(strategy), Some(winner)) => format!("{strategy} → {winner}"),
            (Some(strategy), None) => strategy.to_string(),
            _ => "resolved".to_string(),
        }
    } else {
        conflict
            .unresolved_reason
            .clone()
            .unwrap_or_else(|| "pending".to_string())
    };
    ConflictRow {
        id: conflict.id.to_string(),
        category: conflict.category.to_string(),
        business_id: conflict.business_id.clone(),
        platforms: conflict
            .platforms
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        severity: conflict.severity.to_string(),
        outcome,
    }
}

fn status_label(status: ExecutionStatus) -> String {
    let label = status.to_string().to_uppercase();
    match status {
        ExecutionStatus::Success => label.green().to_string(),
        ExecutionStatus::Running => label.cyan().to_string(),
        ExecutionStatus::Failed => label.red().bold().to_string(),
        ExecutionStatus::Conflicted => label.magenta().bold().to_string(),
        ExecutionStatus::Skipped => label.yellow().to_string(),
        ExecutionStatus::Pending => label.bright_black().to_string(),
    }
}

fn format_age(now: DateTime<Utc>, at: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(at).num_seconds().max(0);
    format!("{} ago", format_secs(secs))
}

fn format_due(now: DateTime<Utc>, due: DateTime<Utc>) -> String {
    let secs = due.signed_duration_since(now).num_seconds();
    if secs <= 0 {
        "now".to_string()
    } else {
        format!("in {}", format_secs(secs))
    }
}

fn format_secs(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3_600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3_600),
        s => format!("{}d", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_use_the_largest_whole_unit() {
        assert_eq!(format_secs(42), "42s");
        assert_eq!(format_secs(125), "2m");
        assert_eq!(format_secs(7_300), "2h");
        assert_eq!(format_secs(200_000), "2d");
    }

    #[test]
    fn overdue_targets_are_due_now() {
        let now = Utc::now();
        assert_eq!(format_due(now, now - chrono::Duration::seconds(5)), "now");
        assert_eq!(format_due(now, now + chrono::Duration::seconds(90)), "in 1m");
    }
}
