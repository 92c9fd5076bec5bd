//! Domain types for the Conductor sync engine.
//!
//! Durations are `std::time::Duration`; wall-clock instants are `DateTime<Utc>`.
//! Everything that crosses the daemon socket is serializable via serde.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for an external platform (e.g. `hubspot`, `gong`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Platform(pub String);

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Platform {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Platform {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed name for a data type synced from a platform (e.g. `deals`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataType(pub String);

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DataType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DataType {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity of a sync target: one `(platform, data_type)` pair.
///
/// Renders and parses as `platform/data_type`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    pub platform: Platform,
    pub data_type: DataType,
}

impl TargetKey {
    pub fn new(platform: impl Into<Platform>, data_type: impl Into<DataType>) -> Self {
        Self {
            platform: platform.into(),
            data_type: data_type.into(),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform, self.data_type)
    }
}

impl FromStr for TargetKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTargetKey {
            value: s.to_string(),
        };
        let (platform, data_type) = s.split_once('/').ok_or_else(invalid)?;
        let (platform, data_type) = (platform.trim(), data_type.trim());
        if platform.is_empty() || data_type.is_empty() || data_type.contains('/') {
            return Err(invalid());
        }
        Ok(Self::new(platform, data_type))
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Scheduling priority class. Declaration order is dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    RealTime,
    High,
    Medium,
    Low,
}

impl PriorityTier {
    /// All tiers in strict dispatch order.
    pub const ALL: [PriorityTier; 4] = [
        PriorityTier::RealTime,
        PriorityTier::High,
        PriorityTier::Medium,
        PriorityTier::Low,
    ];

    /// Whether dispatch for this tier goes through a bounded worker pool.
    pub fn is_pooled(self) -> bool {
        matches!(self, PriorityTier::Medium | PriorityTier::Low)
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityTier::RealTime => write!(f, "real_time"),
            PriorityTier::High => write!(f, "high"),
            PriorityTier::Medium => write!(f, "medium"),
            PriorityTier::Low => write!(f, "low"),
        }
    }
}

/// Outcome status of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Conflicted,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Skipped => write!(f, "skipped"),
            ExecutionStatus::Conflicted => write!(f, "conflicted"),
        }
    }
}

/// What caused an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
}

/// Machine-readable failure class attached to non-successful records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The connector returned an error.
    Connector,
    /// The coordinator abandoned the call after the target's timeout.
    Timeout,
    /// The connector task panicked.
    Panicked,
    /// A prerequisite target was missing, failed, or stale.
    Dependency,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Connector => write!(f, "connector"),
            ErrorCode::Timeout => write!(f, "timeout"),
            ErrorCode::Panicked => write!(f, "panicked"),
            ErrorCode::Dependency => write!(f, "dependency"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A validated, immutable sync target definition.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncTarget {
    pub key: TargetKey,
    pub priority: PriorityTier,
    /// Minimum time between two executions.
    pub interval: Duration,
    pub batch_size: u32,
    /// Extra attempts allowed for transient connector errors.
    pub retry_budget: u32,
    /// Enforced by the coordinator, not the connector.
    pub timeout: Duration,
    /// Prerequisite targets; order is preserved from configuration.
    pub depends_on: Vec<TargetKey>,
    pub conflict_resolution: bool,
}

/// The result of one execution attempt (or a dependency skip) for a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub target: TargetKey,
    pub status: ExecutionStatus,
    pub records_synced: u64,
    pub records_failed: u64,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    /// When the record landed; due-time and freshness are measured from here.
    pub recorded_at: DateTime<Utc>,
    /// 1-based attempt number within one execution (retries increment it).
    pub attempt: u32,
    pub trigger: Trigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

/// Cumulative per-target counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TargetMetrics {
    pub total_attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_records: u64,
    /// Always `successes / (successes + failures)`; `0.0` before the first attempt.
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
}

impl TargetMetrics {
    pub fn record_success(&mut self, records: u64, at: DateTime<Utc>) {
        self.total_attempts += 1;
        self.successes += 1;
        self.total_records += records;
        self.last_success_at = Some(at);
        self.recompute_rate();
    }

    pub fn record_failure(&mut self) {
        self.total_attempts += 1;
        self.failures += 1;
        self.recompute_rate();
    }

    fn recompute_rate(&mut self) {
        let total = self.successes + self.failures;
        self.success_rate = if total == 0 {
            0.0
        } else {
            self.successes as f64 / total as f64
        };
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
