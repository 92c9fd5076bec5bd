//! Dependency graph eligibility.
//!
//! [`is_eligible`] is a pure predicate over the registry and the execution
//! history. A target is eligible when it is due (never run, or its interval
//! has elapsed since its last execution) and every prerequisite's last
//! execution succeeded within `staleness_factor × prerequisite.interval`.
//!
//! Precedence: `NotDue` is reported before any dependency gap, so a target that
//! is not due never produces a skip.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::registry::TargetRegistry;
use crate::types::{ExecutionRecord, ExecutionStatus, SyncTarget, TargetKey};

/// Default multiplier applied to a prerequisite's interval to judge freshness.
pub const DEFAULT_STALENESS_FACTOR: f64 = 2.0;

/// Read access to the most recent *execution* of each target.
///
/// Dependency skips are not executions and must not be returned here.
pub trait ExecutionHistory {
    fn last_execution(&self, key: &TargetKey) -> Option<&ExecutionRecord>;
}

impl ExecutionHistory for HashMap<TargetKey, ExecutionRecord> {
    fn last_execution(&self, key: &TargetKey) -> Option<&ExecutionRecord> {
        self.get(key)
    }
}

/// Tunables for [`is_eligible`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EligibilityPolicy {
    pub staleness_factor: f64,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            staleness_factor: DEFAULT_STALENESS_FACTOR,
        }
    }
}

impl EligibilityPolicy {
    /// Maximum age of a prerequisite's success for `interval`.
    pub fn freshness_window(&self, interval: Duration) -> chrono::Duration {
        // Saturates instead of panicking when the product leaves `Duration` range.
        Duration::try_from_secs_f64(interval.as_secs_f64() * self.staleness_factor.max(0.0))
            .ok()
            .and_then(|window| chrono::Duration::from_std(window).ok())
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Why a prerequisite does not satisfy its dependent.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyGap {
    NeverRun,
    LastRunNotSuccessful(ExecutionStatus),
    Stale { age_secs: i64, window_secs: i64 },
}

impl std::fmt::Display for DependencyGap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyGap::NeverRun => write!(f, "has never run"),
            DependencyGap::LastRunNotSuccessful(status) => write!(f, "last run was {status}"),
            DependencyGap::Stale {
                age_secs,
                window_secs,
            } => write!(f, "last success {age_secs}s ago exceeds {window_secs}s window"),
        }
    }
}

/// Result of the eligibility predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Eligible,
    NotDue { next_due: DateTime<Utc> },
    DependencyNotMet { dependency: TargetKey, gap: DependencyGap },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// Decide whether `target` may run at `now`.
pub fn is_eligible(
    target: &SyncTarget,
    now: DateTime<Utc>,
    registry: &TargetRegistry,
    history: &impl ExecutionHistory,
    policy: &EligibilityPolicy,
) -> Eligibility {
    if let Some(last) = history.last_execution(&target.key) {
        let interval = chrono::Duration::from_std(target.interval).unwrap_or(chrono::Duration::MAX);
        let next_due = last
            .recorded_at
            .checked_add_signed(interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if now < next_due {
            return Eligibility::NotDue { next_due };
        }
    }

    for dependency in registry.dependencies(&target.key) {
        if let Some(gap) = dependency_gap(dependency, now, history, policy) {
            return Eligibility::DependencyNotMet {
                dependency: dependency.key.clone(),
                gap,
            };
        }
    }

    Eligibility::Eligible
}

fn dependency_gap(
    dependency: &SyncTarget,
    now: DateTime<Utc>,
    history: &impl ExecutionHistory,
    policy: &EligibilityPolicy,
) -> Option<DependencyGap> {
    let Some(last) = history.last_execution(&dependency.key) else {
        return Some(DependencyGap::NeverRun);
    };
    if last.status != ExecutionStatus::Success {
        return Some(DependencyGap::LastRunNotSuccessful(last.status));
    }
    let age = now.signed_duration_since(last.recorded_at);
    let window = policy.freshness_window(dependency.interval);
    if age > window {
        return Some(DependencyGap::Stale {
            age_secs: age.num_seconds(),
            window_secs: window.num_seconds(),
        });
    }
    None
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
