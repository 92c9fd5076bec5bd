//! Execution Coordinator: per-target locking, retries and timeouts.
//!
//! Every target has one exclusive async lock, created on first use and never
//! removed. An execution holds it across all of its attempts, so records for
//! one target never overlap in time. A second caller (for example a manual
//! force-sync racing the scheduler) queues on the lock and runs afterwards.
//!
//! The connector call runs in its own task. When the target's timeout fires
//! the coordinator records a `timeout` failure and releases the lock; the
//! call itself is abandoned, not cancelled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::time::Instant;

use conductor_conflicts::BusinessRecord;
use conductor_core::{ErrorCode, ExecutionRecord, ExecutionStatus, SyncTarget, TargetKey, Trigger};

use crate::connector::{Connector, SyncBatch};
use crate::error::SyncError;
use crate::metrics::{ExecutionSample, MetricsSink};
use crate::state::StateStore;

type TargetLock = Arc<tokio::sync::Mutex<()>>;

/// Result of one execution: the final record, earlier retried attempts, and
/// the payloads of a successful final attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub record: ExecutionRecord,
    pub retried: Vec<ExecutionRecord>,
    pub payloads: Vec<BusinessRecord>,
}

impl ExecutionOutcome {
    pub fn attempts(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.retried.iter().chain(std::iter::once(&self.record))
    }
}

struct Attempt {
    record: ExecutionRecord,
    payloads: Vec<BusinessRecord>,
    retryable: bool,
}

pub struct ExecutionCoordinator {
    connectors: HashMap<TargetKey, Arc<dyn Connector>>,
    locks: Mutex<HashMap<TargetKey, TargetLock>>,
    state: StateStore,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self.connectors.keys().map(ToString::to_string).collect();
        keys.sort();
        f.debug_struct("ExecutionCoordinator")
            .field("connectors", &keys)
            .finish_non_exhaustive()
    }
}

impl ExecutionCoordinator {
    pub fn new(
        connectors: HashMap<TargetKey, Arc<dyn Connector>>,
        state: StateStore,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            connectors,
            locks: Mutex::new(HashMap::new()),
            state,
            metrics,
        }
    }

    pub fn has_connector(&self, key: &TargetKey) -> bool {
        self.connectors.contains_key(key)
    }

    fn lock_for(&self, key: &TargetKey) -> TargetLock {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Run `target` once, retrying transient failures within its budget.
    ///
    /// Waits for the target's lock when another execution holds it.
    pub async fn execute(
        &self,
        target: &SyncTarget,
        trigger: Trigger,
    ) -> Result<ExecutionOutcome, SyncError> {
        let connector = self
            .connectors
            .get(&target.key)
            .cloned()
            .ok_or_else(|| SyncError::MissingConnector {
                key: target.key.clone(),
            })?;

        let lock = self.lock_for(&target.key);
        let _guard = lock.lock().await;
        self.state.set_running(&target.key, true);

        let mut retried = Vec::new();
        let mut attempt = 1;
        let outcome = loop {
            let Attempt {
                record,
                payloads,
                retryable,
            } = run_attempt(target, &connector, attempt, trigger).await;
            self.store(&record);

            if retryable && attempt <= target.retry_budget {
                tracing::debug!(
                    key = %target.key,
                    attempt,
                    budget = target.retry_budget,
                    "retrying transient failure",
                );
                retried.push(record);
                attempt += 1;
                continue;
            }
            break ExecutionOutcome {
                record,
                retried,
                payloads,
            };
        };

        self.state.set_running(&target.key, false);
        Ok(outcome)
    }

    /// Record a dependency skip for `target`.
    ///
    /// Written only when the target's lock is free right now; returns whether a
    /// record was written. A skip never counts as an execution.
    pub fn mark_skipped(&self, target: &SyncTarget, reason: &str) -> Option<ExecutionRecord> {
        let lock = self.lock_for(&target.key);
        let _guard = lock.try_lock().ok()?;
        let now = Utc::now();
        let record = ExecutionRecord {
            target: target.key.clone(),
            status: ExecutionStatus::Skipped,
            records_synced: 0,
            records_failed: 0,
            duration_ms: 0,
            started_at: now,
            recorded_at: now,
            attempt: 0,
            trigger: Trigger::Scheduled,
            error: Some(reason.to_string()),
            error_code: Some(ErrorCode::Dependency),
        };
        self.state.record(&record);
        Some(record)
    }

    fn store(&self, record: &ExecutionRecord) {
        let metrics = self.state.record(record);
        self.metrics
            .record_execution(&ExecutionSample::new(record, &metrics));
    }
}

async fn run_attempt(
    target: &SyncTarget,
    connector: &Arc<dyn Connector>,
    attempt: u32,
    trigger: Trigger,
) -> Attempt {
    let started_at = Utc::now();
    let clock = Instant::now();

    let call = {
        let connector = Arc::clone(connector);
        let (batch_size, timeout) = (target.batch_size, target.timeout);
        tokio::spawn(async move { connector.sync(batch_size, timeout).await })
    };
    // Dropping the join handle on timeout detaches the call.
    let result = tokio::time::timeout(target.timeout, call).await;
    let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut record = ExecutionRecord {
        target: target.key.clone(),
        status: ExecutionStatus::Success,
        records_synced: 0,
        records_failed: 0,
        duration_ms,
        started_at,
        recorded_at: Utc::now(),
        attempt,
        trigger,
        error: None,
        error_code: None,
    };

    let (failure, retryable) = match result {
        Ok(Ok(Ok(SyncBatch {
            records_synced,
            records_failed,
            records,
        }))) => {
            record.records_synced = records_synced;
            record.records_failed = records_failed;
            tracing::debug!(
                key = %target.key,
                attempt,
                records_synced,
                duration_ms,
                "sync succeeded",
            );
            return Attempt {
                record,
                payloads: records,
                retryable: false,
            };
        }
        Ok(Ok(Err(err))) => {
            let retryable = err.is_transient();
            ((ErrorCode::Connector, err.to_string()), retryable)
        }
        Ok(Err(join_err)) if join_err.is_panic() => (
            (ErrorCode::Panicked, "connector panicked".to_string()),
            false,
        ),
        Ok(Err(join_err)) => ((ErrorCode::Connector, join_err.to_string()), false),
        Err(_) => (
            (
                ErrorCode::Timeout,
                format!("timed out after {}s", target.timeout.as_secs_f64()),
            ),
            false,
        ),
    };

    let (code, message) = failure;
    tracing::warn!(
        key = %target.key,
        attempt,
        code = %code,
        error = %message,
        "sync failed",
    );
    record.status = ExecutionStatus::Failed;
    record.error = Some(message);
    record.error_code = Some(code);
    Attempt {
        record,
        payloads: Vec::new(),
        retryable,
    }
}
