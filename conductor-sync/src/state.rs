//! Target State Store: last record, last execution and metrics per target.
//!
//! Writes happen only while the writer holds the target's lock in the
//! [`ExecutionCoordinator`](crate::ExecutionCoordinator); readers take
//! consistent copies and never block an execution for long.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use conductor_core::{ExecutionRecord, ExecutionStatus, TargetKey, TargetMetrics};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    /// Most recent record of any kind, skips included.
    pub last_record: Option<ExecutionRecord>,
    /// Most recent record of an actual execution attempt. Drives the
    /// due-timer and dependency freshness.
    pub last_execution: Option<ExecutionRecord>,
    pub metrics: TargetMetrics,
    pub running: bool,
}

/// Cloneable handle to the shared store.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    inner: Arc<RwLock<HashMap<TargetKey, TargetState>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` and fold it into the target's metrics.
    ///
    /// Skips replace `last_record` only; they are not attempts.
    pub fn record(&self, record: &ExecutionRecord) -> TargetMetrics {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let state = map.entry(record.target.clone()).or_default();
        match record.status {
            ExecutionStatus::Success => {
                state.metrics.record_success(record.records_synced, record.recorded_at);
                state.last_execution = Some(record.clone());
            }
            ExecutionStatus::Failed => {
                state.metrics.record_failure();
                state.last_execution = Some(record.clone());
            }
            _ => {}
        }
        state.last_record = Some(record.clone());
        state.metrics.clone()
    }

    pub fn set_running(&self, key: &TargetKey, running: bool) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(key.clone()).or_default().running = running;
    }

    pub fn get(&self, key: &TargetKey) -> Option<TargetState> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).cloned()
    }

    /// Last execution per target, usable as [`ExecutionHistory`](conductor_core::ExecutionHistory).
    pub fn executions(&self) -> HashMap<TargetKey, ExecutionRecord> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.iter()
            .filter_map(|(key, state)| Some((key.clone(), state.last_execution.clone()?)))
            .collect()
    }

    pub fn metrics(&self) -> HashMap<TargetKey, TargetMetrics> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.iter()
            .map(|(key, state)| (key.clone(), state.metrics.clone()))
            .collect()
    }
}
