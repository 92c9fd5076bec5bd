//! The orchestrator object: one per process, shared by handle.
//!
//! Owns the registry, state store, coordinator, scheduler and conflict
//! journal. The daemon drives [`Orchestrator::tick`]; the trigger surface
//! calls [`Orchestrator::force_sync`] and [`Orchestrator::status`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conductor_conflicts::{
    ConflictCategory, ConflictDetector, ConflictId, ConflictJournal, ConflictResolver,
    RecordBatch, ResolutionAdvisor, ResolutionStrategy, Severity,
};
use conductor_core::{
    ConductorConfig, EligibilityPolicy, ErrorCode, ExecutionRecord, ExecutionStatus, Platform,
    PriorityTier, TargetKey, TargetMetrics, TargetRegistry, Trigger,
};

use crate::connector::Connector;
use crate::coordinator::{ExecutionCoordinator, ExecutionOutcome};
use crate::error::SyncError;
use crate::metrics::{MetricsSink, TickSnapshot, TracingMetricsSink};
use crate::scheduler::{TickHandle, TickReport, TierScheduler, DEFAULT_WORKER_POOL_SIZE};
use crate::state::StateStore;

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// 1. Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub key: TargetKey,
    pub priority: PriorityTier,
    /// Effective status: `running` while executing, `pending` before the first
    /// record, `conflicted` when a successful sync feeds an open conflict.
    pub status: ExecutionStatus,
    pub last_record: Option<ExecutionRecord>,
    pub last_error: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub next_due: Option<DateTime<Utc>>,
    pub metrics: TargetMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictStatus {
    pub id: ConflictId,
    pub category: ConflictCategory,
    pub business_id: String,
    pub platforms: Vec<Platform>,
    pub severity: Severity,
    pub resolved: bool,
    pub strategy: Option<ResolutionStrategy>,
    pub winner: Option<Platform>,
    pub unresolved_reason: Option<String>,
    pub detection_count: u32,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub targets: Vec<TargetStatus>,
    pub conflicts: Vec<ConflictStatus>,
}

impl StatusReport {
    pub fn target(&self, key: &TargetKey) -> Option<&TargetStatus> {
        self.targets.iter().find(|t| &t.key == key)
    }

    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &ConflictStatus> {
        self.conflicts.iter().filter(|c| !c.resolved)
    }
}

/// Outcome of a completed tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub report: TickReport,
    pub executions: Vec<ExecutionOutcome>,
    pub conflicts_detected: usize,
    pub conflicts_resolved: usize,
}

impl TickSummary {
    pub fn record_for(&self, key: &TargetKey) -> Option<&ExecutionRecord> {
        self.executions
            .iter()
            .map(|outcome| &outcome.record)
            .find(|record| &record.target == key)
    }
}

// ---------------------------------------------------------------------------
// 2. Conflict pass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ConflictPass {
    registry: Arc<TargetRegistry>,
    detector: Arc<ConflictDetector>,
    resolver: Arc<ConflictResolver>,
    journal: ConflictJournal,
}

impl ConflictPass {
    /// Detect and resolve over the payloads of successful, conflict-enabled
    /// executions. Returns `(detected, resolved)` counts.
    async fn run(&self, outcomes: &[ExecutionOutcome]) -> (usize, usize) {
        let mut batch = RecordBatch::new();
        for outcome in outcomes {
            let record = &outcome.record;
            if record.status != ExecutionStatus::Success {
                continue;
            }
            let enabled = self
                .registry
                .get(&record.target)
                .is_some_and(|target| target.conflict_resolution);
            if enabled && !outcome.payloads.is_empty() {
                batch
                    .entry(record.target.platform.clone())
                    .or_default()
                    .extend(outcome.payloads.iter().cloned());
            }
        }
        if batch.is_empty() {
            return (0, 0);
        }

        let detected = self.detector.detect(&batch, &self.journal).await;
        let resolutions = self.journal.resolve_pending(&self.resolver).await;
        let resolved = resolutions.iter().filter(|r| r.resolved).count();
        if !detected.is_empty() {
            tracing::info!(
                detected = detected.len(),
                resolved,
                unresolved = resolutions.len() - resolved,
                "conflict pass complete",
            );
        }
        (detected.len(), resolved)
    }
}

// ---------------------------------------------------------------------------
// 3. Orchestrator
// ---------------------------------------------------------------------------

/// A dispatched tick whose executions may still be running.
#[derive(Debug)]
pub struct PendingTick {
    handle: TickHandle,
    conflicts: ConflictPass,
    state: StateStore,
    metrics: Arc<dyn MetricsSink>,
}

impl PendingTick {
    pub fn report(&self) -> &TickReport {
        self.handle.report()
    }

    /// Wait for the tick's executions, then run the conflict pass and push
    /// the success-rate snapshot.
    pub async fn finish(self) -> TickSummary {
        let (report, executions) = self.handle.join().await;
        let (conflicts_detected, conflicts_resolved) = self.conflicts.run(&executions).await;

        let success_rates = self
            .state
            .metrics()
            .into_iter()
            .map(|(key, metrics)| (key, metrics.success_rate))
            .collect::<BTreeMap<_, _>>();
        self.metrics.record_tick(&TickSnapshot {
            tick: report.tick,
            at: Utc::now(),
            success_rates,
        });

        tracing::info!(
            tick = report.tick,
            dispatched = report.dispatched.len(),
            skipped = report.skipped.len(),
            conflicts_detected,
            "tick complete",
        );
        TickSummary {
            report,
            executions,
            conflicts_detected,
            conflicts_resolved,
        }
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<TargetRegistry>,
    state: StateStore,
    coordinator: Arc<ExecutionCoordinator>,
    scheduler: TierScheduler,
    conflicts: ConflictPass,
    metrics: Arc<dyn MetricsSink>,
    policy: EligibilityPolicy,
    tick_period: Duration,
}

impl Orchestrator {
    pub fn builder(registry: TargetRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry)
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn journal(&self) -> &ConflictJournal {
        &self.conflicts.journal
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    /// Dispatch one tick as of now.
    pub fn tick(&self) -> PendingTick {
        self.tick_at(Utc::now())
    }

    /// Dispatch one tick, evaluating eligibility as of `now`.
    pub fn tick_at(&self, now: DateTime<Utc>) -> PendingTick {
        PendingTick {
            handle: self.scheduler.tick_at(now),
            conflicts: self.conflicts.clone(),
            state: self.state.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Execute `key` now, bypassing eligibility.
    ///
    /// Queues behind any execution already holding the target's lock. The
    /// payloads of a successful run go through a conflict pass of their own.
    pub async fn force_sync(&self, key: &TargetKey) -> Result<ExecutionOutcome, SyncError> {
        let target = self
            .registry
            .get(key)
            .cloned()
            .ok_or_else(|| SyncError::UnknownTarget { key: key.clone() })?;

        tracing::info!(key = %key, "force sync requested");
        let coordinator = Arc::clone(&self.coordinator);
        let outcome = tokio::spawn(async move { coordinator.execute(&target, Trigger::Manual).await })
            .await
            .map_err(|err| SyncError::TaskFailed {
                key: key.clone(),
                reason: err.to_string(),
            })??;

        self.conflicts.run(std::slice::from_ref(&outcome)).await;
        Ok(outcome)
    }

    /// Read-only view of every target and every conflict.
    pub async fn status(&self) -> StatusReport {
        let conflicts = self.conflicts.journal.snapshot().await;
        let mut last_open_conflict: HashMap<&Platform, DateTime<Utc>> = HashMap::new();
        for conflict in conflicts.iter().filter(|c| !c.resolved) {
            for platform in &conflict.platforms {
                let seen = last_open_conflict.entry(platform).or_insert(conflict.last_seen_at);
                *seen = (*seen).max(conflict.last_seen_at);
            }
        }

        let targets = self
            .registry
            .targets()
            .iter()
            .map(|target| {
                let state = self.state.get(&target.key).unwrap_or_default();
                let last_record = state.last_record;
                let status = match &last_record {
                    _ if state.running => ExecutionStatus::Running,
                    None => ExecutionStatus::Pending,
                    Some(record)
                        if record.status == ExecutionStatus::Success
                            && last_open_conflict
                                .get(&target.key.platform)
                                .is_some_and(|seen| *seen >= record.recorded_at) =>
                    {
                        ExecutionStatus::Conflicted
                    }
                    Some(record) => record.status,
                };
                let next_due = state.last_execution.as_ref().and_then(|execution| {
                    let interval = chrono::Duration::from_std(target.interval).ok()?;
                    execution.recorded_at.checked_add_signed(interval)
                });
                TargetStatus {
                    key: target.key.clone(),
                    priority: target.priority,
                    status,
                    last_error: last_record.as_ref().and_then(|r| r.error.clone()),
                    error_code: last_record.as_ref().and_then(|r| r.error_code),
                    last_record,
                    next_due,
                    metrics: state.metrics,
                }
            })
            .collect();

        let conflicts = conflicts
            .into_iter()
            .map(|conflict| ConflictStatus {
                strategy: conflict.resolution.as_ref().map(|r| r.strategy),
                winner: conflict.resolution.as_ref().and_then(|r| r.winner.clone()),
                id: conflict.id,
                category: conflict.category,
                business_id: conflict.business_id,
                platforms: conflict.platforms.into_iter().collect(),
                severity: conflict.severity,
                resolved: conflict.resolved,
                unresolved_reason: conflict.unresolved_reason,
                detection_count: conflict.detection_count,
                last_seen_at: conflict.last_seen_at,
            })
            .collect();

        StatusReport {
            generated_at: Utc::now(),
            targets,
            conflicts,
        }
    }

    pub fn eligibility_policy(&self) -> EligibilityPolicy {
        self.policy
    }
}

// ---------------------------------------------------------------------------
// 4. Builder
// ---------------------------------------------------------------------------

pub struct OrchestratorBuilder {
    registry: TargetRegistry,
    connectors: HashMap<TargetKey, Arc<dyn Connector>>,
    advisor: Option<Arc<dyn ResolutionAdvisor>>,
    advisor_timeout: Option<Duration>,
    metrics: Arc<dyn MetricsSink>,
    detector: Option<ConflictDetector>,
    policy: EligibilityPolicy,
    worker_pool_size: usize,
    timestamp_skew: Duration,
    tick_period: Duration,
}

impl OrchestratorBuilder {
    pub fn new(registry: TargetRegistry) -> Self {
        Self {
            registry,
            connectors: HashMap::new(),
            advisor: None,
            advisor_timeout: None,
            metrics: Arc::new(TracingMetricsSink),
            detector: None,
            policy: EligibilityPolicy::default(),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            timestamp_skew: Duration::from_secs(300),
            tick_period: DEFAULT_TICK_PERIOD,
        }
    }

    /// Apply the `scheduler` and `conflicts` sections of a loaded config.
    pub fn settings(mut self, config: &ConductorConfig) -> Self {
        self.policy = config.scheduler.eligibility_policy();
        self.worker_pool_size = config.scheduler.worker_pool_size;
        self.tick_period = config.scheduler.tick_period();
        self.timestamp_skew = config.conflicts.timestamp_skew();
        self
    }

    pub fn connector(mut self, key: TargetKey, connector: Arc<dyn Connector>) -> Self {
        self.connectors.insert(key, connector);
        self
    }

    pub fn advisor(mut self, advisor: Arc<dyn ResolutionAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn advisor_timeout(mut self, timeout: Duration) -> Self {
        self.advisor_timeout = Some(timeout);
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Replace the built-in rule set.
    pub fn detector(mut self, detector: ConflictDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn eligibility_policy(mut self, policy: EligibilityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// Fails when a target has no connector or a connector names no target.
    pub fn build(self) -> Result<Orchestrator, SyncError> {
        if let Some(target) = self
            .registry
            .targets()
            .iter()
            .find(|target| !self.connectors.contains_key(&target.key))
        {
            return Err(SyncError::MissingConnector {
                key: target.key.clone(),
            });
        }
        if let Some(key) = self
            .connectors
            .keys()
            .find(|key| !self.registry.contains(key))
        {
            return Err(SyncError::UnexpectedConnector { key: key.clone() });
        }

        let mut resolver = ConflictResolver::new(self.registry.platform_priority());
        if let Some(advisor) = self.advisor {
            resolver = resolver.with_advisor(advisor);
        }
        if let Some(timeout) = self.advisor_timeout {
            resolver = resolver.with_advisor_timeout(timeout);
        }
        let detector = self
            .detector
            .unwrap_or_else(|| ConflictDetector::new(self.timestamp_skew));

        let registry = Arc::new(self.registry);
        let state = StateStore::new();
        let coordinator = Arc::new(ExecutionCoordinator::new(
            self.connectors,
            state.clone(),
            Arc::clone(&self.metrics),
        ));
        let scheduler = TierScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&coordinator),
            state.clone(),
            self.policy,
            self.worker_pool_size,
        );

        tracing::info!(
            targets = registry.len(),
            workers = self.worker_pool_size,
            staleness_factor = self.policy.staleness_factor,
            "orchestrator ready",
        );
        Ok(Orchestrator {
            conflicts: ConflictPass {
                registry: Arc::clone(&registry),
                detector: Arc::new(detector),
                resolver: Arc::new(resolver),
                journal: ConflictJournal::new(),
            },
            registry,
            state,
            coordinator,
            scheduler,
            metrics: self.metrics,
            policy: self.policy,
            tick_period: self.tick_period,
        })
    }
}
