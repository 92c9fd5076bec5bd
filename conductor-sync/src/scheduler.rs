//! Tier Scheduler.
//!
//! One tick walks the tiers strictly in order REAL_TIME, HIGH, MEDIUM, LOW.
//! Each tier is evaluated against a fresh view of the execution history and
//! fully dispatched before the next tier is evaluated; dispatch never waits
//! for executions to finish.
//!
//! REAL_TIME and HIGH targets each get their own task. MEDIUM and LOW share a
//! bounded worker pool per tier; a per-tick dispatcher hands targets to the
//! pool in registry order, so waiting targets start first-in first-out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use conductor_core::{
    is_eligible, Eligibility, EligibilityPolicy, PriorityTier, SyncTarget, TargetKey,
    TargetRegistry, Trigger,
};

use crate::coordinator::{ExecutionCoordinator, ExecutionOutcome};
use crate::state::StateStore;

pub const DEFAULT_WORKER_POOL_SIZE: usize = 3;

/// A target handed to the executor during a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatch {
    pub key: TargetKey,
    pub tier: PriorityTier,
    /// Position in this tick's dispatch order, starting at 0.
    pub sequence: usize,
    pub dispatched_at: DateTime<Utc>,
}

/// A target held back by an unmet dependency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skip {
    pub key: TargetKey,
    pub dependency: TargetKey,
    pub reason: String,
    /// False when the target was busy and no SKIPPED record was written.
    pub recorded: bool,
}

/// What a tick decided, available as soon as dispatch is done.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub now: DateTime<Utc>,
    pub dispatched: Vec<Dispatch>,
    pub skipped: Vec<Skip>,
    /// Targets whose previous scheduled execution had not finished.
    pub still_running: Vec<TargetKey>,
}

/// Dispatched work of one tick.
#[derive(Debug)]
pub struct TickHandle {
    report: TickReport,
    tasks: Vec<JoinHandle<Vec<ExecutionOutcome>>>,
}

impl TickHandle {
    pub fn report(&self) -> &TickReport {
        &self.report
    }

    /// Wait for every execution dispatched by this tick.
    pub async fn join(self) -> (TickReport, Vec<ExecutionOutcome>) {
        let mut outcomes = Vec::new();
        for task in self.tasks {
            match task.await {
                Ok(batch) => outcomes.extend(batch),
                Err(err) => tracing::warn!(tick = self.report.tick, error = %err, "dispatch task failed"),
            }
        }
        (self.report, outcomes)
    }
}

/// Removes its key from the in-flight set when dropped.
struct InFlight {
    set: Arc<Mutex<HashSet<TargetKey>>>,
    key: TargetKey,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        set.remove(&self.key);
    }
}

#[derive(Debug)]
pub struct TierScheduler {
    registry: Arc<TargetRegistry>,
    coordinator: Arc<ExecutionCoordinator>,
    state: StateStore,
    policy: EligibilityPolicy,
    medium_pool: Arc<Semaphore>,
    low_pool: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<TargetKey>>>,
    ticks: AtomicU64,
}

impl TierScheduler {
    pub fn new(
        registry: Arc<TargetRegistry>,
        coordinator: Arc<ExecutionCoordinator>,
        state: StateStore,
        policy: EligibilityPolicy,
        worker_pool_size: usize,
    ) -> Self {
        let workers = worker_pool_size.max(1);
        Self {
            registry,
            coordinator,
            state,
            policy,
            medium_pool: Arc::new(Semaphore::new(workers)),
            low_pool: Arc::new(Semaphore::new(workers)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            ticks: AtomicU64::new(0),
        }
    }

    fn pool(&self, tier: PriorityTier) -> Option<&Arc<Semaphore>> {
        match tier {
            PriorityTier::Medium => Some(&self.medium_pool),
            PriorityTier::Low => Some(&self.low_pool),
            PriorityTier::RealTime | PriorityTier::High => None,
        }
    }

    fn is_in_flight(&self, key: &TargetKey) -> bool {
        let set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        set.contains(key)
    }

    fn claim(&self, key: &TargetKey) -> Option<InFlight> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        set.insert(key.clone()).then(|| InFlight {
            set: Arc::clone(&self.in_flight),
            key: key.clone(),
        })
    }

    /// Run one tick as of `now`. Must be called inside a tokio runtime.
    pub fn tick_at(&self, now: DateTime<Utc>) -> TickHandle {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = TickReport {
            tick,
            now,
            dispatched: Vec::new(),
            skipped: Vec::new(),
            still_running: Vec::new(),
        };
        let mut tasks: Vec<JoinHandle<Vec<ExecutionOutcome>>> = Vec::new();

        for tier in PriorityTier::ALL {
            let history = self.state.executions();
            let mut ready: Vec<SyncTarget> = Vec::new();

            for target in self.registry.targets_by_tier(tier) {
                if self.is_in_flight(&target.key) {
                    report.still_running.push(target.key.clone());
                    continue;
                }
                match is_eligible(target, now, &self.registry, &history, &self.policy) {
                    Eligibility::Eligible => ready.push(target.clone()),
                    Eligibility::NotDue { .. } => {}
                    Eligibility::DependencyNotMet { dependency, gap } => {
                        let reason = format!("dependency {dependency} {gap}");
                        tracing::debug!(key = %target.key, %tier, reason = %reason, "skipped");
                        let recorded = self.coordinator.mark_skipped(target, &reason).is_some();
                        report.skipped.push(Skip {
                            key: target.key.clone(),
                            dependency,
                            reason,
                            recorded,
                        });
                    }
                }
            }

            let mut claimed = Vec::with_capacity(ready.len());
            for target in ready {
                let Some(claim) = self.claim(&target.key) else {
                    report.still_running.push(target.key.clone());
                    continue;
                };
                report.dispatched.push(Dispatch {
                    key: target.key.clone(),
                    tier,
                    sequence: report.dispatched.len(),
                    dispatched_at: Utc::now(),
                });
                claimed.push((target, claim));
            }
            if claimed.is_empty() {
                continue;
            }
            tracing::debug!(tick, %tier, dispatched = claimed.len(), "tier dispatched");

            match self.pool(tier) {
                Some(pool) => tasks.push(spawn_pooled(
                    Arc::clone(pool),
                    Arc::clone(&self.coordinator),
                    claimed,
                )),
                None => {
                    for (target, claim) in claimed {
                        let coordinator = Arc::clone(&self.coordinator);
                        tasks.push(tokio::spawn(async move {
                            run_scheduled(coordinator, target, claim)
                                .await
                                .into_iter()
                                .collect::<Vec<_>>()
                        }));
                    }
                }
            }
        }

        TickHandle { report, tasks }
    }
}

fn spawn_pooled(
    pool: Arc<Semaphore>,
    coordinator: Arc<ExecutionCoordinator>,
    queue: Vec<(SyncTarget, InFlight)>,
) -> JoinHandle<Vec<ExecutionOutcome>> {
    tokio::spawn(async move {
        let mut running = Vec::with_capacity(queue.len());
        for (target, claim) in queue {
            let Ok(permit) = Arc::clone(&pool).acquire_owned().await else {
                break;
            };
            let coordinator = Arc::clone(&coordinator);
            running.push(tokio::spawn(async move {
                let _permit = permit;
                run_scheduled(coordinator, target, claim).await
            }));
        }

        let mut outcomes = Vec::with_capacity(running.len());
        for task in running {
            match task.await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "pooled execution task failed"),
            }
        }
        outcomes
    })
}

async fn run_scheduled(
    coordinator: Arc<ExecutionCoordinator>,
    target: SyncTarget,
    _claim: InFlight,
) -> Option<ExecutionOutcome> {
    match coordinator.execute(&target, Trigger::Scheduled).await {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            tracing::warn!(key = %target.key, error = %err, "execution not started");
            None
        }
    }
}
