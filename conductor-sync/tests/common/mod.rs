//! Fakes shared by the conductor-sync integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use conductor_conflicts::BusinessRecord;
use conductor_core::{PriorityTier, SyncTarget, TargetKey, TargetRegistry};
use conductor_sync::{Connector, ConnectorError, Orchestrator, OrchestratorBuilder, SyncBatch};

pub fn key(raw: &str) -> TargetKey {
    raw.parse().expect("target key")
}

pub fn target(raw: &str, priority: PriorityTier, interval: Duration) -> SyncTarget {
    SyncTarget {
        key: key(raw),
        priority,
        interval,
        batch_size: 100,
        retry_budget: 0,
        timeout: Duration::from_secs(60),
        depends_on: Vec::new(),
        conflict_resolution: true,
    }
}

pub fn depends_on(mut target: SyncTarget, deps: &[&str]) -> SyncTarget {
    target.depends_on = deps.iter().map(|d| key(d)).collect();
    target
}

/// Tracks how many connector calls are in progress at once.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
    starts: Mutex<Vec<(TargetKey, Instant)>>,
}

pub struct GaugeGuard(Arc<Gauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Gauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(self: &Arc<Self>, key: &TargetKey) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        self.starts
            .lock()
            .expect("starts")
            .push((key.clone(), Instant::now()));
        GaugeGuard(Arc::clone(self))
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> Vec<(TargetKey, Instant)> {
        self.starts.lock().expect("starts").clone()
    }
}

/// Connector answering from a script, then with a default success.
pub struct FakeConnector {
    key: TargetKey,
    delay: Duration,
    script: Mutex<VecDeque<Result<SyncBatch, ConnectorError>>>,
    fallback: SyncBatch,
    gauge: Arc<Gauge>,
    calls: AtomicUsize,
    finished: AtomicUsize,
    panics: AtomicBool,
}

impl FakeConnector {
    pub fn new(raw_key: &str) -> Self {
        Self {
            key: key(raw_key),
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            fallback: SyncBatch::counted(10),
            gauge: Gauge::new(),
            calls: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            panics: AtomicBool::new(false),
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn gauge(mut self, gauge: &Arc<Gauge>) -> Self {
        self.gauge = Arc::clone(gauge);
        self
    }

    pub fn returning(mut self, batch: SyncBatch) -> Self {
        self.fallback = batch;
        self
    }

    pub fn then(self, result: Result<SyncBatch, ConnectorError>) -> Self {
        self.script.lock().expect("script").push_back(result);
        self
    }

    pub fn panicking(self) -> Self {
        self.panics.store(true, Ordering::SeqCst);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.gauge.max()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn sync(&self, _batch_size: u32, _timeout: Duration) -> Result<SyncBatch, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _active = self.gauge.enter(&self.key);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panics.load(Ordering::SeqCst) {
            panic!("connector blew up");
        }
        let scripted = self.script.lock().expect("script").pop_front();
        self.finished.fetch_add(1, Ordering::SeqCst);
        scripted.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Builder with a default fake connector for every registered target.
pub fn builder_with_fakes(targets: Vec<SyncTarget>) -> OrchestratorBuilder {
    let registry = TargetRegistry::new(targets).expect("registry");
    let keys: Vec<TargetKey> = registry.targets().iter().map(|t| t.key.clone()).collect();
    let mut builder = Orchestrator::builder(registry);
    for key in keys {
        let raw = key.to_string();
        builder = builder.connector(key, FakeConnector::new(&raw).shared());
    }
    builder
}

pub fn record(id: &str) -> BusinessRecord {
    BusinessRecord::new(id)
}
