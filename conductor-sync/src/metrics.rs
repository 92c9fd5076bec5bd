//! Push-only metrics sinks.
//!
//! Sinks are infallible from the engine's point of view: a sink that cannot
//! keep up drops samples rather than slowing an execution down.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use conductor_core::{ExecutionRecord, ExecutionStatus, TargetKey, TargetMetrics, Trigger};

/// One execution attempt as seen by the metrics backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSample {
    pub target: TargetKey,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    pub records_synced: u64,
    pub attempt: u32,
    pub trigger: Trigger,
    pub success_rate: f64,
}

impl ExecutionSample {
    pub fn new(record: &ExecutionRecord, metrics: &TargetMetrics) -> Self {
        Self {
            target: record.target.clone(),
            status: record.status,
            duration_ms: record.duration_ms,
            records_synced: record.records_synced,
            attempt: record.attempt,
            trigger: record.trigger,
            success_rate: metrics.success_rate,
        }
    }
}

/// Success-rate snapshot taken once a tick's executions have completed.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSnapshot {
    pub tick: u64,
    pub at: DateTime<Utc>,
    pub success_rates: BTreeMap<TargetKey, f64>,
}

pub trait MetricsSink: Send + Sync {
    fn record_execution(&self, sample: &ExecutionSample);
    fn record_tick(&self, snapshot: &TickSnapshot);
}

impl std::fmt::Debug for dyn MetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MetricsSink")
    }
}

/// Emits samples as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record_execution(&self, sample: &ExecutionSample) {
        tracing::info!(
            key = %sample.target,
            status = %sample.status,
            duration_ms = sample.duration_ms,
            records_synced = sample.records_synced,
            attempt = sample.attempt,
            success_rate = sample.success_rate,
            "execution",
        );
    }

    fn record_tick(&self, snapshot: &TickSnapshot) {
        for (key, rate) in &snapshot.success_rates {
            tracing::debug!(tick = snapshot.tick, key = %key, success_rate = rate, "success rate");
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricsEvent {
    Execution(ExecutionSample),
    Tick(TickSnapshot),
}

/// Forwards samples to a bounded channel; full or closed channels drop them.
#[derive(Debug, Clone)]
pub struct ChannelMetricsSink {
    tx: mpsc::Sender<MetricsEvent>,
}

impl ChannelMetricsSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MetricsEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    fn push(&self, event: MetricsEvent) {
        if let Err(err) = self.tx.try_send(event) {
            tracing::debug!(error = %err, "metrics sample dropped");
        }
    }
}

impl MetricsSink for ChannelMetricsSink {
    fn record_execution(&self, sample: &ExecutionSample) {
        self.push(MetricsEvent::Execution(sample.clone()));
    }

    fn record_tick(&self, snapshot: &TickSnapshot) {
        self.push(MetricsEvent::Tick(snapshot.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tick: u64) -> TickSnapshot {
        TickSnapshot {
            tick,
            at: Utc::now(),
            success_rates: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelMetricsSink::new(1);
        sink.record_tick(&snapshot(1));
        sink.record_tick(&snapshot(2));

        match rx.recv().await {
            Some(MetricsEvent::Tick(first)) => assert_eq!(first.tick, 1),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn channel_sink_survives_a_closed_receiver() {
        let (sink, rx) = ChannelMetricsSink::new(4);
        drop(rx);
        sink.record_tick(&snapshot(1));
    }
}
