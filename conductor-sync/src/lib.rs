//! # conductor-sync
//!
//! The scheduling half of the engine: target state, the connector seam, the
//! Execution Coordinator, the Tier Scheduler, metrics sinks, and the
//! [`Orchestrator`] that ties them to the conflict journal.
//!
//! Build one [`Orchestrator`] per process with [`Orchestrator::builder`],
//! then drive it with [`Orchestrator::tick`] on a fixed period.

pub mod connector;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;
pub mod state;

pub use connector::{Connector, SyncBatch};
pub use coordinator::{ExecutionCoordinator, ExecutionOutcome};
pub use error::{ConnectorError, SyncError};
pub use metrics::{
    ChannelMetricsSink, ExecutionSample, MetricsEvent, MetricsSink, TickSnapshot,
    TracingMetricsSink,
};
pub use orchestrator::{
    ConflictStatus, Orchestrator, OrchestratorBuilder, PendingTick, StatusReport, TargetStatus,
    TickSummary,
};
pub use scheduler::{Dispatch, Skip, TickHandle, TickReport, TierScheduler};
pub use state::{StateStore, TargetState};
