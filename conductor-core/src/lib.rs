//! Conductor core library: domain types, configuration, target registry,
//! dependency eligibility.
//!
//! - [`types`]: newtypes, targets, execution records, metrics
//! - [`error`]: [`ConfigError`]
//! - [`config`]: YAML loading and validation
//! - [`registry`]: [`TargetRegistry`]
//! - [`graph`]: the [`is_eligible`] predicate

pub mod config;
pub mod error;
pub mod graph;
pub mod registry;
pub mod types;

pub use config::{ConductorConfig, ConflictConfig, ConnectorConfig, SchedulerConfig, TargetConfig};
pub use error::ConfigError;
pub use graph::{is_eligible, DependencyGap, Eligibility, EligibilityPolicy, ExecutionHistory};
pub use registry::TargetRegistry;
pub use types::{
    DataType, ErrorCode, ExecutionRecord, ExecutionStatus, Platform, PriorityTier, SyncTarget,
    TargetKey, TargetMetrics, Trigger,
};
