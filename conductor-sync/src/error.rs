//! Error types for conductor-sync.

use thiserror::Error;

use conductor_core::{ConfigError, TargetKey};

/// Errors surfaced by the orchestrator to its callers.
///
/// Connector failures are not in here: they are recorded on the target's
/// [`ExecutionRecord`](conductor_core::ExecutionRecord) and never propagated.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no connector registered for target {key}")]
    MissingConnector { key: TargetKey },

    #[error("connector registered for unknown target {key}")]
    UnexpectedConnector { key: TargetKey },

    #[error("unknown target {key}")]
    UnknownTarget { key: TargetKey },

    #[error("execution task for {key} did not complete: {reason}")]
    TaskFailed { key: TargetKey, reason: String },
}

/// Failure reported by a [`Connector`](crate::Connector).
///
/// Only transient failures are retried, and only within the target's
/// retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl ConnectorError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Transient(_))
    }
}
