//! The connector seam: one opaque "sync" per target.

use std::time::Duration;

use async_trait::async_trait;

use conductor_conflicts::BusinessRecord;

use crate::error::ConnectorError;

/// What a successful connector call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncBatch {
    pub records_synced: u64,
    pub records_failed: u64,
    /// Records handed to the conflict detector when the target has conflict
    /// resolution enabled. May be empty even when `records_synced > 0`.
    pub records: Vec<BusinessRecord>,
}

impl SyncBatch {
    /// A batch that only reports a count.
    pub fn counted(records_synced: u64) -> Self {
        Self {
            records_synced,
            ..Self::default()
        }
    }

    pub fn with_records(records: Vec<BusinessRecord>) -> Self {
        Self {
            records_synced: records.len() as u64,
            records_failed: 0,
            records,
        }
    }
}

/// A platform adapter for one target.
///
/// The coordinator enforces `timeout` itself; a connector may use it to
/// bound its own I/O but must not rely on being awaited past it.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn sync(&self, batch_size: u32, timeout: Duration) -> Result<SyncBatch, ConnectorError>;
}
