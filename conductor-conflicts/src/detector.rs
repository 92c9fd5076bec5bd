//! Conflict detector: runs every rule over one pass of freshly synced records.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;

use conductor_core::Platform;

use crate::journal::ConflictJournal;
use crate::model::{Conflict, ConflictCategory};
use crate::record::{RecordBatch, RecordIndex};
use crate::rules::{
    ConflictRule, DataMismatchRule, DuplicateRecordRule, Finding, ReferenceConflictRule,
    TimestampConflictRule,
};

pub struct ConflictDetector {
    rules: Vec<Box<dyn ConflictRule>>,
}

impl std::fmt::Debug for ConflictDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.rules.iter().map(|rule| rule.name()).collect();
        f.debug_struct("ConflictDetector").field("rules", &names).finish()
    }
}

impl ConflictDetector {
    /// The four built-in rules; `timestamp_skew` tunes the timestamp rule.
    pub fn new(timestamp_skew: Duration) -> Self {
        Self::empty()
            .with_rule(DuplicateRecordRule)
            .with_rule(TimestampConflictRule {
                skew: timestamp_skew,
            })
            .with_rule(DataMismatchRule)
            .with_rule(ReferenceConflictRule)
    }

    /// A detector with no rules; add them with [`with_rule`](Self::with_rule).
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: impl ConflictRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Findings for one pass, at most one per (category, business id, platform set),
    /// in a stable order.
    pub fn findings(&self, batch: &RecordBatch) -> Vec<Finding> {
        if batch.values().all(Vec::is_empty) {
            return Vec::new();
        }
        let index = RecordIndex::build(batch);
        let mut seen: BTreeSet<(ConflictCategory, String, BTreeSet<Platform>)> = BTreeSet::new();
        let mut findings: Vec<Finding> = self
            .rules
            .iter()
            .flat_map(|rule| rule.detect(&index))
            .filter(|f| seen.insert((f.category, f.business_id.clone(), f.platforms.clone())))
            .collect();
        findings.sort_by(|a, b| {
            (a.category, &a.business_id, &a.platforms).cmp(&(b.category, &b.business_id, &b.platforms))
        });
        findings
    }

    /// Detect conflicts in `batch` and merge them into `journal`.
    ///
    /// Returns the conflicts created or refreshed by this pass.
    pub async fn detect(&self, batch: &RecordBatch, journal: &ConflictJournal) -> Vec<Conflict> {
        let findings = self.findings(batch);
        if findings.is_empty() {
            return Vec::new();
        }
        journal.record(findings, Utc::now()).await
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
