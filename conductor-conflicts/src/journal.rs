//! Append-only, in-memory conflict journal.
//!
//! Conflicts are never removed. A finding that matches an unresolved conflict
//! on `(category, business_id)` refreshes that conflict in place instead of
//! appending a new one. A finding whose payloads equal those of an already
//! resolved conflict only bumps that conflict's sighting counters; a new
//! conflict is opened only when the data changed. One journal-wide async
//! mutex guards every lookup and update; it is held across resolver calls so
//! a conflict is resolved once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::model::{Conflict, ConflictId, Resolution};
use crate::resolver::ConflictResolver;
use crate::rules::Finding;

#[derive(Debug, Default)]
struct JournalState {
    conflicts: Vec<Conflict>,
    next_sequence: u64,
}

/// Cloneable handle to the shared journal.
#[derive(Debug, Clone, Default)]
pub struct ConflictJournal {
    state: Arc<Mutex<JournalState>>,
}

impl ConflictJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one pass worth of findings. Returns the created or refreshed conflicts.
    pub async fn record(&self, findings: Vec<Finding>, now: DateTime<Utc>) -> Vec<Conflict> {
        let findings = merge_same_subject(findings);
        let mut state = self.state.lock().await;
        let mut touched = Vec::with_capacity(findings.len());

        for finding in findings {
            let same_subject = |conflict: &Conflict| {
                conflict.category == finding.category && conflict.business_id == finding.business_id
            };
            let open = state
                .conflicts
                .iter()
                .position(|conflict| !conflict.resolved && same_subject(conflict));
            let settled = state.conflicts.iter().rposition(|conflict| {
                conflict.resolved && same_subject(conflict) && conflict.payloads == finding.payloads
            });

            match (open, settled) {
                (None, Some(position)) => {
                    let conflict = &mut state.conflicts[position];
                    conflict.last_seen_at = now;
                    conflict.detection_count += 1;
                    tracing::debug!(
                        conflict = %conflict.id,
                        category = %conflict.category,
                        business_id = %conflict.business_id,
                        detections = conflict.detection_count,
                        "resolved conflict seen again with unchanged data",
                    );
                    touched.push(conflict.clone());
                }
                (Some(position), _) => {
                    let conflict = &mut state.conflicts[position];
                    if conflict.payloads != finding.payloads {
                        // New data deserves a fresh resolution attempt.
                        conflict.resolution = None;
                        conflict.unresolved_reason = None;
                    }
                    conflict.platforms = finding.platforms;
                    conflict.payloads = finding.payloads;
                    conflict.severity = finding.severity;
                    conflict.detail = finding.detail;
                    conflict.last_seen_at = now;
                    conflict.detection_count += 1;
                    tracing::debug!(
                        conflict = %conflict.id,
                        category = %conflict.category,
                        business_id = %conflict.business_id,
                        detections = conflict.detection_count,
                        "conflict seen again",
                    );
                    touched.push(conflict.clone());
                }
                (None, None) => {
                    state.next_sequence += 1;
                    let conflict = Conflict {
                        id: ConflictId::from_sequence(state.next_sequence),
                        category: finding.category,
                        business_id: finding.business_id,
                        platforms: finding.platforms,
                        payloads: finding.payloads,
                        severity: finding.severity,
                        detail: finding.detail,
                        resolved: false,
                        resolution: None,
                        unresolved_reason: None,
                        detected_at: now,
                        last_seen_at: now,
                        detection_count: 1,
                    };
                    tracing::info!(
                        conflict = %conflict.id,
                        category = %conflict.category,
                        business_id = %conflict.business_id,
                        severity = %conflict.severity,
                        "conflict detected",
                    );
                    touched.push(conflict.clone());
                    state.conflicts.push(conflict);
                }
            }
        }
        touched
    }

    /// Resolve one conflict. Returns `None` for unknown ids.
    pub async fn resolve(
        &self,
        id: &ConflictId,
        resolver: &ConflictResolver,
    ) -> Option<Resolution> {
        let mut state = self.state.lock().await;
        let conflict = state.conflicts.iter_mut().find(|c| &c.id == id)?;
        Some(resolver.resolve(conflict).await)
    }

    /// Resolve every conflict that has no stored resolution yet.
    pub async fn resolve_pending(&self, resolver: &ConflictResolver) -> Vec<Resolution> {
        let mut state = self.state.lock().await;
        let mut resolutions = Vec::new();
        for conflict in state.conflicts.iter_mut().filter(|c| c.resolution.is_none()) {
            resolutions.push(resolver.resolve(conflict).await);
        }
        resolutions
    }

    pub async fn get(&self, id: &ConflictId) -> Option<Conflict> {
        let state = self.state.lock().await;
        state.conflicts.iter().find(|c| &c.id == id).cloned()
    }

    /// Every conflict ever recorded, oldest first.
    pub async fn snapshot(&self) -> Vec<Conflict> {
        self.state.lock().await.conflicts.clone()
    }

    pub async fn unresolved(&self) -> Vec<Conflict> {
        let state = self.state.lock().await;
        state
            .conflicts
            .iter()
            .filter(|c| !c.resolved)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.conflicts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Fold findings that share `(category, business_id)` into one, uniting their
/// platforms and payloads. Order follows first appearance.
fn merge_same_subject(findings: Vec<Finding>) -> Vec<Finding> {
    let mut merged: Vec<Finding> = Vec::with_capacity(findings.len());
    for finding in findings {
        let existing = merged
            .iter_mut()
            .find(|m| m.category == finding.category && m.business_id == finding.business_id);
        match existing {
            Some(into) => {
                into.platforms.extend(finding.platforms);
                into.payloads.extend(finding.payloads);
                into.severity = into.severity.max(finding.severity);
                into.detail = format!("{}; {}", into.detail, finding.detail);
            }
            None => merged.push(finding),
        }
    }
    merged
}
