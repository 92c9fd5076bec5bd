//! Detection rules.
//!
//! Each rule sees the whole pass through a [`RecordIndex`] and reports
//! [`Finding`]s independently of the others; rule order never changes the
//! outcome. Custom rules (e.g. business-rule checks) implement [`ConflictRule`].

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use conductor_core::Platform;

use crate::model::{ConflictCategory, Severity};
use crate::record::{is_empty_value, BusinessRecord, RecordIndex, RecordReference};

/// One rule hit, before it is merged into the conflict journal.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub category: ConflictCategory,
    pub business_id: String,
    pub platforms: BTreeSet<Platform>,
    pub payloads: BTreeMap<Platform, BusinessRecord>,
    pub severity: Severity,
    pub detail: String,
}

impl Finding {
    fn from_copies(
        category: ConflictCategory,
        business_id: &str,
        copies: &BTreeMap<Platform, BusinessRecord>,
        severity: Severity,
        detail: String,
    ) -> Self {
        Self {
            category,
            business_id: business_id.to_string(),
            platforms: copies.keys().cloned().collect(),
            payloads: copies.clone(),
            severity,
            detail,
        }
    }
}

pub trait ConflictRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, index: &RecordIndex) -> Vec<Finding>;
}

// ---------------------------------------------------------------------------
// Duplicate record
// ---------------------------------------------------------------------------

/// Same business id reported by two or more platforms.
#[derive(Debug, Default)]
pub struct DuplicateRecordRule;

impl ConflictRule for DuplicateRecordRule {
    fn name(&self) -> &'static str {
        "duplicate_record"
    }

    fn detect(&self, index: &RecordIndex) -> Vec<Finding> {
        index
            .duplicates()
            .map(|(id, copies)| {
                let platforms: Vec<&str> = copies.keys().map(|p| p.0.as_str()).collect();
                Finding::from_copies(
                    ConflictCategory::DuplicateRecord,
                    id,
                    copies,
                    Severity::Low,
                    format!("reported by {}", platforms.join(", ")),
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Timestamp conflict
// ---------------------------------------------------------------------------

/// Duplicates whose `updated_at` values are further apart than `skew`.
#[derive(Debug)]
pub struct TimestampConflictRule {
    pub skew: Duration,
}

impl ConflictRule for TimestampConflictRule {
    fn name(&self) -> &'static str {
        "timestamp_conflict"
    }

    fn detect(&self, index: &RecordIndex) -> Vec<Finding> {
        let skew = chrono::Duration::from_std(self.skew).unwrap_or(chrono::Duration::MAX);
        let mut findings = Vec::new();
        for (id, copies) in index.duplicates() {
            let stamps: Vec<_> = copies.values().filter_map(|r| r.updated_at).collect();
            let (Some(oldest), Some(newest)) = (stamps.iter().min(), stamps.iter().max()) else {
                continue;
            };
            let spread = newest.signed_duration_since(*oldest);
            if stamps.len() >= 2 && spread > skew {
                findings.push(Finding::from_copies(
                    ConflictCategory::TimestampConflict,
                    id,
                    copies,
                    Severity::Medium,
                    format!("updated_at differs by {}s", spread.num_seconds()),
                ));
            }
        }
        findings
    }
}

// ---------------------------------------------------------------------------
// Data mismatch
// ---------------------------------------------------------------------------

/// Duplicates that disagree on the value of a field they both populate.
#[derive(Debug, Default)]
pub struct DataMismatchRule;

/// Field names whose non-empty values differ across `copies`, sorted.
pub fn differing_fields(copies: &BTreeMap<Platform, BusinessRecord>) -> Vec<String> {
    let mut values: BTreeMap<&str, Vec<&serde_json::Value>> = BTreeMap::new();
    for record in copies.values() {
        for (name, value) in &record.fields {
            if !is_empty_value(value) {
                values.entry(name.as_str()).or_default().push(value);
            }
        }
    }
    values
        .into_iter()
        .filter(|(_, seen)| seen.len() >= 2 && seen.iter().any(|v| *v != seen[0]))
        .map(|(name, _)| name.to_string())
        .collect()
}

impl ConflictRule for DataMismatchRule {
    fn name(&self) -> &'static str {
        "data_mismatch"
    }

    fn detect(&self, index: &RecordIndex) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (id, copies) in index.duplicates() {
            let fields = differing_fields(copies);
            if fields.is_empty() {
                continue;
            }
            let severity = if fields.len() >= 3 {
                Severity::High
            } else {
                Severity::Medium
            };
            findings.push(Finding::from_copies(
                ConflictCategory::DataMismatch,
                id,
                copies,
                severity,
                format!("fields differ: {}", fields.join(", ")),
            ));
        }
        findings
    }
}

// ---------------------------------------------------------------------------
// Reference conflict
// ---------------------------------------------------------------------------

/// A record references an id that the referenced platform did not report.
///
/// Only judged when the referenced platform reported records in the same
/// pass; otherwise there is nothing to compare against.
#[derive(Debug, Default)]
pub struct ReferenceConflictRule;

impl ConflictRule for ReferenceConflictRule {
    fn name(&self) -> &'static str {
        "reference_conflict"
    }

    fn detect(&self, index: &RecordIndex) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (id, copies) in &index.by_id {
            for (platform, record) in copies {
                let dangling: BTreeSet<&RecordReference> = record
                    .references
                    .iter()
                    .filter(|reference| {
                        index
                            .reported(&reference.platform)
                            .is_some_and(|ids| !ids.contains(&reference.id))
                    })
                    .collect();
                if dangling.is_empty() {
                    continue;
                }

                let mut platforms = BTreeSet::from([platform.clone()]);
                platforms.extend(dangling.iter().map(|r| r.platform.clone()));
                let missing: Vec<String> = dangling
                    .iter()
                    .map(|r| format!("{}:{}", r.platform, r.id))
                    .collect();
                findings.push(Finding {
                    category: ConflictCategory::ReferenceConflict,
                    business_id: id.clone(),
                    platforms,
                    payloads: BTreeMap::from([(platform.clone(), record.clone())]),
                    severity: Severity::High,
                    detail: format!("{platform} references missing {}", missing.join(", ")),
                });
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::record::RecordBatch;

    fn batch(entries: Vec<(&str, Vec<BusinessRecord>)>) -> RecordIndex {
        let batch: RecordBatch = entries
            .into_iter()
            .map(|(platform, records)| (Platform::from(platform), records))
            .collect();
        RecordIndex::build(&batch)
    }

    #[test]
    fn single_platform_never_duplicates() {
        let index = batch(vec![(
            "crm",
            vec![BusinessRecord::new("A"), BusinessRecord::new("B")],
        )]);
        assert!(DuplicateRecordRule.detect(&index).is_empty());
    }

    #[test]
    fn timestamp_rule_respects_skew() {
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().expect("t");
        let index = batch(vec![
            ("crm", vec![BusinessRecord::new("A").updated_at(t)]),
            (
                "billing",
                vec![BusinessRecord::new("A").updated_at(t + chrono::Duration::seconds(90))],
            ),
        ]);
        let tight = TimestampConflictRule {
            skew: Duration::from_secs(60),
        };
        let loose = TimestampConflictRule {
            skew: Duration::from_secs(120),
        };
        assert_eq!(tight.detect(&index).len(), 1);
        assert!(loose.detect(&index).is_empty());
    }

    #[test]
    fn mismatch_ignores_fields_empty_on_one_side() {
        let copies = BTreeMap::from([
            (
                Platform::from("crm"),
                BusinessRecord::new("A").field("owner", "sam").field("phone", ""),
            ),
            (
                Platform::from("billing"),
                BusinessRecord::new("A").field("owner", "sam").field("phone", "555"),
            ),
        ]);
        assert!(differing_fields(&copies).is_empty());
    }

    #[test]
    fn reference_to_unreported_platform_is_not_judged() {
        let index = batch(vec![(
            "crm",
            vec![BusinessRecord::new("A").reference("tickets", "T-1")],
        )]);
        assert!(ReferenceConflictRule.detect(&index).is_empty());
    }
}
