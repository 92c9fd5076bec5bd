//! Business records as reported by connectors.
//!
//! The engine never interprets payload schema beyond the identifier, the
//! `updated_at` timestamp, and outgoing references.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use conductor_core::Platform;

/// One synced record, opaque apart from identity, timestamp and references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRecord {
    /// Business identifier shared across platforms (e.g. a deal number or email).
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<RecordReference>,
}

impl BusinessRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            updated_at: None,
            fields: BTreeMap::new(),
            references: Vec::new(),
        }
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn reference(mut self, platform: impl Into<Platform>, id: impl Into<String>) -> Self {
        self.references.push(RecordReference {
            platform: platform.into(),
            id: id.into(),
        });
        self
    }
}

/// A pointer from a record to an identifier on another platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordReference {
    pub platform: Platform,
    pub id: String,
}

/// Records synced in one pass, grouped by platform.
pub type RecordBatch = BTreeMap<Platform, Vec<BusinessRecord>>;

/// `null`, blank strings, and empty arrays/objects count as empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Lookup structure built once per detection pass.
#[derive(Debug, Default)]
pub struct RecordIndex {
    /// Business id → platform → record. When a platform reports the same id
    /// twice in one pass, the most recently updated copy wins.
    pub by_id: BTreeMap<String, BTreeMap<Platform, BusinessRecord>>,
    /// Platform → ids it reported in this pass.
    pub ids_by_platform: BTreeMap<Platform, BTreeSet<String>>,
}

impl RecordIndex {
    pub fn build(batch: &RecordBatch) -> Self {
        let mut index = Self::default();
        for (platform, records) in batch {
            let ids = index.ids_by_platform.entry(platform.clone()).or_default();
            for record in records {
                ids.insert(record.id.clone());
                let slot = index.by_id.entry(record.id.clone()).or_default();
                match slot.get(platform) {
                    Some(existing) if existing.updated_at >= record.updated_at => {}
                    _ => {
                        slot.insert(platform.clone(), record.clone());
                    }
                }
            }
        }
        index
    }

    /// Business ids reported by two or more platforms.
    pub fn duplicates(&self) -> impl Iterator<Item = (&String, &BTreeMap<Platform, BusinessRecord>)> {
        self.by_id.iter().filter(|(_, copies)| copies.len() >= 2)
    }

    pub fn reported(&self, platform: &Platform) -> Option<&BTreeSet<String>> {
        self.ids_by_platform.get(platform)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_values() {
        assert!(is_empty_value(&json!(null)));
        assert!(is_empty_value(&json!("  ")));
        assert!(is_empty_value(&json!([])));
        assert!(is_empty_value(&json!({})));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!("x")));
    }

    #[test]
    fn index_keeps_latest_copy_within_platform() {
        let early = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("early");
        let late = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).single().expect("late");
        let mut batch = RecordBatch::new();
        batch.insert(
            Platform::from("crm"),
            vec![
                BusinessRecord::new("D-1").updated_at(late).field("stage", "won"),
                BusinessRecord::new("D-1").updated_at(early).field("stage", "open"),
            ],
        );
        let index = RecordIndex::build(&batch);
        let copy = &index.by_id["D-1"][&Platform::from("crm")];
        assert_eq!(copy.fields["stage"], json!("won"));
        assert_eq!(index.duplicates().count(), 0);
    }

    #[test]
    fn record_deserializes_with_defaults() {
        let record: BusinessRecord = serde_json::from_str(r#"{"id":"acct-7"}"#).expect("parse");
        assert_eq!(record, BusinessRecord::new("acct-7"));
    }
}
