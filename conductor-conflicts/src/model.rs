//! Conflict and resolution types.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conductor_core::Platform;

use crate::record::BusinessRecord;

/// Journal-assigned conflict identifier (`cf-000001`, …).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConflictId(pub String);

impl ConflictId {
    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!("cf-{sequence:06}"))
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ConflictId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictCategory {
    DuplicateRecord,
    DataMismatch,
    TimestampConflict,
    ReferenceConflict,
    BusinessRule,
}

impl fmt::Display for ConflictCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictCategory::DuplicateRecord => write!(f, "duplicate_record"),
            ConflictCategory::DataMismatch => write!(f, "data_mismatch"),
            ConflictCategory::TimestampConflict => write!(f, "timestamp_conflict"),
            ConflictCategory::ReferenceConflict => write!(f, "reference_conflict"),
            ConflictCategory::BusinessRule => write!(f, "business_rule"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Strategy that produced a [`Resolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    UseLatestRecord,
    HighestQualityScore,
    AiRecommendation,
    Deferred,
    ManualReviewRequired,
}

impl ResolutionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStrategy::UseLatestRecord => "use_latest_record",
            ResolutionStrategy::HighestQualityScore => "highest_quality_score",
            ResolutionStrategy::AiRecommendation => "ai_recommendation",
            ResolutionStrategy::Deferred => "deferred",
            ResolutionStrategy::ManualReviewRequired => "manual_review_required",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving one conflict. Stored on the conflict once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub conflict_id: ConflictId,
    pub strategy: ResolutionStrategy,
    /// `false` for deferred and manual-review outcomes.
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Platform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<BusinessRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub reason: String,
}

/// A detected cross-platform disagreement for one business identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub category: ConflictCategory,
    pub business_id: String,
    pub platforms: BTreeSet<Platform>,
    pub payloads: BTreeMap<Platform, BusinessRecord>,
    pub severity: Severity,
    pub detail: String,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved_reason: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub detection_count: u32,
}

impl Conflict {
    /// Store `resolution` and derive the resolved flag and unresolved reason from it.
    pub fn apply(&mut self, resolution: &Resolution) {
        self.resolved = resolution.resolved;
        self.unresolved_reason = if resolution.resolved {
            None
        } else {
            Some(resolution.strategy.as_str().to_string())
        };
        self.resolution = Some(resolution.clone());
    }
}
