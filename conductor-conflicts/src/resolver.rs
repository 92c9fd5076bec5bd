//! Conflict resolution: strategy dispatch keyed by category.
//!
//! | category            | strategy                                           |
//! |---------------------|----------------------------------------------------|
//! | duplicate_record    | latest `updated_at`, ties by platform priority     |
//! | timestamp_conflict  | same as duplicate_record                           |
//! | data_mismatch       | highest quality score, ties to the advisor         |
//! | reference_conflict  | always deferred                                    |
//! | business_rule       | advisor                                            |
//!
//! Advisor absence, failure, timeout, or an empty answer degrades to
//! `manual_review_required`; it is never an error for the caller.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use conductor_core::Platform;

use crate::error::ConflictError;
use crate::model::{Conflict, ConflictCategory, Resolution, ResolutionStrategy};
use crate::record::{is_empty_value, BusinessRecord};

pub const COMPLETENESS_WEIGHT: f64 = 0.5;
pub const FRESHNESS_WEIGHT: f64 = 0.2;
pub const CONSISTENCY_WEIGHT: f64 = 0.3;

const SCORE_EPSILON: f64 = 1e-9;
const DEFAULT_ADVISOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Advisory answer from an external (AI) collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    /// Free text; when it names one of the conflicting platforms that payload is adopted.
    pub resolution: String,
    pub confidence: f64,
}

#[async_trait]
pub trait ResolutionAdvisor: Send + Sync {
    async fn suggest(&self, conflict: &Conflict) -> Result<Suggestion, ConflictError>;
}

pub struct ConflictResolver {
    platform_priority: Vec<Platform>,
    advisor: Option<Arc<dyn ResolutionAdvisor>>,
    advisor_timeout: Duration,
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("platform_priority", &self.platform_priority)
            .field("advisor", &self.advisor.is_some())
            .field("advisor_timeout", &self.advisor_timeout)
            .finish()
    }
}

impl ConflictResolver {
    /// `platform_priority` lists platforms strongest first; unknown platforms rank last.
    pub fn new(platform_priority: Vec<Platform>) -> Self {
        Self {
            platform_priority,
            advisor: None,
            advisor_timeout: DEFAULT_ADVISOR_TIMEOUT,
        }
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn ResolutionAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn with_advisor_timeout(mut self, timeout: Duration) -> Self {
        self.advisor_timeout = timeout;
        self
    }

    /// Resolve `conflict` and store the outcome on it.
    ///
    /// A conflict that already carries a resolution gets it back unchanged.
    pub async fn resolve(&self, conflict: &mut Conflict) -> Resolution {
        if let Some(existing) = &conflict.resolution {
            return existing.clone();
        }

        let resolution = match conflict.category {
            ConflictCategory::DuplicateRecord | ConflictCategory::TimestampConflict => {
                self.use_latest(conflict)
            }
            ConflictCategory::DataMismatch => self.highest_quality(conflict).await,
            ConflictCategory::ReferenceConflict => outcome(
                conflict,
                ResolutionStrategy::Deferred,
                "reference validation is external; not auto-resolved",
            ),
            ConflictCategory::BusinessRule => {
                self.ask_advisor(conflict, "no built-in strategy").await
            }
        };

        conflict.apply(&resolution);
        tracing::info!(
            conflict = %conflict.id,
            category = %conflict.category,
            strategy = %resolution.strategy,
            resolved = resolution.resolved,
            "conflict resolution recorded",
        );
        resolution
    }

    fn use_latest(&self, conflict: &Conflict) -> Resolution {
        let winner = conflict.payloads.iter().min_by(|(pa, ra), (pb, rb)| {
            // Later timestamps first; records without one rank last.
            rb.updated_at
                .cmp(&ra.updated_at)
                .then_with(|| self.compare_platforms(pa, pb))
        });

        match winner {
            Some((platform, record)) => Resolution {
                conflict_id: conflict.id.clone(),
                strategy: ResolutionStrategy::UseLatestRecord,
                resolved: true,
                winner: Some(platform.clone()),
                payload: Some(record.clone()),
                recommendation: None,
                confidence: None,
                reason: match record.updated_at {
                    Some(at) => format!("{platform} has the latest update ({})", at.to_rfc3339()),
                    None => format!("no timestamps; {platform} has the highest platform priority"),
                },
            },
            None => outcome(
                conflict,
                ResolutionStrategy::ManualReviewRequired,
                "conflict carries no payloads",
            ),
        }
    }

    async fn highest_quality(&self, conflict: &Conflict) -> Resolution {
        let newest = conflict.payloads.values().filter_map(|r| r.updated_at).max();
        let mut scored: Vec<(&Platform, &BusinessRecord, f64)> = conflict
            .payloads
            .iter()
            .map(|(platform, record)| (platform, record, quality_score(record, newest)))
            .collect();
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.compare_platforms(a.0, b.0))
        });

        match scored.as_slice() {
            [] => outcome(
                conflict,
                ResolutionStrategy::ManualReviewRequired,
                "conflict carries no payloads",
            ),
            [(_, _, best), (_, _, runner_up), ..] if (best - runner_up).abs() < SCORE_EPSILON => {
                self.ask_advisor(conflict, "quality scores tied").await
            }
            [(platform, record, score), ..] => Resolution {
                conflict_id: conflict.id.clone(),
                strategy: ResolutionStrategy::HighestQualityScore,
                resolved: true,
                winner: Some((*platform).clone()),
                payload: Some((*record).clone()),
                recommendation: None,
                confidence: None,
                reason: format!("{platform} has the highest quality score ({score:.3})"),
            },
        }
    }

    async fn ask_advisor(&self, conflict: &Conflict, why: &str) -> Resolution {
        let Some(advisor) = &self.advisor else {
            return outcome(
                conflict,
                ResolutionStrategy::ManualReviewRequired,
                &format!("{why}; no advisor configured"),
            );
        };

        let answer = tokio::time::timeout(self.advisor_timeout, advisor.suggest(conflict)).await;
        let suggestion = match answer {
            Ok(Ok(suggestion)) if !suggestion.resolution.trim().is_empty() => suggestion,
            Ok(Ok(_)) => {
                return outcome(
                    conflict,
                    ResolutionStrategy::ManualReviewRequired,
                    &format!("{why}; advisor returned no recommendation"),
                )
            }
            Ok(Err(err)) => {
                tracing::warn!(conflict = %conflict.id, error = %err, "advisor failed");
                return outcome(
                    conflict,
                    ResolutionStrategy::ManualReviewRequired,
                    &format!("{why}; advisor failed: {err}"),
                );
            }
            Err(_) => {
                tracing::warn!(conflict = %conflict.id, "advisor timed out");
                return outcome(
                    conflict,
                    ResolutionStrategy::ManualReviewRequired,
                    &format!("{why}; advisor timed out"),
                );
            }
        };

        let recommendation = suggestion.resolution.trim().to_string();
        let chosen = conflict
            .payloads
            .iter()
            .find(|(platform, _)| platform.0.eq_ignore_ascii_case(&recommendation));
        Resolution {
            conflict_id: conflict.id.clone(),
            strategy: ResolutionStrategy::AiRecommendation,
            resolved: true,
            winner: chosen.map(|(platform, _)| platform.clone()),
            payload: chosen.map(|(_, record)| record.clone()),
            confidence: Some(suggestion.confidence),
            reason: format!("{why}; advisor recommended '{recommendation}'"),
            recommendation: Some(recommendation),
        }
    }

    fn compare_platforms(&self, a: &Platform, b: &Platform) -> Ordering {
        let rank = |p: &Platform| {
            self.platform_priority
                .iter()
                .position(|candidate| candidate == p)
                .unwrap_or(usize::MAX)
        };
        rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
    }
}

/// Deterministic data-quality score in `0.3..=1.0`.
///
/// completeness (fraction of non-empty fields) × 0.5, freshness × 0.2 where
/// freshness is `0` without a timestamp and `1 / (1 + age_days)` measured
/// against `newest`, plus a fixed consistency baseline of 0.3.
pub fn quality_score(record: &BusinessRecord, newest: Option<DateTime<Utc>>) -> f64 {
    let completeness = if record.fields.is_empty() {
        0.0
    } else {
        let filled = record.fields.values().filter(|v| !is_empty_value(v)).count();
        filled as f64 / record.fields.len() as f64
    };

    let freshness = match (record.updated_at, newest) {
        (Some(at), Some(newest)) => {
            let age_days = newest.signed_duration_since(at).num_seconds().max(0) as f64 / 86_400.0;
            1.0 / (1.0 + age_days)
        }
        (Some(_), None) => 1.0,
        (None, _) => 0.0,
    };

    COMPLETENESS_WEIGHT * completeness + FRESHNESS_WEIGHT * freshness + CONSISTENCY_WEIGHT
}

fn outcome(conflict: &Conflict, strategy: ResolutionStrategy, reason: &str) -> Resolution {
    Resolution {
        conflict_id: conflict.id.clone(),
        strategy,
        resolved: false,
        winner: None,
        payload: None,
        recommendation: None,
        confidence: None,
        reason: reason.to_string(),
    }
}
