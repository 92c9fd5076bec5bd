//! Error types for conductor-conflicts.

use thiserror::Error;

/// Failures reported by a [`ResolutionAdvisor`](crate::ResolutionAdvisor).
///
/// These never escape the resolver; they are folded into a
/// `manual_review_required` outcome.
#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("advisor unavailable: {0}")]
    AdvisorUnavailable(String),

    #[error("advisor error: {0}")]
    Advisor(String),
}
