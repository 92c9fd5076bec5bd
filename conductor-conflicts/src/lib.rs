//! Cross-platform conflict detection and resolution for `conductor`.
//!
//! After a scheduling pass, [`ConflictDetector::detect`] runs every rule over
//! the records that pass produced and merges the hits into the shared
//! [`ConflictJournal`]. [`ConflictResolver`] then settles each conflict with
//! the strategy registered for its category, falling back to an optional
//! [`ResolutionAdvisor`].

pub mod detector;
pub mod error;
pub mod journal;
pub mod model;
pub mod record;
pub mod resolver;
pub mod rules;

pub use detector::ConflictDetector;
pub use error::ConflictError;
pub use journal::ConflictJournal;
pub use model::{Conflict, ConflictCategory, ConflictId, Resolution, ResolutionStrategy, Severity};
pub use record::{BusinessRecord, RecordBatch, RecordReference};
pub use resolver::{quality_score, ConflictResolver, ResolutionAdvisor, Suggestion};
pub use rules::{ConflictRule, Finding};
