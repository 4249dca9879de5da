//! meetsub-terms: learned vocabulary for transcript correction.
//!
//! - `TermStore`: persistent surface form → correction mapping plus an append-only log.
//! - `TermCorrector`: longest-match, non-overlapping substitution with auto-learning.

pub mod corrector;
pub mod error;
pub mod store;

pub use corrector::{Correction, CorrectionOutcome, SuggestedTerm, Suggestion, TermCorrector};
pub use error::{TermError, TermResult};
pub use store::{
    CorrectionRecord, Term, TermMap, TermStore, AUTO_LEARN_CONFIDENCE, DEFAULT_HIGH_FREQUENCY,
    DEFAULT_LOG_FILE, DEFAULT_TERMS_FILE, FEEDBACK_CONFIDENCE,
};
