//! Error types for the term store

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for term store operations
pub type TermResult<T> = Result<T, TermError>;

#[derive(Error, Debug)]
pub enum TermError {
    #[error("term store IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("term store document {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize term store: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("surface form must not be empty")]
    EmptySurface,

    #[error("correction for {0:?} must not be empty")]
    EmptyCorrection(String),

    #[error("confidence must be within [0, 1], got {0}")]
    InvalidConfidence(f64),
}
