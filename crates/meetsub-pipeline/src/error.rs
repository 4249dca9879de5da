//! Error types for the transcription pipeline

use meetsub_terms::TermError;
use meetsub_voice::VoiceError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The media probe could not report a usable duration. Fatal, raised before any chunk work.
    #[error("could not determine duration of {path}: {reason}")]
    DurationUnavailable { path: PathBuf, reason: String },

    #[error("audio could not be segmented: {0}")]
    SegmentationFailed(String),

    /// One chunk could not be cut from the source audio. The orchestrator skips the chunk.
    #[error("failed to extract chunk {index}: {reason}")]
    ExtractionFailed { index: usize, reason: String },

    #[error("speech engine failed on chunk {index}: {source}")]
    EngineFailure {
        index: usize,
        #[source]
        source: VoiceError,
    },

    #[error("speech engine did not answer chunk {index} within {secs}s")]
    EngineTimeout { index: usize, secs: u64 },

    #[error("task cancelled")]
    Cancelled,

    #[error("term store error: {0}")]
    Persistence(#[from] TermError),

    #[error("invalid subtitle input: {0}")]
    Subtitle(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
