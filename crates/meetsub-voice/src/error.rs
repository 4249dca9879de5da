//! Error types for the speech engine adapters

use thiserror::Error;

/// Result type alias for engine operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors raised by a speech engine while transcribing one audio file
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("STT API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed STT response: {0}")]
    Response(String),

    #[error("Audio decoding error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for VoiceError {
    fn from(err: reqwest::Error) -> Self {
        VoiceError::Stt(err.to_string())
    }
}

impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::Response(err.to_string())
    }
}
