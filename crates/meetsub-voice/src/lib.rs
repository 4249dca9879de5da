//! # meetsub-voice: speech engine adapters
//!
//! The transcription pipeline consumes speech recognition as an opaque function:
//! audio chunk file → `[{text, start, end}]`. This crate defines that port (`SpeechEngine`)
//! and ships the adapters used by the `meetsub` binary.

pub mod engine;
pub mod error;

pub use engine::{
    create_best_engine, parse_verbose_response, EngineOutput, OpenAiCompatibleEngine,
    PlaceholderEngine, RecognizedSegment, SpeechEngine, DEFAULT_LANGUAGE,
};
#[cfg(feature = "whisper")]
pub use engine::WhisperEngine;
pub use error::{VoiceError, VoiceResult};
