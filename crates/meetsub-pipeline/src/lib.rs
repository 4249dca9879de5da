//! # meetsub-pipeline
//!
//! Chunked transcription of long audio: split into fixed-length chunks, transcribe each through
//! a `SpeechEngine`, correct learned terms, merge with an earlier subtitle track and write
//! SRT/WebVTT/text. Runs are registered in a `TaskRegistry` and can be paused, resumed and
//! cancelled between chunks.

pub mod audio;
pub mod config;
pub mod error;
pub mod merge;
pub mod orchestrator;
pub mod segment;
pub mod subtitle;
pub mod task;

pub use audio::{plan, AudioSegmenter, Chunk, ChunkPlan, FfmpegMediaTool, MediaError, MediaTool};
pub use config::{EngineFailurePolicy, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use merge::merge_with_legacy;
pub use orchestrator::{
    ChunkOrchestrator, HighFrequencyTerm, TranscriptionRequest, TranscriptionResult,
};
pub use segment::Segment;
pub use subtitle::{parse_srt, SubtitleFormat};
pub use task::{
    ChunkTiming, ControlError, TaskControl, TaskHandle, TaskId, TaskRegistry, TaskSnapshot,
    TaskStatus,
};
