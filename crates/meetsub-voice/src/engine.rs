//! **Speech engine port**: turn one extracted audio chunk file into time-stamped segments.
//!
//! The pipeline treats the engine as a black box: `transcribe(path) -> segments` with times
//! relative to the start of that file. Implement `SpeechEngine` for local Whisper or a remote
//! OpenAI-compatible transcription endpoint; `PlaceholderEngine` keeps the pipeline runnable
//! without either.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default transcription language (Japanese meetings).
pub const DEFAULT_LANGUAGE: &str = "ja";

/// One recognized span of speech. Times are seconds from the start of the transcribed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl RecognizedSegment {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }
}

/// Everything an engine returns for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    pub segments: Vec<RecognizedSegment>,
    /// Language reported by the engine, when it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Backend for converting an audio file to segments. Implementations must be usable from a
/// dedicated worker thread; the pipeline never calls one engine concurrently for a single task.
pub trait SpeechEngine: Send + Sync {
    /// Transcribe one audio file (16 kHz mono). Return no segments if nothing was detected.
    fn transcribe(&self, audio_path: &Path) -> VoiceResult<EngineOutput>;

    /// Short label for logs.
    fn name(&self) -> &str {
        "engine"
    }
}

/// Placeholder engine: returns fixed segments. Use for wiring tests and dry runs without Whisper/API.
#[derive(Debug, Default, Clone)]
pub struct PlaceholderEngine {
    /// If set, return these instead of the default single-segment message.
    pub segments: Option<Vec<RecognizedSegment>>,
}

impl PlaceholderEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segments(segments: Vec<RecognizedSegment>) -> Self {
        Self {
            segments: Some(segments),
        }
    }
}

impl SpeechEngine for PlaceholderEngine {
    fn transcribe(&self, audio_path: &Path) -> VoiceResult<EngineOutput> {
        if let Some(ref segments) = self.segments {
            return Ok(EngineOutput {
                segments: segments.clone(),
                language: None,
            });
        }
        let name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(EngineOutput {
            segments: vec![RecognizedSegment::new(
                format!("[STT placeholder: {name}; connect Whisper or an STT API]"),
                0.0,
                1.0,
            )],
            language: None,
        })
    }

    fn name(&self) -> &str {
        "placeholder"
    }
}

/// Wire shape of an OpenAI-compatible `verbose_json` transcription response.
#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Parse a `verbose_json` body. Falls back to one segment spanning `duration` when the
/// endpoint returns only flat text.
pub fn parse_verbose_response(body: &str) -> VoiceResult<EngineOutput> {
    let parsed: VerboseTranscription = serde_json::from_str(body)?;
    let mut segments: Vec<RecognizedSegment> = parsed
        .segments
        .into_iter()
        .filter(|s| s.start.is_finite() && s.end.is_finite())
        .map(|s| RecognizedSegment::new(s.text.trim(), s.start, s.end.max(s.start)))
        .filter(|s| !s.text.is_empty())
        .collect();
    if segments.is_empty() {
        let text = parsed.text.trim();
        if !text.is_empty() {
            let end = parsed.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0);
            segments.push(RecognizedSegment::new(text, 0.0, end));
        }
    }
    Ok(EngineOutput {
        segments,
        language: parsed.language,
    })
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("webm") => "audio/webm",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// Production engine: OpenAI-compatible transcription API (OpenAI Whisper, self-hosted
/// faster-whisper servers, etc.). Uses `STT_API_URL`, `STT_API_KEY`, `STT_MODEL` (default
/// whisper-1) and `STT_LANGUAGE` (default ja).
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleEngine {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model: whisper-1, gpt-4o-transcribe, etc.
    pub model: String,
    /// ISO-639-1 language hint sent with every request.
    pub language: String,
    client: reqwest::blocking::Client,
}

impl OpenAiCompatibleEngine {
    /// Build from environment: STT_API_URL, STT_API_KEY, STT_MODEL, STT_LANGUAGE.
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("STT_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| VoiceError::Config("STT requires STT_API_KEY".to_string()))?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let language =
            std::env::var("STT_LANGUAGE").unwrap_or_else(|_| DEFAULT_LANGUAGE.to_string());
        Self::new(base_url, api_key, model, language)
    }

    /// Create with explicit config.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        language: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            language: language.into(),
            client,
        })
    }
}

impl SpeechEngine for OpenAiCompatibleEngine {
    fn transcribe(&self, audio_path: &Path) -> VoiceResult<EngineOutput> {
        let bytes = std::fs::read(audio_path)?;
        if bytes.is_empty() {
            return Ok(EngineOutput::default());
        }
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());
        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        debug!("Engine: uploading {} ({} bytes) to {}", file_name, bytes.len(), url);

        let part = reqwest::blocking::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(audio_path))?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "verbose_json")
            .text("temperature", "0");
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()?;
        let status = res.status();
        let body = res.text()?;
        if !status.is_success() {
            return Err(VoiceError::Api {
                status: status.as_u16(),
                body,
            });
        }
        parse_verbose_response(&body)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

// -----------------------------------------------------------------------------
// Local Whisper engine (optional feature). Requires whisper.cpp/ggml.
// -----------------------------------------------------------------------------
#[cfg(feature = "whisper")]
mod whisper_engine {
    use super::*;
    use std::sync::Mutex;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    const WHISPER_SAMPLE_RATE: u32 = 16000;

    /// Local Whisper engine: loads a ggml model once and runs inference on 16 kHz mono WAV chunks.
    pub struct WhisperEngine {
        #[allow(dead_code)]
        context: WhisperContext,
        state: Mutex<whisper_rs::WhisperState>,
        language: String,
    }

    impl WhisperEngine {
        /// Load the Whisper model from `model_path` (e.g. path to ggml-medium.bin).
        pub fn new(model_path: &str, language: &str) -> VoiceResult<Self> {
            let params = WhisperContextParameters::default();
            let context = WhisperContext::new_with_params(model_path, params)
                .map_err(|e| VoiceError::Stt(format!("Whisper load failed: {}", e)))?;
            let state = context
                .create_state()
                .map_err(|e| VoiceError::Stt(format!("Whisper state init failed: {}", e)))?;
            Ok(Self {
                context,
                state: Mutex::new(state),
                language: language.to_string(),
            })
        }

        fn read_wav(path: &Path) -> VoiceResult<Vec<f32>> {
            let mut reader =
                hound::WavReader::open(path).map_err(|e| VoiceError::Decode(e.to_string()))?;
            let spec = reader.spec();
            if spec.sample_rate != WHISPER_SAMPLE_RATE {
                return Err(VoiceError::Decode(format!(
                    "Whisper expects {} Hz; got {} Hz",
                    WHISPER_SAMPLE_RATE, spec.sample_rate
                )));
            }
            let channels = spec.channels.max(1) as usize;
            let interleaved: Vec<f32> = match spec.sample_format {
                hound::SampleFormat::Float => reader
                    .samples::<f32>()
                    .collect::<Result<_, _>>()
                    .map_err(|e| VoiceError::Decode(e.to_string()))?,
                hound::SampleFormat::Int => reader
                    .samples::<i16>()
                    .map(|s| s.map(|v| v as f32 / 32768.0))
                    .collect::<Result<_, _>>()
                    .map_err(|e| VoiceError::Decode(e.to_string()))?,
            };
            Ok(interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect())
        }
    }

    impl SpeechEngine for WhisperEngine {
        fn transcribe(&self, audio_path: &Path) -> VoiceResult<EngineOutput> {
            let samples = Self::read_wav(audio_path)?;
            if samples.is_empty() {
                return Ok(EngineOutput::default());
            }
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_temperature(0.0);
            params.set_language(Some(&self.language));

            let mut state = self
                .state
                .lock()
                .map_err(|e| VoiceError::Stt(format!("Whisper lock poisoned: {}", e)))?;
            state
                .full(params, &samples)
                .map_err(|e| VoiceError::Stt(format!("Whisper inference failed: {}", e)))?;
            // Segment timestamps are in centiseconds.
            let segments = state
                .as_iter()
                .filter_map(|seg| {
                    let text = seg.to_str().ok()?.trim().to_string();
                    if text.is_empty() {
                        return None;
                    }
                    let start = seg.start_timestamp() as f64 / 100.0;
                    let end = seg.end_timestamp() as f64 / 100.0;
                    Some(RecognizedSegment::new(text, start, end.max(start)))
                })
                .collect();
            Ok(EngineOutput {
                segments,
                language: Some(self.language.clone()),
            })
        }

        fn name(&self) -> &str {
            "whisper"
        }
    }
}

#[cfg(feature = "whisper")]
pub use whisper_engine::WhisperEngine;

/// Create the best available engine from environment.
/// Priority: (1) WhisperEngine if `WHISPER_MODEL_PATH` is set and the model loads (requires the
/// `whisper` feature), (2) OpenAiCompatibleEngine if `STT_API_KEY` is set, (3) PlaceholderEngine.
pub fn create_best_engine() -> VoiceResult<Box<dyn SpeechEngine>> {
    #[cfg(feature = "whisper")]
    {
        if let Ok(path) = std::env::var("WHISPER_MODEL_PATH") {
            let path = path.trim();
            if !path.is_empty() {
                let language = std::env::var("STT_LANGUAGE")
                    .unwrap_or_else(|_| DEFAULT_LANGUAGE.to_string());
                if let Ok(w) = whisper_engine::WhisperEngine::new(path, &language) {
                    return Ok(Box::new(w));
                }
            }
        }
    }
    if let Ok(remote) = OpenAiCompatibleEngine::from_env() {
        return Ok(Box::new(remote));
    }
    Ok(Box::new(PlaceholderEngine::new()))
}
