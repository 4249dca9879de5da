//! Pipeline configuration. Load from TOML or env.
//!
//! Precedence: environment (`MEETSUB__CHUNK_LENGTH_SECS`, ...) > file (`MEETSUB_CONFIG` path,
//! else `config/meetsub.toml` when present) > built-in defaults.

use crate::audio::{DEFAULT_CHUNK_LENGTH_SECS, DEFAULT_SAMPLE_RATE};
use crate::subtitle::SubtitleFormat;
use meetsub_terms::{DEFAULT_HIGH_FREQUENCY, DEFAULT_LOG_FILE, DEFAULT_TERMS_FILE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/meetsub.toml";

/// What the chunk loop does when the speech engine fails on a chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineFailurePolicy {
    /// Fail the whole run.
    #[default]
    Abort,
    /// Record the chunk as failed and continue with the next one.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub chunk_length_secs: f64,
    pub sample_rate: u32,
    /// Directory holding the term documents.
    pub data_dir: PathBuf,
    pub terms_file: String,
    pub corrections_log_file: String,
    pub output_dir: PathBuf,
    pub subtitle_format: SubtitleFormat,
    pub high_frequency_threshold: u32,
    /// Upper bound on one engine call. Unset waits indefinitely. A timed-out call cannot be
    /// interrupted and keeps running in the background, so a timeout ends the run even under
    /// the `skip` policy.
    #[serde(default)]
    pub engine_timeout_secs: Option<u64>,
    #[serde(default)]
    pub engine_failure_policy: EngineFailurePolicy,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_length_secs: DEFAULT_CHUNK_LENGTH_SECS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            data_dir: PathBuf::from("./data"),
            terms_file: DEFAULT_TERMS_FILE.to_string(),
            corrections_log_file: DEFAULT_LOG_FILE.to_string(),
            output_dir: PathBuf::from("./output"),
            subtitle_format: SubtitleFormat::Srt,
            high_frequency_threshold: DEFAULT_HIGH_FREQUENCY,
            engine_timeout_secs: None,
            engine_failure_policy: EngineFailurePolicy::Abort,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load from defaults, the optional config file, then `MEETSUB__*` environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var("MEETSUB_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Same as `load` with an explicit file path. A missing file is skipped.
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        let d = Self::default();
        let builder = config::Config::builder()
            .set_default("chunk_length_secs", d.chunk_length_secs)?
            .set_default("sample_rate", d.sample_rate as i64)?
            .set_default("data_dir", d.data_dir.to_string_lossy().to_string())?
            .set_default("terms_file", d.terms_file)?
            .set_default("corrections_log_file", d.corrections_log_file)?
            .set_default("output_dir", d.output_dir.to_string_lossy().to_string())?
            .set_default("subtitle_format", d.subtitle_format.extension())?
            .set_default("high_frequency_threshold", d.high_frequency_threshold as i64)?
            .set_default("engine_failure_policy", "abort")?
            .set_default("ffmpeg_bin", d.ffmpeg_bin)?
            .set_default("ffprobe_bin", d.ffprobe_bin)?;

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("MEETSUB").separator("__"))
            .build()?;

        built.try_deserialize()
    }

    pub fn terms_path(&self) -> PathBuf {
        self.data_dir.join(&self.terms_file)
    }

    pub fn corrections_log_path(&self) -> PathBuf {
        self.data_dir.join(&self.corrections_log_file)
    }

    pub fn engine_timeout(&self) -> Option<Duration> {
        self.engine_timeout_secs
            .filter(|&s| s > 0)
            .map(Duration::from_secs)
    }
}
