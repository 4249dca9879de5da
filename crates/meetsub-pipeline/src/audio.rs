//! Audio segmentation: chunk boundaries from total duration, extraction through a media tool.
//!
//! `MediaTool` is the seam to the outside world (duration probe + range extraction). The
//! concrete `FfmpegMediaTool` shells out to `ffprobe`/`ffmpeg`; tests substitute fakes.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Default chunk length in seconds.
pub const DEFAULT_CHUNK_LENGTH_SECS: f64 = 30.0;
/// Chunks are extracted as mono audio at this rate.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Failure reported by a media tool.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Exit {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected output: {0}")]
    Output(String),
}

/// Probe and cut audio files.
pub trait MediaTool: Send + Sync {
    /// Total duration of `path` in seconds.
    fn duration(&self, path: &Path) -> Result<f64, MediaError>;

    /// Write `[start, end)` of `path` to `dest` as mono audio at `sample_rate`.
    fn extract(
        &self,
        path: &Path,
        start: f64,
        end: f64,
        sample_rate: u32,
        dest: &Path,
    ) -> Result<(), MediaError>;
}

/// `ffprobe`/`ffmpeg` subprocess adapter.
#[derive(Debug, Clone)]
pub struct FfmpegMediaTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegMediaTool {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn run(tool: &Path, cmd: &mut Command) -> Result<Vec<u8>, MediaError> {
    let name = tool.display().to_string();
    let output = cmd.output().map_err(|source| MediaError::Spawn {
        tool: name.clone(),
        source,
    })?;
    if !output.status.success() {
        return Err(MediaError::Exit {
            tool: name,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

impl FfmpegMediaTool {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

impl MediaTool for FfmpegMediaTool {
    fn duration(&self, path: &Path) -> Result<f64, MediaError> {
        let stdout = run(
            &self.ffprobe,
            Command::new(&self.ffprobe)
                .args(["-v", "quiet", "-print_format", "json", "-show_format"])
                .arg(path),
        )?;
        let probe: ProbeOutput =
            serde_json::from_slice(&stdout).map_err(|e| MediaError::Output(e.to_string()))?;
        let raw = probe
            .format
            .duration
            .ok_or_else(|| MediaError::Output("no duration in probe output".to_string()))?;
        raw.trim()
            .parse::<f64>()
            .map_err(|e| MediaError::Output(format!("duration {raw:?}: {e}")))
    }

    fn extract(
        &self,
        path: &Path,
        start: f64,
        end: f64,
        sample_rate: u32,
        dest: &Path,
    ) -> Result<(), MediaError> {
        run(
            &self.ffmpeg,
            Command::new(&self.ffmpeg)
                .args(["-y", "-v", "error", "-i"])
                .arg(path)
                .arg("-ss")
                .arg(format!("{start:.3}"))
                .arg("-t")
                .arg(format!("{:.3}", end - start))
                .arg("-ar")
                .arg(sample_rate.to_string())
                .args(["-ac", "1"])
                .arg(dest),
        )?;
        Ok(())
    }
}

/// Planned time range for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
}

impl ChunkPlan {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// `"30.0s-60.0s"` style label for progress reports.
    pub fn time_range(&self) -> String {
        format!("{:.1}s-{:.1}s", self.start_time, self.end_time)
    }
}

/// A planned chunk whose audio has been written to `file`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub plan: ChunkPlan,
    pub file: PathBuf,
}

/// Split `[0, total)` into `ceil(total / chunk_length)` contiguous chunks; the last one ends
/// exactly at `total`. Empty when either input is not a positive finite number.
pub fn plan(total_duration: f64, chunk_length: f64) -> Vec<ChunkPlan> {
    let valid = |v: f64| v.is_finite() && v > 0.0;
    if !valid(total_duration) || !valid(chunk_length) {
        return Vec::new();
    }
    let count = (total_duration / chunk_length).ceil() as usize;
    (0..count)
        .map(|i| ChunkPlan {
            index: i,
            start_time: i as f64 * chunk_length,
            end_time: ((i + 1) as f64 * chunk_length).min(total_duration),
        })
        .filter(|c| c.end_time > c.start_time)
        .collect()
}

/// Plans chunks for one file and cuts them through a `MediaTool`.
#[derive(Clone)]
pub struct AudioSegmenter {
    tool: Arc<dyn MediaTool>,
    sample_rate: u32,
}

impl AudioSegmenter {
    pub fn new(tool: Arc<dyn MediaTool>) -> Self {
        Self {
            tool,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Duration of `audio_path`; zero, negative or non-finite is `DurationUnavailable`.
    pub fn probe(&self, audio_path: &Path) -> PipelineResult<f64> {
        let unavailable = |reason: String| PipelineError::DurationUnavailable {
            path: audio_path.to_path_buf(),
            reason,
        };
        let duration = self
            .tool
            .duration(audio_path)
            .map_err(|e| unavailable(e.to_string()))?;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(unavailable(format!("probe returned {duration}")));
        }
        Ok(duration)
    }

    /// Probe `audio_path` and plan its chunks. Returns the total duration as well.
    pub fn plan_file(
        &self,
        audio_path: &Path,
        chunk_length: f64,
    ) -> PipelineResult<(f64, Vec<ChunkPlan>)> {
        if !chunk_length.is_finite() || chunk_length <= 0.0 {
            return Err(PipelineError::SegmentationFailed(format!(
                "chunk length must be positive, got {chunk_length}"
            )));
        }
        let total = self.probe(audio_path)?;
        let chunks = plan(total, chunk_length);
        if chunks.is_empty() {
            return Err(PipelineError::SegmentationFailed(format!(
                "no chunks for {:.3}s of audio",
                total
            )));
        }
        info!(
            "Pipeline: {} is {:.1}s, {} chunk(s) of {}s",
            audio_path.display(),
            total,
            chunks.len(),
            chunk_length
        );
        Ok((total, chunks))
    }

    /// Cut `chunk` out of `audio_path` into `dir` as `<stem>_chunk_<NNN>.wav`.
    pub fn extract(&self, audio_path: &Path, chunk: &ChunkPlan, dir: &Path) -> PipelineResult<Chunk> {
        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        let file = dir.join(format!("{}_chunk_{:03}.wav", stem, chunk.index));
        self.tool
            .extract(
                audio_path,
                chunk.start_time,
                chunk.end_time,
                self.sample_rate,
                &file,
            )
            .map_err(|e| PipelineError::ExtractionFailed {
                index: chunk.index,
                reason: e.to_string(),
            })?;
        debug!("Pipeline: extracted chunk {} to {}", chunk.index, file.display());
        Ok(Chunk { plan: *chunk, file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDuration(Result<f64, &'static str>);

    impl MediaTool for FixedDuration {
        fn duration(&self, _path: &Path) -> Result<f64, MediaError> {
            self.0.map_err(|e| MediaError::Output(e.to_string()))
        }

        fn extract(&self, _: &Path, _: f64, _: f64, _: u32, _: &Path) -> Result<(), MediaError> {
            Err(MediaError::Output("no audio".to_string()))
        }
    }

    fn segmenter(duration: Result<f64, &'static str>) -> AudioSegmenter {
        AudioSegmenter::new(Arc::new(FixedDuration(duration)))
    }

    #[test]
    fn seventy_five_seconds_in_thirty_second_chunks() {
        let chunks = plan(75.0, 30.0);
        let ranges: Vec<(f64, f64)> = chunks.iter().map(|c| (c.start_time, c.end_time)).collect();
        assert_eq!(ranges, vec![(0.0, 30.0), (30.0, 60.0), (60.0, 75.0)]);
        assert_eq!(chunks[2].duration(), 15.0);
        assert_eq!(chunks[1].time_range(), "30.0s-60.0s");
    }

    #[test]
    fn chunks_are_contiguous_and_cover_total() {
        for (total, len) in [(1.0, 30.0), (30.0, 30.0), (61.5, 30.0), (600.0, 45.0), (7.25, 0.5)] {
            let chunks = plan(total, len);
            assert_eq!(chunks.len(), (total / len).ceil() as usize, "{total}/{len}");
            assert_eq!(chunks[0].start_time, 0.0);
            for pair in chunks.windows(2) {
                assert_eq!(pair[0].end_time, pair[1].start_time);
            }
            assert_eq!(chunks.last().unwrap().end_time, total);
        }
    }

    #[test]
    fn invalid_inputs_plan_nothing() {
        assert!(plan(0.0, 30.0).is_empty());
        assert!(plan(f64::NAN, 30.0).is_empty());
        assert!(plan(10.0, 0.0).is_empty());
    }

    #[test]
    fn zero_duration_is_unavailable() {
        let err = segmenter(Ok(0.0))
            .plan_file(Path::new("a.wav"), 30.0)
            .unwrap_err();
        assert!(matches!(err, PipelineError::DurationUnavailable { .. }));
    }

    #[test]
    fn probe_failure_is_unavailable() {
        let err = segmenter(Err("boom")).probe(Path::new("a.wav")).unwrap_err();
        assert!(matches!(err, PipelineError::DurationUnavailable { .. }));
    }

    #[test]
    fn bad_chunk_length_fails_segmentation() {
        let err = segmenter(Ok(10.0))
            .plan_file(Path::new("a.wav"), 0.0)
            .unwrap_err();
        assert!(matches!(err, PipelineError::SegmentationFailed(_)));
    }

    #[test]
    fn extraction_error_names_the_chunk() {
        let s = segmenter(Ok(60.0));
        let (_, chunks) = s.plan_file(Path::new("talk.mp3"), 30.0).unwrap();
        let err = s
            .extract(Path::new("talk.mp3"), &chunks[1], Path::new("/tmp"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionFailed { index: 1, .. }));
    }
}
