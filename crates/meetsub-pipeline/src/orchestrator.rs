//! Chunk orchestrator: drives one transcription run from audio file to subtitle file.
//!
//! Per chunk: boundary check (cancel / pause) → extract → transcribe → cancel check → shift
//! times → correct terms → accumulate → publish progress. After the last chunk the new segments
//! are merged with the pre-existing track and serialized. Chunk files live in a run-scoped temp
//! dir that is dropped on every exit path.

use crate::audio::{AudioSegmenter, ChunkPlan, FfmpegMediaTool};
use crate::config::{EngineFailurePolicy, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::merge::{legacy_before, merge_with_legacy, preview};
use crate::segment::Segment;
use crate::subtitle::{parse_srt, write_subtitle, SubtitleFormat};
use crate::task::{ChunkTiming, TaskHandle, TaskSnapshot, TaskStatus};
use meetsub_terms::{Correction, TermCorrector, TermStore};
use meetsub_voice::{EngineOutput, SpeechEngine, VoiceError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const PROGRESS_ANALYZE: u8 = 5;
const PROGRESS_CHUNKS_START: u8 = 10;
const PROGRESS_CHUNKS_SPAN: u8 = 80;
const PROGRESS_GENERATE: u8 = 90;
const PROGRESS_CLEANUP: u8 = 95;
const PROGRESS_DONE: u8 = 100;
const SAMPLE_LIMIT: usize = 10;

/// One transcription job.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub audio_path: PathBuf,
    pub output_dir: PathBuf,
    pub chunk_length: f64,
    /// Resume point in seconds: chunks ending at or before it are skipped.
    pub start_time_offset: f64,
    /// SRT content of a track produced earlier for the same audio.
    pub existing_subtitle: Option<String>,
    pub format: SubtitleFormat,
    /// Ad-hoc surface → correction pairs applied alongside the learned terms.
    pub term_candidates: BTreeMap<String, String>,
}

impl TranscriptionRequest {
    pub fn new(audio_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            audio_path: audio_path.into(),
            output_dir: output_dir.into(),
            chunk_length: crate::audio::DEFAULT_CHUNK_LENGTH_SECS,
            start_time_offset: 0.0,
            existing_subtitle: None,
            format: SubtitleFormat::default(),
            term_candidates: BTreeMap::new(),
        }
    }

    pub fn chunk_length(mut self, secs: f64) -> Self {
        self.chunk_length = secs;
        self
    }

    pub fn start_time_offset(mut self, secs: f64) -> Self {
        self.start_time_offset = secs;
        self
    }

    pub fn existing_subtitle(mut self, srt: impl Into<String>) -> Self {
        self.existing_subtitle = Some(srt.into());
        self
    }

    pub fn format(mut self, format: SubtitleFormat) -> Self {
        self.format = format;
        self
    }

    pub fn term_candidate(mut self, surface: impl Into<String>, correct: impl Into<String>) -> Self {
        self.term_candidates.insert(surface.into(), correct.into());
        self
    }

    fn output_stem(&self) -> String {
        self.audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "transcript".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighFrequencyTerm {
    pub term: String,
    pub correct: String,
    pub frequency: u32,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionResult {
    pub task_id: String,
    pub segments: Vec<Segment>,
    pub corrections_count: usize,
    /// First corrections applied, at most ten.
    pub corrections_sample: Vec<Correction>,
    /// Wall-clock seconds for the whole run.
    pub processing_time: f64,
    pub audio_duration: f64,
    pub chunks_processed: usize,
    pub total_chunks: usize,
    /// Source indices of chunks skipped after an extraction or engine failure.
    pub failed_chunks: Vec<usize>,
    /// Most frequent learned terms, at most ten.
    pub high_frequency_terms_sample: Vec<HighFrequencyTerm>,
    pub subtitle_path: PathBuf,
    /// Term store write failures; the transcript itself is complete.
    pub persistence_warnings: Vec<String>,
}

/// Runs transcription tasks. One instance may serve many tasks, each on its own thread.
pub struct ChunkOrchestrator {
    engine: Arc<dyn SpeechEngine>,
    segmenter: AudioSegmenter,
    corrector: TermCorrector,
    engine_timeout: Option<Duration>,
    failure_policy: EngineFailurePolicy,
    high_frequency_threshold: u32,
}

impl ChunkOrchestrator {
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        segmenter: AudioSegmenter,
        corrector: TermCorrector,
    ) -> Self {
        Self {
            engine,
            segmenter,
            corrector,
            engine_timeout: None,
            failure_policy: EngineFailurePolicy::default(),
            high_frequency_threshold: meetsub_terms::DEFAULT_HIGH_FREQUENCY,
        }
    }

    /// Wire the ffmpeg media tool and the on-disk term store from `config`.
    pub fn from_config(
        config: &PipelineConfig,
        engine: Arc<dyn SpeechEngine>,
    ) -> PipelineResult<Self> {
        let store = TermStore::open(config.terms_path(), config.corrections_log_path())?;
        let tool = FfmpegMediaTool::new(&config.ffmpeg_bin, &config.ffprobe_bin);
        let segmenter = AudioSegmenter::new(Arc::new(tool)).with_sample_rate(config.sample_rate);
        Ok(Self::new(engine, segmenter, TermCorrector::new(Arc::new(store)))
            .with_engine_timeout(config.engine_timeout())
            .with_failure_policy(config.engine_failure_policy)
            .with_high_frequency_threshold(config.high_frequency_threshold))
    }

    pub fn with_engine_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.engine_timeout = timeout;
        self
    }

    pub fn with_failure_policy(mut self, policy: EngineFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_high_frequency_threshold(mut self, min_frequency: u32) -> Self {
        self.high_frequency_threshold = min_frequency;
        self
    }

    pub fn corrector(&self) -> &TermCorrector {
        &self.corrector
    }

    /// Run `request` on a dedicated thread.
    pub fn spawn(
        self: &Arc<Self>,
        request: TranscriptionRequest,
        handle: TaskHandle,
    ) -> std::io::Result<JoinHandle<PipelineResult<TranscriptionResult>>> {
        let this = Arc::clone(self);
        let short: String = handle.id().chars().take(8).collect();
        thread::Builder::new()
            .name(format!("meetsub-{short}"))
            .spawn(move || this.run(&request, &handle))
    }

    /// Run `request` to completion on the current thread, publishing progress through `handle`.
    /// The terminal snapshot keeps the last published partial segments on error or cancel.
    pub fn run(
        &self,
        request: &TranscriptionRequest,
        handle: &TaskHandle,
    ) -> PipelineResult<TranscriptionResult> {
        let started = Instant::now();
        let mut snap = TaskSnapshot::new(handle.id());
        snap.status = TaskStatus::Processing;
        snap.progress = PROGRESS_ANALYZE;
        snap.message = "Analyzing audio".to_string();
        handle.publish(&snap);
        info!(
            "Pipeline: task {} started for {}",
            handle.id(),
            request.audio_path.display()
        );

        let outcome = self.run_chunks(request, handle, &mut snap, started);
        let status = match &outcome {
            Ok(result) => {
                snap.progress = PROGRESS_DONE;
                snap.message = format!(
                    "Completed: {} segment(s), {} correction(s)",
                    result.segments.len(),
                    result.corrections_count
                );
                snap.partial_segments = result.segments.clone();
                snap.eta_seconds = Some(0.0);
                info!(
                    "Pipeline: task {} completed in {:.1}s",
                    handle.id(),
                    result.processing_time
                );
                TaskStatus::Completed
            }
            Err(PipelineError::Cancelled) => {
                snap.message = "Cancelled".to_string();
                info!("Pipeline: task {} cancelled", handle.id());
                TaskStatus::Cancelled
            }
            Err(e) => {
                snap.message = format!("Failed: {e}");
                snap.error = Some(e.to_string());
                error!("Pipeline: task {} failed: {}", handle.id(), e);
                TaskStatus::Error
            }
        };
        snap.status = status;
        handle.control().finish(status);
        handle.publish(&snap);
        outcome
    }

    fn run_chunks(
        &self,
        request: &TranscriptionRequest,
        handle: &TaskHandle,
        snap: &mut TaskSnapshot,
        started: Instant,
    ) -> PipelineResult<TranscriptionResult> {
        let (audio_duration, plans) = self
            .segmenter
            .plan_file(&request.audio_path, request.chunk_length)?;

        let legacy = request
            .existing_subtitle
            .as_deref()
            .map(parse_srt)
            .unwrap_or_default();
        let offset = request.start_time_offset.max(0.0);
        let seeded = legacy_before(&legacy, offset);

        let pending: Vec<ChunkPlan> = plans.into_iter().filter(|c| c.end_time > offset).collect();
        let total = pending.len();
        snap.total_chunks = total;
        snap.partial_segments = seeded.clone();
        if offset > 0.0 {
            info!(
                "Pipeline: resuming at {:.1}s, {} chunk(s) left, {} existing cue(s) kept",
                offset,
                total,
                seeded.len()
            );
        }

        let workdir = tempfile::Builder::new().prefix("meetsub-").tempdir()?;
        let loop_started = Instant::now();
        let mut produced = seeded;
        let mut new_segments: Vec<Segment> = Vec::new();
        let mut corrections: Vec<Correction> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut failed_chunks: Vec<usize> = Vec::new();
        let mut done = 0usize;

        for (i, chunk) in pending.iter().enumerate() {
            self.checkpoint(handle, snap, i, total)?;

            snap.current_chunk = i + 1;
            snap.progress = chunk_progress(i, total);
            snap.message = format!("Processing chunk {}/{} ({})", i + 1, total, chunk.time_range());
            handle.publish(snap);

            let chunk_started = Instant::now();
            let output = match self.process_chunk(&request.audio_path, chunk, workdir.path()) {
                Ok(output) => output,
                Err(e) if self.skippable(&e) => {
                    warn!("Pipeline: skipping chunk {}: {}", chunk.index, e);
                    failed_chunks.push(chunk.index);
                    snap.progress = chunk_progress(i + 1, total);
                    snap.message = format!("Chunk {}/{} failed: {}", i + 1, total, e);
                    handle.publish(snap);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if handle.control().is_cancelled() {
                info!("Pipeline: discarding output of chunk {} after cancel", chunk.index);
                return Err(PipelineError::Cancelled);
            }

            for recognized in &output.segments {
                let mut segment = Segment::from_recognized(recognized, chunk.start_time);
                let outcome = self
                    .corrector
                    .correct_with_candidates(&segment.text, &request.term_candidates);
                if outcome.is_changed() {
                    segment.original_text = Some(std::mem::replace(&mut segment.text, outcome.text));
                    corrections.extend(outcome.corrections);
                }
                warnings.extend(outcome.learn_errors.iter().map(|e| e.to_string()));
                produced.push(segment.clone());
                new_segments.push(segment);
            }

            let processing_time = chunk_started.elapsed().as_secs_f64();
            done += 1;
            snap.chunk_times.push(ChunkTiming {
                chunk_id: chunk.index,
                time_range: chunk.time_range(),
                processing_time,
            });
            let elapsed = loop_started.elapsed().as_secs_f64();
            snap.eta_seconds = Some(((elapsed / done as f64) * total as f64 - elapsed).max(0.0));
            snap.partial_segments = preview(&produced, &legacy, chunk.end_time);
            snap.progress = chunk_progress(i + 1, total);
            snap.message = format!(
                "Chunk {}/{} done: {} segment(s) in {:.1}s",
                i + 1,
                total,
                output.segments.len(),
                processing_time
            );
            handle.publish(snap);
        }

        if total > 0 && done == 0 {
            return Err(PipelineError::SegmentationFailed(format!(
                "none of {} chunk(s) of {} could be processed",
                total,
                request.audio_path.display()
            )));
        }

        snap.progress = PROGRESS_GENERATE;
        snap.message = "Generating subtitles".to_string();
        handle.publish(snap);
        let segments = merge_with_legacy(&new_segments, &legacy, offset);
        let subtitle_path = write_subtitle(
            &segments,
            &request.output_dir,
            &request.output_stem(),
            request.format,
        )?;

        snap.progress = PROGRESS_CLEANUP;
        snap.message = "Cleaning up".to_string();
        handle.publish(snap);
        if let Err(e) = workdir.close() {
            warn!("Pipeline: failed to remove chunk files: {}", e);
        }

        let high_frequency_terms_sample = self
            .corrector
            .store()
            .high_frequency_ranked(self.high_frequency_threshold, SAMPLE_LIMIT)
            .into_iter()
            .map(|(term, t)| HighFrequencyTerm {
                term,
                correct: t.correct,
                frequency: t.frequency,
            })
            .collect();

        Ok(TranscriptionResult {
            task_id: handle.id().to_string(),
            corrections_count: corrections.len(),
            corrections_sample: corrections.into_iter().take(SAMPLE_LIMIT).collect(),
            segments,
            processing_time: started.elapsed().as_secs_f64(),
            audio_duration,
            chunks_processed: done,
            total_chunks: total,
            failed_chunks,
            high_frequency_terms_sample,
            subtitle_path,
            persistence_warnings: warnings,
        })
    }

    /// Cancel and pause are honored only here, between chunks.
    fn checkpoint(
        &self,
        handle: &TaskHandle,
        snap: &mut TaskSnapshot,
        position: usize,
        total: usize,
    ) -> PipelineResult<()> {
        let control = handle.control();
        if control.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if control.is_paused() {
            snap.status = TaskStatus::Paused;
            snap.message = format!("Paused before chunk {}/{}", position + 1, total);
            handle.publish(snap);
            info!("Pipeline: task {} paused", handle.id());
            if control.wait_while_paused() {
                return Err(PipelineError::Cancelled);
            }
            snap.status = TaskStatus::Processing;
            snap.message = "Resumed".to_string();
            handle.publish(snap);
            info!("Pipeline: task {} resumed", handle.id());
        }
        Ok(())
    }

    fn skippable(&self, e: &PipelineError) -> bool {
        match e {
            PipelineError::ExtractionFailed { .. } => true,
            PipelineError::EngineFailure { .. } => self.failure_policy == EngineFailurePolicy::Skip,
            // The abandoned call may still hold the engine; never start another chunk beside it.
            PipelineError::EngineTimeout { .. } => false,
            _ => false,
        }
    }

    fn process_chunk(
        &self,
        audio_path: &Path,
        chunk: &ChunkPlan,
        workdir: &Path,
    ) -> PipelineResult<EngineOutput> {
        let extracted = self.segmenter.extract(audio_path, chunk, workdir)?;
        let output = self.transcribe(chunk.index, &extracted.file);
        // Chunk files are only needed for the engine call; the temp dir covers early exits.
        let _ = std::fs::remove_file(&extracted.file);
        output
    }

    fn transcribe(&self, index: usize, path: &Path) -> PipelineResult<EngineOutput> {
        let engine_failure = |source: VoiceError| PipelineError::EngineFailure { index, source };
        let Some(limit) = self.engine_timeout else {
            return self.engine.transcribe(path).map_err(engine_failure);
        };

        let (tx, rx) = std::sync::mpsc::channel();
        let engine = Arc::clone(&self.engine);
        let path = path.to_path_buf();
        thread::Builder::new()
            .name(format!("meetsub-engine-{index}"))
            .spawn(move || {
                let _ = tx.send(engine.transcribe(&path));
            })?;
        match rx.recv_timeout(limit) {
            Ok(result) => result.map_err(engine_failure),
            Err(RecvTimeoutError::Timeout) => Err(PipelineError::EngineTimeout {
                index,
                secs: limit.as_secs(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(engine_failure(VoiceError::Stt(
                "engine thread exited without a result".to_string(),
            ))),
        }
    }
}

fn chunk_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return PROGRESS_CHUNKS_START + PROGRESS_CHUNKS_SPAN;
    }
    let span = PROGRESS_CHUNKS_SPAN as usize * done.min(total) / total;
    PROGRESS_CHUNKS_START + span as u8
}
