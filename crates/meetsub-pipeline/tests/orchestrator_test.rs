//! End-to-end orchestrator runs against scripted media and engine fakes.

use meetsub_pipeline::{
    AudioSegmenter, ChunkOrchestrator, ControlError, EngineFailurePolicy, MediaError, MediaTool,
    PipelineError, Segment, TaskRegistry, TaskStatus, TranscriptionRequest,
};
use meetsub_terms::{TermCorrector, TermStore};
use meetsub_voice::{EngineOutput, RecognizedSegment, SpeechEngine, VoiceError, VoiceResult};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

type Hook = Box<dyn FnOnce() + Send>;

/// Media tool with a fixed duration that writes a stub file per chunk.
struct FakeMedia {
    duration: f64,
    fail: HashSet<usize>,
    dirs: Mutex<Vec<PathBuf>>,
}

impl FakeMedia {
    fn new(duration: f64) -> Self {
        Self {
            duration,
            fail: HashSet::new(),
            dirs: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, index: usize) -> Self {
        self.fail.insert(index);
        self
    }
}

impl MediaTool for FakeMedia {
    fn duration(&self, _path: &Path) -> Result<f64, MediaError> {
        Ok(self.duration)
    }

    fn extract(
        &self,
        _path: &Path,
        start: f64,
        _end: f64,
        _sample_rate: u32,
        dest: &Path,
    ) -> Result<(), MediaError> {
        let index = chunk_index(dest);
        if self.fail.contains(&index) {
            return Err(MediaError::Output(format!("cannot cut chunk at {start}")));
        }
        if let Some(dir) = dest.parent() {
            self.dirs.lock().unwrap().push(dir.to_path_buf());
        }
        std::fs::write(dest, b"RIFF").map_err(|e| MediaError::Output(e.to_string()))
    }
}

fn chunk_index(path: &Path) -> usize {
    let stem = path.file_stem().unwrap().to_string_lossy();
    stem.rsplit('_').next().unwrap().parse().unwrap()
}

/// Engine answering `chunk <i> <suffix>` at 10..16 s of each chunk, with per-chunk hooks.
struct ScriptedEngine {
    suffix: String,
    fail: HashSet<usize>,
    delay: HashMap<usize, Duration>,
    hooks: Mutex<HashMap<usize, Hook>>,
    calls: Mutex<Vec<usize>>,
}

impl ScriptedEngine {
    fn new(suffix: &str) -> Self {
        Self {
            suffix: suffix.to_string(),
            fail: HashSet::new(),
            delay: HashMap::new(),
            hooks: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, index: usize) -> Self {
        self.fail.insert(index);
        self
    }

    fn slow(mut self, index: usize, delay: Duration) -> Self {
        self.delay.insert(index, delay);
        self
    }

    fn on_chunk(&self, index: usize, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().unwrap().insert(index, Box::new(hook));
    }

    fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

impl SpeechEngine for ScriptedEngine {
    fn transcribe(&self, audio_path: &Path) -> VoiceResult<EngineOutput> {
        let index = chunk_index(audio_path);
        self.calls.lock().unwrap().push(index);
        let hook = self.hooks.lock().unwrap().remove(&index);
        if let Some(hook) = hook {
            hook();
        }
        if let Some(delay) = self.delay.get(&index) {
            thread::sleep(*delay);
        }
        if self.fail.contains(&index) {
            return Err(VoiceError::Stt(format!("engine rejected chunk {index}")));
        }
        Ok(EngineOutput {
            segments: vec![RecognizedSegment::new(
                format!("chunk {} {}", index, self.suffix),
                10.0,
                16.0,
            )],
            language: Some("ja".to_string()),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct Fixture {
    _data: TempDir,
    out: TempDir,
    store: Arc<TermStore>,
    media: Arc<FakeMedia>,
    engine: Arc<ScriptedEngine>,
    registry: TaskRegistry,
}

impl Fixture {
    fn new(media: FakeMedia, engine: ScriptedEngine) -> Self {
        let data = TempDir::new().unwrap();
        let store = Arc::new(TermStore::open_in(data.path()).unwrap());
        Self {
            _data: data,
            out: TempDir::new().unwrap(),
            store,
            media: Arc::new(media),
            engine: Arc::new(engine),
            registry: TaskRegistry::new(),
        }
    }

    fn orchestrator(&self) -> ChunkOrchestrator {
        let media: Arc<dyn MediaTool> = self.media.clone();
        let engine: Arc<dyn SpeechEngine> = self.engine.clone();
        ChunkOrchestrator::new(
            engine,
            AudioSegmenter::new(media),
            TermCorrector::new(Arc::clone(&self.store)),
        )
    }

    fn request(&self) -> TranscriptionRequest {
        TranscriptionRequest::new("/meetings/weekly.mp3", self.out.path()).chunk_length(30.0)
    }
}

fn texts(segments: &[Segment]) -> Vec<&str> {
    segments.iter().map(|s| s.text.as_str()).collect()
}

fn wait_for_status(registry: &TaskRegistry, id: &str, status: TaskStatus) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while registry.snapshot(id).map(|s| s.status) != Some(status) {
        assert!(Instant::now() < deadline, "task never reached {status}");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn full_run_shifts_corrects_and_writes_subtitles() {
    let fx = Fixture::new(FakeMedia::new(75.0), ScriptedEngine::new("AI"));
    fx.store.learn("AI", "人工知能", None, 1.0).unwrap();
    let (handle, mut progress) = fx.registry.register_with_channel();
    let id = handle.id().to_string();

    let result = fx.orchestrator().run(&fx.request(), &handle).unwrap();

    assert_eq!(result.total_chunks, 3);
    assert_eq!(result.chunks_processed, 3);
    let starts: Vec<f64> = result.segments.iter().map(|s| s.start).collect();
    assert_eq!(starts, vec![10.0, 40.0, 70.0]);
    assert_eq!(texts(&result.segments), vec!["chunk 0 人工知能", "chunk 1 人工知能", "chunk 2 人工知能"]);
    assert_eq!(result.segments[0].original_text.as_deref(), Some("chunk 0 AI"));
    assert_eq!(result.corrections_count, 3);
    assert!(result.failed_chunks.is_empty());
    assert!(result.persistence_warnings.is_empty());

    assert_eq!(result.subtitle_path, fx.out.path().join("weekly.srt"));
    let srt = std::fs::read_to_string(&result.subtitle_path).unwrap();
    assert!(srt.starts_with("1\n00:00:10,000 --> 00:00:16,000\nchunk 0 人工知能\n"));

    for dir in fx.media.dirs.lock().unwrap().iter() {
        assert!(!dir.exists(), "chunk dir {} left behind", dir.display());
    }

    let snap = fx.registry.snapshot(&id).unwrap();
    assert_eq!(snap.status, TaskStatus::Completed);
    assert_eq!(snap.progress, 100);
    assert_eq!(snap.chunk_times.len(), 3);
    assert_eq!(snap.chunk_times[1].time_range, "30.0s-60.0s");

    drop(handle);
    let mut seen = Vec::new();
    while let Ok(s) = progress.try_recv() {
        seen.push(s.progress);
    }
    assert_eq!(seen.first(), Some(&5));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    assert!(seen.contains(&90) && seen.contains(&95));
    assert_eq!(seen.last(), Some(&100));
}

#[test]
fn resume_offset_skips_chunks_and_merges_legacy_track() {
    let fx = Fixture::new(FakeMedia::new(75.0), ScriptedEngine::new("new"));
    let legacy = "\
1
00:00:05,000 --> 00:00:08,000
intro

2
00:00:38,000 --> 00:00:42,000
straddle

3
00:00:45,000 --> 00:00:47,000
overlapped

4
00:00:50,000 --> 00:00:52,000
gap

5
00:01:20,000 --> 00:01:22,000
tail
";
    let request = fx
        .request()
        .start_time_offset(40.0)
        .existing_subtitle(legacy);
    let handle = fx.registry.register(None);

    let result = fx.orchestrator().run(&request, &handle).unwrap();

    assert_eq!(result.total_chunks, 2);
    assert_eq!(fx.engine.calls(), vec![1, 2]);
    assert_eq!(
        texts(&result.segments),
        vec!["intro", "chunk 1 new", "gap", "chunk 2 new", "tail"]
    );
}

#[test]
fn cancel_during_second_chunk_keeps_only_first_chunk() {
    let fx = Fixture::new(FakeMedia::new(90.0), ScriptedEngine::new("x"));
    let handle = fx.registry.register(None);
    let id = handle.id().to_string();
    {
        let registry = fx.registry.clone();
        let id = id.clone();
        fx.engine.on_chunk(1, move || registry.cancel(&id).unwrap());
    }

    let err = fx.orchestrator().run(&fx.request(), &handle).unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(fx.engine.calls(), vec![0, 1]);
    let snap = fx.registry.snapshot(&id).unwrap();
    assert_eq!(snap.status, TaskStatus::Cancelled);
    assert_eq!(snap.error, None);
    assert_eq!(texts(&snap.partial_segments), vec!["chunk 0 x"]);
    assert!(!fx.out.path().join("weekly.srt").exists());
    assert_eq!(
        fx.registry.cancel(&id),
        Err(ControlError::NotActive {
            id: id.clone(),
            status: TaskStatus::Cancelled
        })
    );
}

#[test]
fn extraction_failure_skips_chunk() {
    let fx = Fixture::new(FakeMedia::new(90.0).failing(1), ScriptedEngine::new("x"));
    let handle = fx.registry.register(None);

    let result = fx.orchestrator().run(&fx.request(), &handle).unwrap();

    assert_eq!(result.failed_chunks, vec![1]);
    assert_eq!(result.chunks_processed, 2);
    assert_eq!(texts(&result.segments), vec!["chunk 0 x", "chunk 2 x"]);
}

#[test]
fn run_fails_when_no_chunk_survives() {
    let fx = Fixture::new(FakeMedia::new(60.0).failing(0).failing(1), ScriptedEngine::new("x"));
    let handle = fx.registry.register(None);
    let id = handle.id().to_string();

    let err = fx.orchestrator().run(&fx.request(), &handle).unwrap_err();

    assert!(matches!(err, PipelineError::SegmentationFailed(_)));
    assert!(fx.engine.calls().is_empty());
    assert_eq!(fx.registry.snapshot(&id).unwrap().status, TaskStatus::Error);
    assert!(!fx.out.path().join("weekly.srt").exists());
}

#[test]
fn skipping_every_engine_failure_still_fails_the_run() {
    let fx = Fixture::new(
        FakeMedia::new(60.0),
        ScriptedEngine::new("x").failing(0).failing(1),
    );
    let handle = fx.registry.register(None);

    let err = fx
        .orchestrator()
        .with_failure_policy(EngineFailurePolicy::Skip)
        .run(&fx.request(), &handle)
        .unwrap_err();

    assert!(matches!(err, PipelineError::SegmentationFailed(_)));
    assert_eq!(fx.engine.calls(), vec![0, 1]);
    assert!(!fx.out.path().join("weekly.srt").exists());
}

#[test]
fn engine_failure_aborts_and_preserves_partial_output() {
    let fx = Fixture::new(FakeMedia::new(90.0), ScriptedEngine::new("x").failing(1));
    let handle = fx.registry.register(None);
    let id = handle.id().to_string();

    let err = fx.orchestrator().run(&fx.request(), &handle).unwrap_err();

    assert!(matches!(err, PipelineError::EngineFailure { index: 1, .. }));
    let snap = fx.registry.snapshot(&id).unwrap();
    assert_eq!(snap.status, TaskStatus::Error);
    assert!(snap.error.unwrap().contains("chunk 1"));
    assert_eq!(texts(&snap.partial_segments), vec!["chunk 0 x"]);
}

#[test]
fn engine_failure_can_be_skipped() {
    let fx = Fixture::new(FakeMedia::new(90.0), ScriptedEngine::new("x").failing(1));
    let handle = fx.registry.register(None);

    let result = fx
        .orchestrator()
        .with_failure_policy(EngineFailurePolicy::Skip)
        .run(&fx.request(), &handle)
        .unwrap();

    assert_eq!(result.failed_chunks, vec![1]);
    assert_eq!(texts(&result.segments), vec!["chunk 0 x", "chunk 2 x"]);
}

#[test]
fn slow_engine_times_out() {
    let fx = Fixture::new(
        FakeMedia::new(30.0),
        ScriptedEngine::new("x").slow(0, Duration::from_millis(500)),
    );
    let handle = fx.registry.register(None);

    let err = fx
        .orchestrator()
        .with_engine_timeout(Some(Duration::from_millis(50)))
        .run(&fx.request(), &handle)
        .unwrap_err();

    assert!(matches!(err, PipelineError::EngineTimeout { index: 0, .. }));
}

#[test]
fn timeout_ends_run_even_when_skipping() {
    let fx = Fixture::new(
        FakeMedia::new(60.0),
        ScriptedEngine::new("x").slow(0, Duration::from_millis(500)),
    );
    let handle = fx.registry.register(None);

    let err = fx
        .orchestrator()
        .with_failure_policy(EngineFailurePolicy::Skip)
        .with_engine_timeout(Some(Duration::from_millis(50)))
        .run(&fx.request(), &handle)
        .unwrap_err();

    assert!(matches!(err, PipelineError::EngineTimeout { index: 0, .. }));
    assert_eq!(fx.engine.calls(), vec![0]);
    assert!(!fx.out.path().join("weekly.srt").exists());
}

#[test]
fn unknown_duration_fails_before_chunk_work() {
    let fx = Fixture::new(FakeMedia::new(0.0), ScriptedEngine::new("x"));
    let handle = fx.registry.register(None);
    let id = handle.id().to_string();

    let err = fx.orchestrator().run(&fx.request(), &handle).unwrap_err();

    assert!(matches!(err, PipelineError::DurationUnavailable { .. }));
    assert!(fx.engine.calls().is_empty());
    assert_eq!(fx.registry.snapshot(&id).unwrap().status, TaskStatus::Error);
}

#[test]
fn pause_blocks_until_resume() {
    let fx = Fixture::new(FakeMedia::new(90.0), ScriptedEngine::new("x"));
    let handle = fx.registry.register(None);
    let id = handle.id().to_string();
    {
        let registry = fx.registry.clone();
        let id = id.clone();
        fx.engine.on_chunk(0, move || registry.pause(&id).unwrap());
    }
    let orchestrator = Arc::new(fx.orchestrator());
    let worker = orchestrator.spawn(fx.request(), handle).unwrap();

    wait_for_status(&fx.registry, &id, TaskStatus::Paused);
    let snap = fx.registry.snapshot(&id).unwrap();
    assert_eq!(texts(&snap.partial_segments), vec!["chunk 0 x"]);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(fx.engine.calls(), vec![0]);

    fx.registry.resume(&id).unwrap();
    let result = worker.join().unwrap().unwrap();
    assert_eq!(result.chunks_processed, 3);
    assert_eq!(fx.registry.snapshot(&id).unwrap().status, TaskStatus::Completed);
    assert!(fx.registry.pause(&id).is_err());
}

#[test]
fn cancel_wakes_paused_task() {
    let fx = Fixture::new(FakeMedia::new(90.0), ScriptedEngine::new("x"));
    let handle = fx.registry.register(None);
    let id = handle.id().to_string();
    {
        let registry = fx.registry.clone();
        let id = id.clone();
        fx.engine.on_chunk(0, move || registry.pause(&id).unwrap());
    }
    let orchestrator = Arc::new(fx.orchestrator());
    let worker = orchestrator.spawn(fx.request(), handle).unwrap();

    wait_for_status(&fx.registry, &id, TaskStatus::Paused);
    fx.registry.cancel(&id).unwrap();

    assert!(matches!(worker.join().unwrap(), Err(PipelineError::Cancelled)));
    let snap = fx.registry.snapshot(&id).unwrap();
    assert_eq!(snap.status, TaskStatus::Cancelled);
    assert_eq!(texts(&snap.partial_segments), vec!["chunk 0 x"]);
}

#[test]
fn ad_hoc_candidates_are_learned_during_run() {
    let fx = Fixture::new(FakeMedia::new(60.0), ScriptedEngine::new("ジーベース"));
    let handle = fx.registry.register(None);
    let request = fx.request().term_candidate("ジーベース", "GBase");

    let result = fx
        .orchestrator()
        .with_high_frequency_threshold(1)
        .run(&request, &handle)
        .unwrap();

    assert_eq!(texts(&result.segments), vec!["chunk 0 GBase", "chunk 1 GBase"]);
    let term = fx.store.get_term("ジーベース").unwrap();
    assert!(term.auto_learned);
    assert_eq!(term.frequency, 1);
    assert_eq!(result.high_frequency_terms_sample.len(), 1);
    assert_eq!(result.high_frequency_terms_sample[0].correct, "GBase");
}
