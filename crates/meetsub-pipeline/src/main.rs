//! meetsub CLI: chunked transcription with learned term correction.
//!
//! Usage:
//!   meetsub transcribe talk.mp3 [--format vtt] [--start-offset 120 --existing-subtitle old.srt]
//!   meetsub learn "じんこうちのう" "人工知能" [--context "..."]
//!   meetsub terms [--min-frequency 3]
//!   meetsub suggest "kubernates cluster"
//!
//! Settings come from `config/meetsub.toml` (or `MEETSUB_CONFIG`) and `MEETSUB__*` env vars.
//! Without STT_API_KEY (or a Whisper build with WHISPER_MODEL_PATH) the placeholder engine runs.

use clap::{Parser, Subcommand};
use meetsub_pipeline::{
    ChunkOrchestrator, PipelineConfig, SubtitleFormat, TaskRegistry, TaskStatus,
    TranscriptionRequest,
};
use meetsub_terms::{TermCorrector, TermStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "meetsub")]
#[command(author, version, about = "Chunked meeting transcription with learned term correction", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transcribe an audio file into subtitles
    Transcribe {
        audio: PathBuf,

        /// Output directory (overrides configured output_dir)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Chunk length in seconds
        #[arg(long)]
        chunk_length: Option<f64>,

        /// Resume from this many seconds into the audio
        #[arg(long, default_value_t = 0.0)]
        start_offset: f64,

        /// SRT file from an earlier run of the same audio
        #[arg(long)]
        existing_subtitle: Option<PathBuf>,

        /// srt, vtt or txt
        #[arg(long)]
        format: Option<SubtitleFormat>,
    },
    /// Teach a correction (user feedback, confidence 1.0)
    Learn {
        original: String,
        corrected: String,

        #[arg(long)]
        context: Option<String>,
    },
    /// List learned terms
    Terms {
        /// Only terms seen at least this many times
        #[arg(long)]
        min_frequency: Option<u32>,
    },
    /// Suggest known terms for each word of TEXT
    Suggest { text: String },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn open_store(config: &PipelineConfig) -> CliResult<Arc<TermStore>> {
    Ok(Arc::new(TermStore::open(
        config.terms_path(),
        config.corrections_log_path(),
    )?))
}

fn main() -> CliResult<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load()?;

    match cli.command {
        Commands::Transcribe {
            audio,
            output_dir,
            chunk_length,
            start_offset,
            existing_subtitle,
            format,
        } => {
            let mut request = TranscriptionRequest::new(
                audio,
                output_dir.unwrap_or_else(|| config.output_dir.clone()),
            )
            .chunk_length(chunk_length.unwrap_or(config.chunk_length_secs))
            .start_time_offset(start_offset)
            .format(format.unwrap_or(config.subtitle_format));
            if let Some(path) = existing_subtitle {
                request = request.existing_subtitle(std::fs::read_to_string(&path)?);
            }
            transcribe(&config, request, cli.json)
        }
        Commands::Learn {
            original,
            corrected,
            context,
        } => {
            let corrector = TermCorrector::new(open_store(&config)?);
            let term = corrector.learn_from_feedback(&original, &corrected, context.as_deref())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&term)?);
            } else {
                println!(
                    "{} -> {} (frequency {}, confidence {:.2})",
                    original, term.correct, term.frequency, term.confidence
                );
            }
            Ok(())
        }
        Commands::Terms { min_frequency } => {
            let store = open_store(&config)?;
            let terms = match min_frequency {
                Some(min) => store.get_high_frequency(min),
                None => store.get_all(),
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&terms)?);
            } else {
                for (surface, term) in &terms {
                    let origin = if term.auto_learned { "auto" } else { "user" };
                    println!(
                        "{}\t{}\t{}\t{:.2}\t{}",
                        surface, term.correct, term.frequency, term.confidence, origin
                    );
                }
            }
            Ok(())
        }
        Commands::Suggest { text } => {
            let corrector = TermCorrector::new(open_store(&config)?);
            let suggestions = corrector.suggest_corrections(&text);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&suggestions)?);
            } else {
                for s in &suggestions {
                    let terms: Vec<String> = s
                        .suggestions
                        .iter()
                        .map(|t| format!("{} -> {}", t.term, t.correct))
                        .collect();
                    println!("{}: {}", s.word, terms.join(", "));
                }
            }
            Ok(())
        }
    }
}

fn transcribe(config: &PipelineConfig, request: TranscriptionRequest, json: bool) -> CliResult<()> {
    let engine = meetsub_voice::create_best_engine()?;
    info!("Pipeline: using {} engine", engine.name());
    let orchestrator = Arc::new(ChunkOrchestrator::from_config(config, Arc::from(engine))?);

    let registry = TaskRegistry::new();
    let (handle, mut progress) = registry.register_with_channel();
    let task_id = handle.id().to_string();
    let worker = orchestrator.spawn(request, handle)?;

    while let Some(snap) = progress.blocking_recv() {
        if !json {
            let eta = snap
                .eta_seconds
                .map(|s| format!(" eta {:.0}s", s))
                .unwrap_or_default();
            eprintln!("[{:>3}%] {}{}", snap.progress, snap.message, eta);
        }
    }

    let outcome = worker
        .join()
        .map_err(|_| format!("worker thread for task {task_id} panicked"))?;
    let status = registry
        .snapshot(&task_id)
        .map(|s| s.status)
        .unwrap_or(TaskStatus::Error);
    let result = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    println!("Status:        {}", status);
    println!("Subtitle:      {}", result.subtitle_path.display());
    println!("Segments:      {}", result.segments.len());
    println!(
        "Chunks:        {}/{} processed",
        result.chunks_processed, result.total_chunks
    );
    if !result.failed_chunks.is_empty() {
        println!("Failed chunks: {:?}", result.failed_chunks);
    }
    println!("Corrections:   {}", result.corrections_count);
    for c in &result.corrections_sample {
        println!("  {} -> {} ({}x)", c.original, c.correct, c.positions.len());
    }
    if !result.high_frequency_terms_sample.is_empty() {
        println!("Frequent terms:");
        for t in &result.high_frequency_terms_sample {
            println!("  {} -> {} ({})", t.term, t.correct, t.frequency);
        }
    }
    for w in &result.persistence_warnings {
        println!("Warning: {}", w);
    }
    println!("Time:          {:.1}s", result.processing_time);
    Ok(())
}
