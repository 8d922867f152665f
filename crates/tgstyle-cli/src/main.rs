use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tgstyle_contracts::storage::{
    AnalysisRecord, ClientLogBook, ClientLogEntry, HistoryStore, LocalStore,
};
use tgstyle_engine::compress::TRANSMISSION_BUDGET_BYTES;
use tgstyle_engine::{ImageCompressor, StyleAnalyzer};
use tracing::warn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod config;
mod server;

use config::{Overrides, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "tgstyle", version, about = "Style analysis backend for the Telegram Mini App")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Classify one image and print the result as JSON.
    Analyze(AnalyzeArgs),
    /// Shrink an image to the upload budget.
    Compress(CompressArgs),
    /// Inspect or edit a local 4-slot history store.
    History(HistoryArgs),
}

#[derive(Debug, Clone, Args)]
struct SourceArgs {
    /// Vision server base URL (falls back to TGSTYLE_INFERENCE_URL).
    #[arg(long)]
    inference_url: Option<String>,
    /// Skip the vision server entirely.
    #[arg(long)]
    no_inference: bool,
    /// Linear classifier JSON (falls back to TGSTYLE_MODEL_PATH).
    #[arg(long)]
    model: Option<PathBuf>,
    /// Seed for the simulated fallback and comment shuffling.
    #[arg(long)]
    seed: Option<u64>,
}

impl SourceArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            inference_url: self.inference_url.clone(),
            no_inference: self.no_inference,
            model: self.model.clone(),
            seed: self.seed,
            ..Overrides::default()
        }
    }

    fn analyzer(&self) -> StyleAnalyzer {
        StyleAnalyzer::from_config(&config::resolver_config_from_env(&self.overrides()))
    }
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,
    #[arg(long)]
    log_dir: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    /// strict | development
    #[arg(long)]
    auth_mode: Option<String>,
    #[command(flatten)]
    sources: SourceArgs,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    image: PathBuf,
    #[command(flatten)]
    sources: SourceArgs,
}

#[derive(Debug, Parser)]
struct CompressArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value_t = 1.5)]
    max_mb: f64,
    /// Width cap, applied only when the input exceeds the size budget.
    #[arg(long, default_value_t = 1280)]
    max_width: u32,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    /// JSON file standing in for the client's local storage.
    #[arg(long)]
    store: PathBuf,
    #[command(subcommand)]
    action: HistoryAction,
}

#[derive(Debug, Subcommand)]
enum HistoryAction {
    List,
    Add {
        #[arg(long)]
        image: PathBuf,
        #[command(flatten)]
        sources: SourceArgs,
    },
    Delete {
        #[arg(long)]
        index: usize,
    },
    /// Print (or clear) the client log book kept next to the history.
    Logs {
        #[arg(long)]
        clear: bool,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("tgstyle error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::Analyze(args) => run_analyze(args),
        Command::Compress(args) => run_compress(args),
        Command::History(args) => run_history(args),
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    init_tracing("info");
    let overrides = Overrides {
        bind: args.bind,
        log_dir: args.log_dir,
        events: args.events,
        auth_mode: args.auth_mode,
        ..args.sources.overrides()
    };
    let config = ServerConfig::from_env(&overrides)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(server::serve(config))?;
    Ok(0)
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    init_tracing("warn");
    let bytes = fs::read(&args.image)
        .with_context(|| format!("failed reading {}", args.image.display()))?;
    let outcome = args.sources.analyzer().analyze_photo(&bytes)?;
    print_json(&json!({
        "classification": outcome.classification,
        "comments": outcome.comments,
        "analysis": outcome.analysis_html,
        "attempts": outcome
            .attempts
            .iter()
            .map(|attempt| json!({ "source": attempt.source, "error": attempt.error }))
            .collect::<Vec<Value>>(),
    }))?;
    Ok(0)
}

fn run_compress(args: CompressArgs) -> Result<i32> {
    init_tracing("warn");
    if !(args.max_mb.is_finite() && args.max_mb > 0.0) {
        bail!("--max-mb must be a positive number");
    }
    let bytes = fs::read(&args.image)
        .with_context(|| format!("failed reading {}", args.image.display()))?;
    let budget = (args.max_mb * 1024.0 * 1024.0) as usize;
    let compressed = ImageCompressor::transmission()
        .with_max_width(args.max_width)
        .compress(&bytes, budget)?;
    if compressed.dimensions.is_none() {
        warn!(
            bytes = bytes.len(),
            budget, "input already within budget; written unchanged and --max-width ignored"
        );
    }
    if let Some(parent) = args.out.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&args.out, &compressed.bytes)
        .with_context(|| format!("failed writing {}", args.out.display()))?;
    print_json(&json!({
        "out": args.out.to_string_lossy(),
        "original_bytes": bytes.len(),
        "bytes": compressed.bytes.len(),
        "dimensions": compressed.dimensions.map(|(w, h)| format!("{w}x{h}")),
        "quality": compressed.quality,
        "within_budget": compressed.within_budget,
    }))?;
    Ok(if compressed.within_budget { 0 } else { 2 })
}

fn run_history(args: HistoryArgs) -> Result<i32> {
    init_tracing("warn");
    let local = LocalStore::new(&args.store);
    let history = HistoryStore::new(local.clone());
    let log_book = ClientLogBook::new(local);
    match args.action {
        HistoryAction::List => {
            let slots = history.load();
            let rows: Vec<Value> = slots
                .iter()
                .enumerate()
                .map(|(index, slot)| slot_summary(index, slot.as_ref()))
                .collect();
            print_json(&Value::Array(rows))?;
        }
        HistoryAction::Add { image, sources } => {
            let raw = fs::read(&image)
                .with_context(|| format!("failed reading {}", image.display()))?;
            let upload = ImageCompressor::transmission().compress(&raw, TRANSMISSION_BUDGET_BYTES)?;
            let analyzer = sources.analyzer();
            let outcome = analyzer.analyze_photo(&upload.bytes)?;
            let record = analyzer.history_record(&outcome, Some(&BASE64.encode(&upload.bytes)));
            let inserted = history.insert(record)?;
            let mut entry = ClientLogEntry::new(
                "info",
                format!(
                    "analysis saved to slot {} ({})",
                    inserted.index,
                    outcome.classification.label
                ),
            );
            entry.caller = Some("history add".to_string());
            log_book.append(entry)?;
            print_json(&json!({
                "index": inserted.index,
                "evicted": inserted.evicted.as_ref().map(|record| record.timestamp.clone()),
                "persisted": inserted.save.persisted,
                "photos_degraded": inserted.save.degraded,
                "classification": outcome.classification,
            }))?;
            if !inserted.save.persisted {
                return Ok(2);
            }
        }
        HistoryAction::Delete { index } => {
            let removed = history.delete_at(index)?;
            print_json(&json!({
                "index": index,
                "removed": removed.is_some(),
            }))?;
        }
        HistoryAction::Logs { clear } => {
            if clear {
                log_book.clear()?;
            } else {
                print_json(&serde_json::to_value(log_book.entries())?)?;
            }
        }
    }
    Ok(0)
}

fn slot_summary(index: usize, record: Option<&AnalysisRecord>) -> Value {
    match record {
        None => json!({ "index": index, "empty": true }),
        Some(record) => json!({
            "index": index,
            "empty": false,
            "label": record.classification.label.as_str(),
            "confidence": record.classification.confidence,
            "source": record.classification.source.as_str(),
            "timestamp": record.timestamp,
            "photo_chars": record.photo.as_ref().map(String::len),
            "photo_truncated": record.photo_is_truncated(),
        }),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
