//! freight-extract
//! ----------------
//! Command-line front end: extract freight fields from a JSON file of emails,
//! score a prediction file against ground truth, or both in one run.
//!
//! Data files default to `/data` when that directory exists, else `..`:
//!   emails_input.json, port_codes_reference.json -> output.json
//!   output.json + ground_truth.json -> accuracy report
//!
//! Console logging: verbose, set `RUST_LOG=debug` to see every field decision.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use freight_extract::evaluate::{evaluate, log_report};
use freight_extract::files::{
    load_emails, load_port_table, load_records, write_records, write_report,
};
use freight_extract::model::{ChatCompletionsModel, ModelConfig, DEFAULT_BASE_URL};
use freight_extract::Extractor;

// ================================
// CLI + Config
// ================================

#[derive(Debug, Parser)]
#[command(name = "freight-extract", version, about = "LLM extraction of freight fields from shipping emails, with accuracy scoring")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract fields from every email and write the output file
    Extract(ExtractArgs),
    /// Score an output file against ground truth
    Evaluate(EvaluateArgs),
    /// Extract, then evaluate
    Run {
        #[command(flatten)]
        extract: ExtractArgs,
        /// Optional JSON accuracy report
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
        /// Ground truth file (default: <data-dir>/ground_truth.json)
        #[arg(long, env = "GROUND_TRUTH_FILE", value_name = "FILE")]
        ground_truth: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct DataArgs {
    /// Directory holding the input and reference files
    #[arg(long, env = "DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Prediction file written by `extract` and read by `evaluate`
    #[arg(long, env = "OUTPUT_FILE", value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Emails file (default: <data-dir>/emails_input.json)
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Port code reference (default: <data-dir>/port_codes_reference.json)
    #[arg(long, value_name = "FILE")]
    ports: Option<PathBuf>,

    /// API key for the chat-completions endpoint
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model ID
    #[arg(long, env = "MODEL_NAME", default_value = "llama-3.3-70b-versatile")]
    model: String,

    /// OpenAI-compatible base URL
    #[arg(long, env = "LLM_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Max attempts per model call
    #[arg(long, default_value_t = 3)]
    max_retries: usize,

    /// Max model calls in flight (default: num_cpus)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Overall HTTP request timeout in seconds (default: 120)
    #[arg(long)]
    timeout_seconds: Option<u64>,

    /// Optional file replacing the built-in extraction instructions
    #[arg(long, value_name = "FILE")]
    prompt_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct EvaluateArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Ground truth file (default: <data-dir>/ground_truth.json)
    #[arg(long, env = "GROUND_TRUTH_FILE", value_name = "FILE")]
    ground_truth: Option<PathBuf>,

    /// Optional JSON accuracy report
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct Config {
    run_id: String,
    input: PathBuf,
    ports: PathBuf,
    output: PathBuf,
    ground_truth: PathBuf,
}

/// Settings only the extraction stage needs.
#[derive(Debug, Clone)]
struct ExtractSettings {
    model: ModelConfig,
    concurrency: usize,
    prompt_file: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    let data = Path::new("/data");
    if data.exists() {
        data.to_path_buf()
    } else {
        PathBuf::from("..")
    }
}

impl Config {
    fn new(
        run_id: &str,
        data: &DataArgs,
        extract: Option<&ExtractArgs>,
        ground_truth: Option<&PathBuf>,
    ) -> Self {
        let data_dir = data.data_dir.clone().unwrap_or_else(default_data_dir);
        info!("📁 Data directory: {}", data_dir.display());
        Self {
            run_id: run_id.to_string(),
            input: extract
                .and_then(|a| a.input.clone())
                .unwrap_or_else(|| data_dir.join("emails_input.json")),
            ports: extract
                .and_then(|a| a.ports.clone())
                .unwrap_or_else(|| data_dir.join("port_codes_reference.json")),
            output: data
                .output
                .clone()
                .unwrap_or_else(|| data_dir.join("output.json")),
            ground_truth: ground_truth
                .cloned()
                .unwrap_or_else(|| data_dir.join("ground_truth.json")),
        }
    }
}

impl ExtractSettings {
    fn from_args(args: &ExtractArgs) -> Result<Self> {
        let api_key = args
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .context("Missing GROQ_API_KEY env var. Set it before running.")?;
        let mut model = ModelConfig::new(api_key, args.model.clone());
        model.base_url = args.base_url.clone();
        model.max_retries = args.max_retries;
        model.timeout_seconds = args.timeout_seconds.unwrap_or(120);

        let concurrency = args
            .concurrency
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4));

        Ok(Self {
            model,
            concurrency,
            prompt_file: args.prompt_file.clone(),
        })
    }
}

// ================================
// Stages
// ================================

async fn run_extract(cfg: &Config, settings: &ExtractSettings) -> Result<()> {
    info!("🧠 Model: {}", settings.model.model);
    info!(
        "⚙️  Concurrency={}, MaxRetries={}",
        settings.concurrency, settings.model.max_retries
    );

    let emails = load_emails(&cfg.input).context("Failed to load emails")?;
    if emails.is_empty() {
        warn!("Input file has no emails. Writing an empty output.");
    }
    let ports = load_port_table(&cfg.ports).context("Failed to load port code reference")?;

    let model = ChatCompletionsModel::new(settings.model.clone()).context("Model client setup failed")?;
    let mut extractor = Extractor::new(model, Arc::new(ports));
    if let Some(path) = &settings.prompt_file {
        info!("📝 Using instructions from {}", path.display());
        let instructions = std::fs::read_to_string(path).context("Failed to read prompt file")?;
        if instructions.trim().is_empty() {
            bail!("Prompt file {} is empty", path.display());
        }
        extractor = extractor.with_instructions(&instructions);
    }

    // ---- Progress bar ----
    let pb = ProgressBar::new(emails.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );
    pb.set_message("extracting…");

    let started = Instant::now();
    let outcome = extractor.process_batch(&emails, settings.concurrency, &pb).await;
    pb.finish_with_message("done");

    info!(
        "🧮 Extracted {} records in {}ms ({} failed)",
        outcome.records.len(),
        started.elapsed().as_millis(),
        outcome.errors.len()
    );

    write_records(&cfg.output, &outcome.records).context("Failed to write output")?;
    if !outcome.errors.is_empty() {
        warn!(
            "⚠️ {} of {} emails were written as null records",
            outcome.errors.len(),
            outcome.records.len()
        );
    }
    Ok(())
}

fn run_evaluate(cfg: &Config, report_path: Option<&Path>) -> Result<()> {
    let predictions = load_records(&cfg.output).context("Failed to load predictions")?;
    let ground_truth = load_records(&cfg.ground_truth).context("Failed to load ground truth")?;
    info!(
        "📊 Evaluating {} predictions against {} ground-truth records",
        predictions.len(),
        ground_truth.len()
    );

    let report = evaluate(&predictions, &ground_truth)?;
    log_report(&report);

    if let Some(path) = report_path {
        write_report(path, &cfg.run_id, &report).context("Failed to write report")?;
    }
    Ok(())
}

// ================================
// Main
// ================================

#[tokio::main]
async fn main() -> Result<()> {
    // ---- Logging setup ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    dotenvy::dotenv().ok(); // loads variables from .env if present
    let cli = Cli::parse();

    let run_id = Uuid::new_v4().to_string();
    info!("🆔 Run ID: {run_id}");

    match &cli.command {
        Command::Extract(args) => {
            let settings = ExtractSettings::from_args(args)?;
            let cfg = Config::new(&run_id, &args.data, Some(args), None);
            run_extract(&cfg, &settings).await?;
            info!("📦 Output: {}", cfg.output.display());
        }
        Command::Evaluate(args) => {
            let cfg = Config::new(&run_id, &args.data, None, args.ground_truth.as_ref());
            run_evaluate(&cfg, args.report.as_deref())?;
        }
        Command::Run {
            extract,
            report,
            ground_truth,
        } => {
            let settings = ExtractSettings::from_args(extract)?;
            let cfg = Config::new(&run_id, &extract.data, Some(extract), ground_truth.as_ref());
            run_extract(&cfg, &settings).await?;
            run_evaluate(&cfg, report.as_deref())?;
        }
    }

    info!("✅ All done.");
    Ok(())
}
