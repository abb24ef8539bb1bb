//! CLI binary for valuation-miner.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, renders batch progress and prints the run summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use valuation_miner::{
    discover_pdfs, BatchProgressCallback, DocumentOutcome, DocumentStatus, Pipeline,
    PipelineConfig, ProgressCallback, RunSummary,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar with one log line per finished document. Documents
/// finish out of order when more than one is in flight.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} reports  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Mining");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            failures: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_length(total_documents as u64);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_documents} valuation reports…"))
        ));
    }

    fn on_document_start(&self, source_file: &str, _index: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(source_file.to_string(), Instant::now());
        }
        self.bar.set_message(source_file.to_string());
    }

    fn on_document_complete(&self, outcome: &DocumentOutcome) {
        let elapsed_ms = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&outcome.source_file))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        let (mark, detail) = match outcome.status {
            DocumentStatus::Success => (green("✓"), String::new()),
            DocumentStatus::Partial => (
                yellow("◐"),
                yellow(&truncate(&outcome.reason().unwrap_or_default(), 80)),
            ),
            DocumentStatus::Failed => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                (red("✗"), red(&truncate(&outcome.reason().unwrap_or_default(), 80)))
            }
        };
        let missing = outcome
            .record
            .as_ref()
            .map(|r| format!("{:>2} missing", r.metadata.missing_fields.len()))
            .unwrap_or_default();

        self.bar.println(format!(
            "  {} {:<40}  {:<10}  {}  {}",
            mark,
            truncate(&outcome.source_file, 40),
            dim(&missing),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
            detail,
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, summary: &RunSummary) {
        self.bar.finish_and_clear();
        let failed = self.failures.load(Ordering::SeqCst);
        eprintln!(
            "{} {} success  {} partial  {} failed  {}",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&summary.success.to_string()),
            bold(&summary.partial.to_string()),
            if failed == 0 {
                bold("0")
            } else {
                red(&failed.to_string())
            },
            dim(&format!("({}ms)", summary.total_duration_ms)),
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Mine every PDF under a folder, records in ./output
  valmine reports/

  # Upload to Supabase / PostgREST as well
  VALMINE_STORE_URL=https://xyz.supabase.co VALMINE_STORE_KEY=... valmine reports/

  # Use a specific model, print the summary as JSON
  valmine --provider openai --model gpt-4.1-mini --json reports/*.pdf

  # Local files only, one document at a time, verbose logs
  valmine --no-upload --concurrency 1 --verbose report.pdf

OUTPUT:
  <output-dir>/text/<name>.json     page text with per-page OCR flag
  <output-dir>/records/<name>.json  canonical record
  <output-dir>/summary.json         batch report

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  VALMINE_STORE_URL       Remote store base URL
  VALMINE_STORE_KEY       Remote store API key
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise next to the binary, then system)

EXIT STATUS:
  0 when every document succeeded or came out partial, 1 when any failed.
"#;

/// Extract structured records from property valuation PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "valmine",
    version,
    about = "Extract structured records from property valuation PDFs",
    long_about = "Read property valuation reports (scanned or native PDFs), extract their \
fields with two LLM passes, reconcile and validate them, write one JSON record per report \
and upsert it into a PostgREST / Supabase table.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files and/or directories (searched recursively).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for text dumps, records and summary.json.
    #[arg(short, long, env = "VALMINE_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "VALMINE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (used for both OCR and extraction).
    #[arg(long, env = "VALMINE_MODEL")]
    model: Option<String>,

    /// Remote store base URL (PostgREST / Supabase).
    #[arg(long, env = "VALMINE_STORE_URL")]
    store_url: Option<String>,

    /// Remote store API key.
    #[arg(long, env = "VALMINE_STORE_KEY", hide_env_values = true)]
    store_key: Option<String>,

    /// Remote table name.
    #[arg(long, env = "VALMINE_STORE_TABLE", default_value = "valuation_records")]
    store_table: String,

    /// Write local records only; never contact the remote store.
    #[arg(long, env = "VALMINE_NO_UPLOAD")]
    no_upload: bool,

    /// Documents processed at once.
    #[arg(short, long, env = "VALMINE_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Pages read (native or OCR) at once within a document.
    #[arg(long, env = "VALMINE_PAGE_CONCURRENCY", default_value_t = 4)]
    page_concurrency: usize,

    /// Non-whitespace characters a page's text layer needs to skip OCR.
    #[arg(long, env = "VALMINE_MIN_NATIVE_CHARS", default_value_t = 25)]
    min_native_chars: usize,

    /// Rendering DPI for OCR (72–400).
    #[arg(long, env = "VALMINE_OCR_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    ocr_dpi: u32,

    /// Timeout for each model call, in seconds.
    #[arg(long, env = "VALMINE_API_TIMEOUT", default_value_t = 90)]
    api_timeout: u64,

    /// Time budget for one document, in seconds.
    #[arg(long, env = "VALMINE_DOCUMENT_TIMEOUT", default_value_t = 600)]
    document_timeout: u64,

    /// Upsert attempts per record (first try included).
    #[arg(long, env = "VALMINE_MAX_ATTEMPTS", default_value_t = 4)]
    max_attempts: u32,

    /// Print the run summary as JSON on stdout.
    #[arg(long, env = "VALMINE_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "VALMINE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "VALMINE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "VALMINE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs would fight the progress bar, so it lowers them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config and pipeline ────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let paths = discover_pdfs(&cli.inputs);
    if paths.is_empty() {
        anyhow::bail!("No PDF files found in the given inputs");
    }

    let pipeline = Pipeline::from_config(config)
        .await
        .context("Failed to initialise the pipeline")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let report = pipeline
        .process_batch(&paths)
        .await
        .context("Batch failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report.summary)
            .context("Failed to serialise summary")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        let s = &report.summary;
        eprintln!(
            "Processed {} reports in {}ms: {} success, {} partial, {} failed",
            s.total_documents, s.total_duration_ms, s.success, s.partial, s.failed
        );
        for e in &s.errors {
            eprintln!("  {} {}: {}", e.status, e.source_file, e.reason);
        }
    }
    if !cli.quiet && !cli.json {
        eprintln!("   summary → {}", bold(&report.summary_path.display().to_string()));
        eprintln!("   records → {}", bold(&report.export_path.display().to_string()));
    }

    if report.summary.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .output_dir(&cli.output_dir)
        .document_concurrency(cli.concurrency)
        .page_concurrency(cli.page_concurrency)
        .min_native_chars(cli.min_native_chars)
        .ocr_dpi(cli.ocr_dpi)
        .api_timeout_secs(cli.api_timeout)
        .document_timeout_secs(cli.document_timeout)
        .store_table(&cli.store_table)
        .store_max_attempts(cli.max_attempts)
        .upload(!cli.no_upload);

    if let Some(ref p) = cli.provider {
        builder = builder.provider_name(p);
    }
    if let Some(ref m) = cli.model {
        builder = builder.model(m);
    }
    if let Some(ref url) = cli.store_url {
        builder = builder.store_url(url);
    }
    if let Some(ref key) = cli.store_key {
        builder = builder.store_api_key(key);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
