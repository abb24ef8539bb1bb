//! # valuation-miner
//!
//! Turn property valuation reports (scanned or native PDFs) into validated,
//! structured records and upsert them into a relational store.
//!
//! ## Why two passes?
//!
//! One prompt asking for every field of a forty-page report gets sloppy:
//! values drift into the wrong keys and long reports blow the output budget.
//! Splitting the schema into two disjoint field groups gives each model call
//! a smaller, sharper job. Every field has a *home* pass, so reconciling the
//! two answers is a union with a deterministic tie-break rather than a vote.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Acquire   native text per page, OCR fallback (pdfium + VLM)
//!  ├─ 2. Extract   pass 1 (ids, parties, dates, tenure) ∥ pass 2 (location, land, valuation)
//!  ├─ 3. Merge     home-pass-wins, conflicts kept for audit
//!  ├─ 4. Validate  numbers, dates, coordinates, currency → typed or null + note
//!  ├─ 5. Enrich    source, pages, OCR usage, timings, natural key
//!  └─ 6. Persist   records/<stem>.json + upsert on property_key
//! ```
//!
//! A document never fails because a page or a pass did; it comes out
//! `partial` instead. It fails only when it cannot be opened or persisted.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use valuation_miner::{run, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::builder().output_dir("output").build()?;
//!     let report = run(&["reports/"], config).await?;
//!     eprintln!(
//!         "{} success / {} partial / {} failed",
//!         report.summary.success, report.summary.partial, report.summary.failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `valmine` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod retry;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{InferError, MinerError, StageIssue, StoreError, TextSourceError};
pub use output::{
    DocumentOutcome, DocumentStatus, PersistenceOutcome, RemoteStatus, RunSummary,
};
pub use pipeline::acquire::{PageTextSource, PdfiumTextSource};
pub use pipeline::extract::{FieldExtractor, InferRequest};
pub use pipeline::input::discover_pdfs;
pub use pipeline::store::{MemoryStore, RecordStore, RestStore};
pub use process::{run, BatchReport, Pipeline};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{CanonicalRecord, Pass, RawFieldSet, RawValue};
pub use retry::RetryPolicy;
