//! Error types for the valuation-miner library.
//!
//! Two distinct families reflect two distinct failure modes:
//!
//! * [`MinerError`] is **fatal**: the run (or, inside a batch, a single
//!   document) cannot proceed at all: bad configuration, missing credentials,
//!   a file that is not a PDF, an unwritable output directory. Returned as
//!   `Err(MinerError)` from the top-level entry points.
//!
//! * [`StageIssue`] is **non-fatal**: something degraded inside one document
//!   (a page without text, a failed extraction pass, a value that would not
//!   parse) but the document still produced a record. Issues are collected
//!   on [`crate::output::DocumentOutcome`] so callers can audit them.
//!
//! The collaborator error types ([`InferError`], [`StoreError`],
//! [`TextSourceError`]) describe what the external capabilities may raise;
//! the pipeline folds each of them into a `StageIssue`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the valuation-miner library.
#[derive(Debug, Error)]
pub enum MinerError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password; valuation reports are never opened with one.
    #[error("PDF '{path}' is encrypted and cannot be read")]
    Encrypted { path: PathBuf },

    /// Opening the document (counting its pages) outlasted its time budget.
    #[error("Timed out opening '{path}' after {secs}s")]
    OpenTimedOut { path: PathBuf, secs: u64 },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Collaborator configuration ────────────────────────────────────────
    /// The configured LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output artefact.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record or summary could not be serialised.
    #[error("Serialisation failed: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal problem met while processing one document.
///
/// Only [`StageIssue::PersistenceRejected`] and an exhausted
/// [`StageIssue::PersistenceTransientFailure`] turn a document into a
/// failure; everything else degrades the record and is kept for audit.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageIssue {
    /// A page produced no usable text from either the native layer or OCR.
    #[error("page {page}: no usable text from native extraction or OCR ({detail})")]
    AcquisitionDegraded { page: usize, detail: String },

    /// An extraction pass timed out, errored or returned unusable output.
    #[error("pass {pass}: extraction failed: {detail}")]
    ExtractionPassFailed { pass: u8, detail: String },

    /// Both passes supplied different values for the same field.
    #[error("field '{field}': conflicting values across passes, kept home-pass value")]
    MergeConflict { field: String },

    /// A field failed type coercion and was nulled (or kept raw).
    #[error("field '{field}': {reason}")]
    ValidationDowngrade { field: String, reason: String },

    /// The remote store kept failing transiently until the attempt cap.
    #[error("remote upsert failed after {attempts} attempts: {detail}")]
    PersistenceTransientFailure { attempts: u32, detail: String },

    /// The remote store refused the record (schema / constraint violation).
    #[error("remote store rejected the record: {reason}")]
    PersistenceRejected { reason: String },
}

impl StageIssue {
    /// Whether this issue, on its own, marks the document as failed.
    pub fn is_fatal_for_document(&self) -> bool {
        matches!(
            self,
            StageIssue::PersistenceRejected { .. }
                | StageIssue::PersistenceTransientFailure { .. }
        )
    }
}

/// Errors raised by the structured-extraction model collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferError {
    /// The call did not finish inside its time budget.
    #[error("model call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider returned an error (after its own retries).
    #[error("model service error: {0}")]
    Service(String),

    /// The response could not be read as a JSON object.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
}

/// Errors raised by the remote record store collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Network blip, throttling or a 5xx: worth retrying.
    #[error("transient store error: {0}")]
    Transient(String),

    /// The store refused the row; retrying will not help.
    #[error("store rejected the row: {reason}")]
    Rejected { reason: String },
}

/// Errors raised by a page text source (native layer or OCR engine).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TextSourceError {
    /// The page could not be read by this path.
    #[error("page {page}: {detail}")]
    Page { page: usize, detail: String },

    /// The call did not finish inside its time budget.
    #[error("page {page}: timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}
