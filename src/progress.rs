//! Progress-callback trait for batch and per-document events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to follow a
//! run as it happens. Documents are processed concurrently, so callbacks may
//! fire from several tasks at once.
//!
//! # Example
//!
//! ```rust
//! use valuation_miner::{BatchProgressCallback, DocumentOutcome, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl BatchProgressCallback for Counter {
//!     fn on_document_complete(&self, outcome: &DocumentOutcome) {
//!         let done = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}: {} → {}", outcome.source_file, outcome.status);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{DocumentOutcome, RunSummary};
use std::sync::Arc;

/// Called by the pipeline as a batch progresses.
///
/// All methods default to no-ops. Implementations must guard shared state
/// (`Mutex`, atomics): `on_document_start` and `on_document_complete` can run
/// concurrently for different documents.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, before any document starts.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document enters the pipeline.
    ///
    /// * `source_file`: file name of the document
    /// * `index`: 1-based position in the batch
    /// * `total`: documents in the batch
    fn on_document_start(&self, source_file: &str, index: usize, total: usize) {
        let _ = (source_file, index, total);
    }

    /// Called with a document's terminal outcome (success, partial or failed).
    fn on_document_complete(&self, outcome: &DocumentOutcome) {
        let _ = outcome;
    }

    /// Called once after every document has reached a terminal outcome.
    fn on_batch_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// A callback that ignores every event.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
