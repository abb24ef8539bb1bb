//! Text acquisition: per-page native text with OCR fallback.
//!
//! For each page the native text layer is tried first and accepted only when
//! it carries at least `min_native_chars` non-whitespace characters. Pages
//! below the threshold (or whose native read fails) go to OCR. A page where
//! both paths fail still yields an entry, keeping whatever short native text
//! there was, with an `AcquisitionDegraded` issue; the document carries on.
//!
//! Pages are read concurrently (`page_concurrency`) and re-sorted afterwards.

use crate::config::PipelineConfig;
use crate::error::{MinerError, StageIssue, TextSourceError};
use crate::pipeline::encode::encode_page;
use crate::pipeline::llm::VisionOcr;
use crate::pipeline::render;
use crate::prompts::PAGE_BREAK;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Page-level text capabilities for one document. Pages are 1-based.
#[async_trait]
pub trait PageTextSource: Send + Sync {
    /// Open the document and count its pages. An error here fails the document.
    async fn page_count(&self, path: &Path) -> Result<usize, MinerError>;

    /// Text from the page's native text layer (may be empty on scans).
    async fn native_text(&self, path: &Path, page: usize) -> Result<String, TextSourceError>;

    /// Text recognised from a rendered image of the page.
    async fn ocr_text(&self, path: &Path, page: usize) -> Result<String, TextSourceError>;
}

/// Text of one page and how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageText {
    pub page: usize,
    pub text: String,
    #[serde(rename = "usedOCR")]
    pub used_ocr: bool,
    /// Neither path produced usable text; `text` holds the short native read, if any.
    pub degraded: bool,
}

/// All pages of one document, in page order.
#[derive(Debug, Clone, Default)]
pub struct AcquiredText {
    pub pages: Vec<PageText>,
    pub total_pages: usize,
    pub issues: Vec<StageIssue>,
}

impl AcquiredText {
    pub fn used_ocr(&self) -> bool {
        self.pages.iter().any(|p| p.used_ocr)
    }

    pub fn ocr_pages(&self) -> Vec<usize> {
        self.pages.iter().filter(|p| p.used_ocr).map(|p| p.page).collect()
    }

    pub fn degraded_pages(&self) -> Vec<usize> {
        self.pages.iter().filter(|p| p.degraded).map(|p| p.page).collect()
    }

    /// Pages joined with the page-break marker, cut to at most `max_chars`.
    pub fn document_text(&self, max_chars: usize) -> String {
        let joined = self
            .pages
            .iter()
            .filter(|p| !p.text.trim().is_empty())
            .map(|p| p.text.trim())
            .collect::<Vec<_>>()
            .join(PAGE_BREAK);
        match joined.char_indices().nth(max_chars) {
            Some((cut, _)) => {
                warn!(
                    "Document text truncated to {} characters for extraction",
                    max_chars
                );
                joined[..cut].to_string()
            }
            None => joined,
        }
    }
}

/// Count of non-whitespace characters.
pub fn meaningful_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Acquisition knobs taken from the config.
#[derive(Debug, Clone, Copy)]
pub struct AcquireOptions {
    pub min_native_chars: usize,
    pub page_concurrency: usize,
    /// Budget for each page's native read and OCR call.
    pub page_timeout: Duration,
    /// Calls starting after this instant get only the time that is left.
    pub deadline: Option<Instant>,
}

impl AcquireOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            min_native_chars: config.min_native_chars,
            page_concurrency: config.page_concurrency,
            page_timeout: config.api_timeout(),
            deadline: None,
        }
    }

    fn budget(&self) -> Duration {
        match self.deadline {
            Some(end) => self
                .page_timeout
                .min(end.saturating_duration_since(Instant::now())),
            None => self.page_timeout,
        }
    }
}

/// Read every page of `path`.
///
/// Fails only when the document cannot be opened at all, or opening it
/// outlasts the budget.
pub async fn acquire(
    source: &dyn PageTextSource,
    path: &Path,
    opts: AcquireOptions,
) -> Result<AcquiredText, MinerError> {
    let budget = opts.budget();
    let total_pages = tokio::time::timeout(budget, source.page_count(path))
        .await
        .map_err(|_| MinerError::OpenTimedOut {
            path: path.to_path_buf(),
            secs: budget.as_secs(),
        })??;
    debug!("{}: {} pages", path.display(), total_pages);

    let mut results: Vec<(PageText, Option<StageIssue>)> = stream::iter(1..=total_pages)
        .map(|page| acquire_page(source, path, page, opts))
        .buffer_unordered(opts.page_concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(p, _)| p.page);

    let mut acquired = AcquiredText {
        total_pages,
        ..Default::default()
    };
    for (page, issue) in results {
        acquired.pages.push(page);
        acquired.issues.extend(issue);
    }
    Ok(acquired)
}

async fn acquire_page(
    source: &dyn PageTextSource,
    path: &Path,
    page: usize,
    opts: AcquireOptions,
) -> (PageText, Option<StageIssue>) {
    let native = with_timeout(page, opts.budget(), source.native_text(path, page)).await;
    let (native_reason, short_text) = match native {
        Ok(text) if meaningful_chars(&text) >= opts.min_native_chars => {
            debug!("Page {}: native text ({} chars)", page, text.len());
            return (
                PageText {
                    page,
                    text,
                    used_ocr: false,
                    degraded: false,
                },
                None,
            );
        }
        Ok(text) => (
            format!(
                "native text too short ({} < {})",
                meaningful_chars(&text),
                opts.min_native_chars
            ),
            text,
        ),
        Err(e) => (format!("native text failed: {e}"), String::new()),
    };
    debug!("Page {}: {}, falling back to OCR", page, native_reason);

    let ocr = with_timeout(page, opts.budget(), source.ocr_text(path, page)).await;
    match ocr {
        Ok(text) if !text.trim().is_empty() => (
            PageText {
                page,
                text,
                used_ocr: true,
                degraded: false,
            },
            None,
        ),
        other => {
            let ocr_reason = match other {
                Err(e) => e.to_string(),
                Ok(_) => "OCR returned no text".to_string(),
            };
            let detail = format!("{native_reason}; {ocr_reason}");
            warn!("Page {}: no usable text acquired ({})", page, detail);
            (
                PageText {
                    page,
                    text: short_text,
                    used_ocr: false,
                    degraded: true,
                },
                Some(StageIssue::AcquisitionDegraded { page, detail }),
            )
        }
    }
}

async fn with_timeout<F>(page: usize, budget: Duration, fut: F) -> Result<String, TextSourceError>
where
    F: std::future::Future<Output = Result<String, TextSourceError>>,
{
    tokio::time::timeout(budget, fut)
        .await
        .unwrap_or(Err(TextSourceError::Timeout {
            page,
            secs: budget.as_secs(),
        }))
}

// ── pdfium + vision OCR ──────────────────────────────────────────────────

/// Production text source: pdfium for the text layer and rendering, a
/// vision model for OCR.
pub struct PdfiumTextSource {
    ocr: VisionOcr,
    dpi: u32,
    max_pixels: u32,
}

impl PdfiumTextSource {
    pub fn new(ocr: VisionOcr, config: &PipelineConfig) -> Self {
        Self {
            ocr,
            dpi: config.ocr_dpi,
            max_pixels: config.max_rendered_pixels,
        }
    }
}

fn page_error(page: usize, detail: impl Into<String>) -> TextSourceError {
    TextSourceError::Page {
        page,
        detail: detail.into(),
    }
}

#[async_trait]
impl PageTextSource for PdfiumTextSource {
    async fn page_count(&self, path: &Path) -> Result<usize, MinerError> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || render::page_count_blocking(&path))
            .await
            .map_err(|e| MinerError::Internal(format!("pdfium task panicked: {e}")))?
    }

    async fn native_text(&self, path: &Path, page: usize) -> Result<String, TextSourceError> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || render::page_text_blocking(&path, page))
            .await
            .map_err(|e| page_error(page, format!("pdfium task panicked: {e}")))?
            .map_err(|e| page_error(page, e))
    }

    async fn ocr_text(&self, path: &Path, page: usize) -> Result<String, TextSourceError> {
        let path: PathBuf = path.to_path_buf();
        let (dpi, max_pixels) = (self.dpi, self.max_pixels);
        let image = tokio::task::spawn_blocking(move || {
            render::render_page_blocking(&path, page, dpi, max_pixels)
        })
        .await
        .map_err(|e| page_error(page, format!("render task panicked: {e}")))?
        .map_err(|e| page_error(page, format!("render failed: {e}")))?;

        let encoded = encode_page(&image)
            .map_err(|e| page_error(page, format!("image encoding failed: {e}")))?;
        self.ocr
            .transcribe(page, encoded)
            .await
            .map_err(|e| page_error(page, e.to_string()))
    }
}
