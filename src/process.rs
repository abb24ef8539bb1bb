//! Pipeline entry points: one document, a batch, or a whole run.
//!
//! A [`Pipeline`] owns the three collaborators (page text, field extraction,
//! optional remote store) and the configuration. Processing a document never
//! returns `Err`: anything that stops a document is folded into a failed
//! [`DocumentOutcome`], so one bad file never aborts a batch. Only run-level
//! problems (no provider, invalid config, unwritable summary) are `Err`.

use crate::config::PipelineConfig;
use crate::error::{MinerError, StageIssue};
use crate::output::{DocumentOutcome, DocumentStatus, RunSummary};
use crate::pipeline::acquire::{acquire, AcquireOptions, PageTextSource, PdfiumTextSource};
use crate::pipeline::enrich::{enrich, Provenance};
use crate::pipeline::export::write_batch_csv;
use crate::pipeline::extract::{extract_both, CallBudget, FieldExtractor, PassResult};
use crate::pipeline::input::{discover_pdfs, validate_local};
use crate::pipeline::llm::{CallSettings, LlmFieldExtractor, VisionOcr};
use crate::pipeline::merge::merge;
use crate::pipeline::persist::{document_id, persist, write_json, write_text_dump, RemoteTarget};
use crate::pipeline::store::{RecordStore, RestStore};
use crate::pipeline::validate::validate;
use crate::record::{Pass, RawFieldSet};
use chrono::Utc;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Outcomes of a batch, sorted by path, plus the summary and CSV written to disk.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcomes: Vec<DocumentOutcome>,
    pub summary: RunSummary,
    pub summary_path: PathBuf,
    pub export_path: PathBuf,
}

/// The valuation-report pipeline with its collaborators.
pub struct Pipeline {
    config: PipelineConfig,
    text_source: Arc<dyn PageTextSource>,
    extractor: Arc<dyn FieldExtractor>,
    store: Option<Arc<dyn RecordStore>>,
}

impl Pipeline {
    /// Assemble a pipeline from explicit collaborators (no remote store).
    pub fn new(
        config: PipelineConfig,
        text_source: Arc<dyn PageTextSource>,
        extractor: Arc<dyn FieldExtractor>,
    ) -> Self {
        Self {
            config,
            text_source,
            extractor,
            store: None,
        }
    }

    /// Upload records to `store` (honours `config.upload`).
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the production pipeline: pdfium + vision OCR, the configured
    /// LLM provider for extraction, and a REST store when one is configured.
    pub async fn from_config(config: PipelineConfig) -> Result<Self, MinerError> {
        let provider = resolve_provider(&config).await?;
        let settings = CallSettings::from_config(&config);

        let ocr = VisionOcr::new(Arc::clone(&provider), settings.clone());
        let text_source: Arc<dyn PageTextSource> = Arc::new(PdfiumTextSource::new(ocr, &config));
        let extractor: Arc<dyn FieldExtractor> =
            Arc::new(LlmFieldExtractor::new(provider, settings));

        let mut pipeline = Self::new(config, text_source, extractor);
        if pipeline.config.remote_enabled() {
            if let (Some(url), Some(key)) = (
                pipeline.config.store_url.as_deref(),
                pipeline.config.store_api_key.as_deref(),
            ) {
                let store = RestStore::new(url, key, pipeline.config.api_timeout())?;
                info!("Remote store: {} (table {})", url, pipeline.config.store_table);
                pipeline.store = Some(Arc::new(store));
            }
        }
        Ok(pipeline)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one document through every stage.
    pub async fn process_document(&self, path: &Path) -> DocumentOutcome {
        let start = Instant::now();
        let deadline = start + self.config.document_timeout();
        let source_file = source_name(path);
        info!("Processing {}", path.display());

        if let Err(e) = validate_local(path) {
            warn!("{}: {}", source_file, e);
            return DocumentOutcome::failed(source_file, path.to_path_buf(), e.to_string(), elapsed_ms(start));
        }

        let document_id = document_id(path);

        // ── Text acquisition ─────────────────────────────────────────────
        let opts = AcquireOptions {
            deadline: Some(deadline),
            ..AcquireOptions::from_config(&self.config)
        };
        let acquired = match acquire(self.text_source.as_ref(), path, opts).await {
            Ok(a) => a,
            Err(e) => {
                warn!("{}: {}", source_file, e);
                return DocumentOutcome::failed(source_file, path.to_path_buf(), e.to_string(), elapsed_ms(start));
            }
        };
        let mut issues: Vec<StageIssue> = acquired.issues.clone();
        write_text_dump(&self.config.text_dir(), &document_id, &source_file, &acquired).await;

        // ── Two extraction passes ────────────────────────────────────────
        let text = acquired.document_text(self.config.max_prompt_chars);
        let (pass1, pass2) = if text.trim().is_empty() {
            warn!("{}: no text on any page, skipping extraction", source_file);
            (no_text(Pass::One), no_text(Pass::Two))
        } else {
            let budget = CallBudget::until(self.config.api_timeout(), deadline);
            extract_both(self.extractor.as_ref(), &text, budget).await
        };
        let mut pass_failures = BTreeMap::new();
        for result in [&pass1, &pass2] {
            if let (Some(issue), Some(detail)) = (result.issue(), result.failure.as_ref()) {
                pass_failures.insert(result.fields.pass(), detail.clone());
                issues.push(issue);
            }
        }

        // ── Merge, validate, enrich ──────────────────────────────────────
        let merged = merge(&pass1.fields, &pass2.fields);
        issues.extend(merged.conflicts.iter().map(|c| StageIssue::MergeConflict {
            field: c.field.clone(),
        }));
        let validated = validate(&merged);
        issues.extend(validated.notes.iter().map(|n| StageIssue::ValidationDowngrade {
            field: n.field.clone(),
            reason: n.reason.to_string(),
        }));
        let record = enrich(
            validated,
            &merged,
            Provenance {
                source_file: &source_file,
                document_id: &document_id,
                acquired: &acquired,
                pass_failures,
                processing_duration_ms: elapsed_ms(start),
                extracted_at: Utc::now(),
            },
        );

        // ── Persist (not bounded by the document deadline) ───────────────
        let remote = self
            .store
            .as_deref()
            .filter(|_| self.config.upload)
            .map(|store| RemoteTarget {
                store,
                table: &self.config.store_table,
                policy: &self.config.store_retry,
            });
        let (persistence, persist_issues) = persist(&record, &self.config.records_dir(), remote).await;
        issues.extend(persist_issues);

        let status = DocumentStatus::decide(record.metadata.partial, &persistence);
        let duration_ms = elapsed_ms(start);
        info!(
            "{}: {} ({} missing fields, {} issues, {}ms)",
            source_file,
            status,
            record.metadata.missing_fields.len(),
            issues.len(),
            duration_ms
        );

        DocumentOutcome {
            source_file,
            path: path.to_path_buf(),
            status,
            record: Some(record),
            persistence: Some(persistence),
            issues,
            error: None,
            duration_ms,
        }
    }

    /// Process `paths` with `document_concurrency` documents in flight, then
    /// write `summary.json` and `records.csv`.
    pub async fn process_batch(&self, paths: &[PathBuf]) -> Result<BatchReport, MinerError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let total = paths.len();
        let callback = self.config.progress_callback.clone();
        info!(
            "Starting batch: {} documents, {} at a time",
            total, self.config.document_concurrency
        );
        if let Some(ref cb) = callback {
            cb.on_batch_start(total);
        }

        let mut outcomes: Vec<DocumentOutcome> = stream::iter(paths.iter().enumerate())
            .map(|(i, path)| {
                let callback = callback.clone();
                async move {
                    if let Some(ref cb) = callback {
                        cb.on_document_start(&source_name(path), i + 1, total);
                    }
                    let outcome = self.process_document(path).await;
                    if let Some(ref cb) = callback {
                        cb.on_document_complete(&outcome);
                    }
                    outcome
                }
            })
            .buffer_unordered(self.config.document_concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.path.cmp(&b.path));

        let mut summary = RunSummary::from_outcomes(&outcomes, elapsed_ms(start));
        summary.started_at = Some(started_at);
        let summary_path = write_json(self.config.summary_path(), summary.clone()).await?;
        let export_path = write_batch_csv(self.config.export_path(), outcomes.clone()).await?;
        info!(
            "Batch complete: {} success, {} partial, {} failed in {}ms",
            summary.success, summary.partial, summary.failed, summary.total_duration_ms
        );
        if let Some(ref cb) = callback {
            cb.on_batch_complete(&summary);
        }

        Ok(BatchReport {
            outcomes,
            summary,
            summary_path,
            export_path,
        })
    }
}

/// Discover PDFs under `inputs`, build the production pipeline and run it.
///
/// # Example
/// ```rust,no_run
/// use valuation_miner::{run, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PipelineConfig::builder().output_dir("out").build()?;
/// let report = run(&["reports/"], config).await?;
/// println!("{} failed", report.summary.failed);
/// # Ok(())
/// # }
/// ```
pub async fn run<P: AsRef<Path>>(inputs: &[P], config: PipelineConfig) -> Result<BatchReport, MinerError> {
    let paths = discover_pdfs(inputs);
    let pipeline = Pipeline::from_config(config).await?;
    pipeline.process_batch(&paths).await
}

fn no_text(pass: Pass) -> PassResult {
    PassResult {
        fields: RawFieldSet::empty(pass),
        failure: Some("no text acquired from any page".to_string()),
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, MinerError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        MinerError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most to least specific:
///
/// 1. a pre-built provider on the config;
/// 2. `provider_name` (+ `model`, default [`DEFAULT_MODEL`]);
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set;
/// 4. `OPENAI_API_KEY` → openai;
/// 5. whatever [`ProviderFactory::from_env`] detects.
pub async fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, MinerError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        debug!("Using provider {} with model {}", name, model);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| MinerError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {e}"
            ),
        })?;
    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_name_is_file_name() {
        assert_eq!(source_name(Path::new("/in/Plot 7.pdf")), "Plot 7.pdf");
    }

    #[test]
    fn no_text_passes_fail_with_reason() {
        let r = no_text(Pass::Two);
        assert!(r.fields.is_empty());
        assert!(matches!(
            r.issue(),
            Some(StageIssue::ExtractionPassFailed { pass: 2, .. })
        ));
    }
}
