//! Configuration for a valuation-mining run.
//!
//! Every knob lives in [`PipelineConfig`], built through
//! [`PipelineConfigBuilder`]. Setters clamp obviously bad values; `build()`
//! rejects combinations that cannot work (a store URL without a key, zero
//! concurrency) before any document is touched.

use crate::error::MinerError;
use crate::progress::ProgressCallback;
use crate::retry::RetryPolicy;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a batch of valuation reports.
///
/// # Example
/// ```rust
/// use valuation_miner::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .output_dir("out")
///     .document_concurrency(4)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.document_concurrency, 4);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Minimum non-whitespace characters for a page's native text layer to be
    /// trusted. Pages below this go to OCR. Default: 25.
    ///
    /// Scanned reports often carry a stray header or a page number in their
    /// text layer; a threshold avoids mistaking those for a real page.
    pub min_native_chars: usize,

    /// Rendering DPI for pages sent to OCR. Range: 72–400. Default: 200.
    pub ocr_dpi: u32,

    /// Cap on the longer edge of a rendered page, in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Concurrent page reads (native or OCR) within one document. Default: 4.
    pub page_concurrency: usize,

    /// Documents processed at once. Default: 2.
    pub document_concurrency: usize,

    /// Model identifier. If None, the provider default is used.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for extraction and OCR calls. Default: 0.0.
    pub temperature: f32,

    /// Output token cap per model call. Default: 2048.
    pub max_tokens: usize,

    /// Retries on a model service error, on top of the first attempt. Default: 2.
    pub max_retries: u32,

    /// Initial backoff between model retries, doubling each time. Default: 500.
    pub retry_backoff_ms: u64,

    /// Time budget for a single external call (OCR page or extraction pass). Default: 90.
    pub api_timeout_secs: u64,

    /// Time budget for one whole document. Default: 600.
    ///
    /// Calls still in flight when it runs out are abandoned and handled like
    /// their own timeouts: a degraded page or a failed pass.
    pub document_timeout_secs: u64,

    /// Longest document text sent to a pass, in characters. Default: 120 000.
    pub max_prompt_chars: usize,

    /// Directory for text dumps, records and the run summary. Default: "output".
    pub output_dir: PathBuf,

    /// Base URL of the remote record store (PostgREST / Supabase).
    pub store_url: Option<String>,

    /// API key for the remote store. Required when `store_url` is set.
    pub store_api_key: Option<String>,

    /// Remote table name. Default: "valuation_records".
    pub store_table: String,

    /// Upload records to the remote store. Default: true (no-op without `store_url`).
    pub upload: bool,

    /// Retry policy for remote upserts.
    pub store_retry: RetryPolicy,

    /// Receives batch and document progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_native_chars: 25,
            ocr_dpi: 200,
            max_rendered_pixels: 2000,
            page_concurrency: 4,
            document_concurrency: 2,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 2048,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 90,
            document_timeout_secs: 600,
            max_prompt_chars: 120_000,
            output_dir: PathBuf::from("output"),
            store_url: None,
            store_api_key: None,
            store_table: "valuation_records".to_string(),
            upload: true,
            store_retry: RetryPolicy::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("min_native_chars", &self.min_native_chars)
            .field("ocr_dpi", &self.ocr_dpi)
            .field("page_concurrency", &self.page_concurrency)
            .field("document_concurrency", &self.document_concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("document_timeout_secs", &self.document_timeout_secs)
            .field("output_dir", &self.output_dir)
            .field("store_url", &self.store_url)
            .field("store_api_key", &self.store_api_key.as_ref().map(|_| "<redacted>"))
            .field("store_table", &self.store_table)
            .field("upload", &self.upload)
            .field("store_retry", &self.store_retry)
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.document_timeout_secs)
    }

    /// Whether records should be sent to a remote store.
    pub fn remote_enabled(&self) -> bool {
        self.upload && self.store_url.is_some()
    }

    pub fn text_dir(&self) -> PathBuf {
        self.output_dir.join("text")
    }

    pub fn records_dir(&self) -> PathBuf {
        self.output_dir.join("records")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join("summary.json")
    }

    /// One CSV row per document of the last batch.
    pub fn export_path(&self) -> PathBuf {
        self.output_dir.join("records.csv")
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn min_native_chars(mut self, n: usize) -> Self {
        self.config.min_native_chars = n;
        self
    }

    pub fn ocr_dpi(mut self, dpi: u32) -> Self {
        self.config.ocr_dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn document_timeout_secs(mut self, secs: u64) -> Self {
        self.config.document_timeout_secs = secs.max(1);
        self
    }

    pub fn max_prompt_chars(mut self, n: usize) -> Self {
        self.config.max_prompt_chars = n;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn store_url(mut self, url: impl Into<String>) -> Self {
        self.config.store_url = Some(url.into());
        self
    }

    pub fn store_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.store_api_key = Some(key.into());
        self
    }

    pub fn store_table(mut self, table: impl Into<String>) -> Self {
        self.config.store_table = table.into();
        self
    }

    pub fn upload(mut self, v: bool) -> Self {
        self.config.upload = v;
        self
    }

    pub fn store_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.store_retry = policy;
        self
    }

    /// Total upsert attempts (first try included).
    pub fn store_max_attempts(mut self, n: u32) -> Self {
        self.config.store_retry.max_attempts = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, MinerError> {
        let c = &self.config;
        if !(72..=400).contains(&c.ocr_dpi) {
            return Err(MinerError::InvalidConfig(format!(
                "OCR DPI must be 72–400, got {}",
                c.ocr_dpi
            )));
        }
        if c.page_concurrency == 0 || c.document_concurrency == 0 {
            return Err(MinerError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.max_prompt_chars < 1000 {
            return Err(MinerError::InvalidConfig(format!(
                "max_prompt_chars must be ≥ 1000, got {}",
                c.max_prompt_chars
            )));
        }
        if c.store_retry.max_attempts == 0 {
            return Err(MinerError::InvalidConfig(
                "Store retry policy needs at least one attempt".into(),
            ));
        }
        if c.store_table.trim().is_empty() {
            return Err(MinerError::InvalidConfig("Store table name is empty".into()));
        }
        if let Some(url) = c.store_url.as_deref() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(MinerError::InvalidConfig(format!(
                    "Store URL must be http(s), got '{url}'"
                )));
            }
            if c.upload && c.store_api_key.as_deref().map_or(true, str::is_empty) {
                return Err(MinerError::InvalidConfig(
                    "A store URL was given without a store API key (set VALMINE_STORE_KEY)".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.min_native_chars, 25);
        assert_eq!(c.ocr_dpi, 200);
        assert_eq!(c.document_concurrency, 2);
        assert_eq!(c.temperature, 0.0);
        assert_eq!(c.store_table, "valuation_records");
        assert_eq!(c.store_retry, RetryPolicy::default());
        assert!(!c.remote_enabled());
        assert_eq!(c.summary_path(), PathBuf::from("output/summary.json"));
        assert_eq!(c.export_path(), PathBuf::from("output/records.csv"));
    }

    #[test]
    fn setters_clamp() {
        let c = PipelineConfig::builder()
            .ocr_dpi(10_000)
            .page_concurrency(0)
            .document_concurrency(0)
            .temperature(9.0)
            .store_max_attempts(0)
            .build()
            .unwrap();
        assert_eq!(c.ocr_dpi, 400);
        assert_eq!(c.page_concurrency, 1);
        assert_eq!(c.document_concurrency, 1);
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.store_retry.max_attempts, 1);
    }

    #[test]
    fn store_url_without_key_is_rejected() {
        let err = PipelineConfig::builder()
            .store_url("https://db.example.com")
            .build()
            .unwrap_err();
        assert!(matches!(err, MinerError::InvalidConfig(_)));
    }

    #[test]
    fn store_url_without_key_is_fine_when_upload_disabled() {
        let c = PipelineConfig::builder()
            .store_url("https://db.example.com")
            .upload(false)
            .build()
            .unwrap();
        assert!(!c.remote_enabled());
    }

    #[test]
    fn store_url_must_be_http() {
        let err = PipelineConfig::builder()
            .store_url("ftp://db")
            .store_api_key("k")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("http"));
    }

    #[test]
    fn remote_enabled_with_url_and_key() {
        let c = PipelineConfig::builder()
            .store_url("https://db.example.com")
            .store_api_key("secret")
            .build()
            .unwrap();
        assert!(c.remote_enabled());
        assert!(!format!("{c:?}").contains("secret"));
    }

    #[test]
    fn tiny_prompt_budget_is_rejected() {
        assert!(PipelineConfig::builder().max_prompt_chars(10).build().is_err());
    }
}
