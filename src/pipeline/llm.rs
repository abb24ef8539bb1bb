//! Model calls through edgequake-llm: structured extraction and page OCR.
//!
//! Both collaborators send every call through the shared [`RetryPolicy`].
//! Provider errors are classified first: throttling (429), 5xx and network
//! failures back off and retry, while auth, bad-request and unknown-model
//! errors fail at once. Timeouts are not handled here; the caller wraps
//! each call in its own budget.

use crate::config::PipelineConfig;
use crate::error::InferError;
use crate::pipeline::extract::{FieldExtractor, InferRequest};
use crate::prompts::{pass_user_message, OCR_SYSTEM_PROMPT};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sampling and retry settings shared by every call.
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub temperature: f32,
    pub max_tokens: usize,
    pub retry: RetryPolicy,
}

impl CallSettings {
    /// `max_retries` retries on top of the first attempt, doubling from
    /// `retry_backoff_ms`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry: RetryPolicy {
                max_attempts: config.max_retries.saturating_add(1),
                initial_backoff: Duration::from_millis(config.retry_backoff_ms),
                multiplier: 2,
                ..RetryPolicy::default()
            },
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

/// Send `messages` under the retry policy. Returns the response text.
async fn chat_with_retry(
    provider: &Arc<dyn LLMProvider>,
    label: &str,
    messages: &[ChatMessage],
    settings: &CallSettings,
) -> Result<String, InferError> {
    let start = Instant::now();
    let options = &settings.options();
    let outcome = settings
        .retry
        .run(label, move |_| provider.chat(messages, Some(options)))
        .await;

    match outcome.result {
        Ok(response) => {
            debug!(
                "{}: {} input tokens, {} output tokens, {} attempt(s), {:?}",
                label,
                response.prompt_tokens,
                response.completion_tokens,
                outcome.attempts,
                start.elapsed()
            );
            Ok(response.content)
        }
        Err(e) => {
            warn!("{}: giving up after {} attempt(s): {}", label, outcome.attempts, e);
            Err(InferError::Service(e.to_string()))
        }
    }
}

/// [`FieldExtractor`] backed by an edgequake-llm chat provider.
pub struct LlmFieldExtractor {
    provider: Arc<dyn LLMProvider>,
    settings: CallSettings,
}

impl LlmFieldExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, settings: CallSettings) -> Self {
        Self { provider, settings }
    }
}

#[async_trait]
impl FieldExtractor for LlmFieldExtractor {
    async fn infer(&self, request: &InferRequest<'_>) -> Result<String, InferError> {
        let messages = vec![
            ChatMessage::system(request.system_prompt.as_str()),
            ChatMessage::user(pass_user_message(request.document_text)),
        ];
        let content =
            chat_with_retry(&self.provider, &request.pass.to_string(), &messages, &self.settings)
                .await?;
        if content.trim().is_empty() {
            return Err(InferError::MalformedResponse("empty response".into()));
        }
        Ok(content)
    }
}

/// Page OCR through a vision-capable provider.
#[derive(Clone)]
pub struct VisionOcr {
    provider: Arc<dyn LLMProvider>,
    settings: CallSettings,
}

impl VisionOcr {
    pub fn new(provider: Arc<dyn LLMProvider>, settings: CallSettings) -> Self {
        Self { provider, settings }
    }

    /// Transcribe one page image.
    pub async fn transcribe(&self, page: usize, image: ImageData) -> Result<String, InferError> {
        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images("", vec![image]),
        ];
        chat_with_retry(&self.provider, &format!("page {page} OCR"), &messages, &self.settings)
            .await
    }
}
