//! Field extraction gateway: two independent passes over the document text.
//!
//! Each pass sends the whole document with a prompt scoped to its home
//! fields. The model is treated as unreliable:
//!
//! 1. the response must contain a JSON object (fences and chatter are
//!    stripped);
//! 2. an unparseable response is retried once with a stricter "JSON only"
//!    prompt;
//! 3. anything still wrong, a timeout or a service error turns the pass into
//!    an empty [`RawFieldSet`] plus an `ExtractionPassFailed` issue.
//!
//! A pass therefore never fails the document.

use crate::error::{InferError, StageIssue};
use crate::prompts::pass_system_prompt;
use crate::record::{Pass, RawFieldSet};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One request to the structured-extraction model.
#[derive(Debug, Clone)]
pub struct InferRequest<'a> {
    pub pass: Pass,
    pub system_prompt: String,
    pub document_text: &'a str,
    /// Set on the retry after a malformed response.
    pub strict: bool,
    pub timeout: Duration,
}

/// The structured-extraction model.
///
/// Returns the model's raw text; parsing happens in the gateway so every
/// implementation gets the same tolerance for fences and chatter.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn infer(&self, request: &InferRequest<'_>) -> Result<String, InferError>;
}

/// Result of one pass.
#[derive(Debug, Clone)]
pub struct PassResult {
    pub fields: RawFieldSet,
    /// Why the pass produced nothing, when it failed.
    pub failure: Option<String>,
}

impl PassResult {
    pub fn issue(&self) -> Option<StageIssue> {
        self.failure.as_ref().map(|detail| StageIssue::ExtractionPassFailed {
            pass: self.fields.pass().number(),
            detail: detail.clone(),
        })
    }
}

/// Pull the JSON object out of a model response.
///
/// Accepts a bare object, one wrapped in ```json fences, or one surrounded
/// by prose; takes the span from the first `{` to the last `}`.
pub fn parse_response(raw: &str) -> Result<Value, InferError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InferError::MalformedResponse("empty response".into()));
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    let candidate = match (start, end) {
        (Some(s), Some(e)) if e > s => &trimmed[s..=e],
        _ => {
            return Err(InferError::MalformedResponse(format!(
                "no JSON object in response: {}",
                preview(trimmed)
            )))
        }
    };
    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| InferError::MalformedResponse(format!("{e}: {}", preview(candidate))))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(InferError::MalformedResponse("response is not a JSON object".into()))
    }
}

fn preview(s: &str) -> String {
    let cut: String = s.chars().take(80).collect();
    if cut.len() < s.len() {
        format!("{cut}…")
    } else {
        cut
    }
}

/// Time allowed for model calls: a per-call cap, clipped to the document deadline.
#[derive(Debug, Clone, Copy)]
pub struct CallBudget {
    pub per_call: Duration,
    pub deadline: Option<Instant>,
}

impl CallBudget {
    /// No deadline; every call gets `per_call`.
    pub fn per_call(per_call: Duration) -> Self {
        Self {
            per_call,
            deadline: None,
        }
    }

    pub fn until(per_call: Duration, deadline: Instant) -> Self {
        Self {
            per_call,
            deadline: Some(deadline),
        }
    }

    /// Budget for the next call. Zero once the deadline has passed.
    pub fn next(&self) -> Duration {
        match self.deadline {
            Some(d) => self.per_call.min(d.saturating_duration_since(Instant::now())),
            None => self.per_call,
        }
    }
}

/// Run one pass with the malformed-response retry.
///
/// Each call, the strict retry included, gets whatever [`CallBudget::next`]
/// allows at the moment it starts.
pub async fn extract_pass(
    extractor: &dyn FieldExtractor,
    pass: Pass,
    document_text: &str,
    budget: CallBudget,
) -> PassResult {
    let mut last_error = None;

    for strict in [false, true] {
        let timeout = budget.next();
        if timeout.is_zero() {
            last_error = Some(InferError::Timeout {
                secs: budget.per_call.as_secs(),
            });
            break;
        }
        let request = InferRequest {
            pass,
            system_prompt: pass_system_prompt(pass, strict),
            document_text,
            strict,
            timeout,
        };
        let outcome = match tokio::time::timeout(timeout, extractor.infer(&request)).await {
            Ok(r) => r.and_then(|raw| parse_response(&raw)),
            Err(_) => Err(InferError::Timeout {
                secs: timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(json) => {
                let fields = RawFieldSet::from_json(pass, &json);
                debug!("{}: {} populated fields (strict={})", pass, fields.populated(), strict);
                return PassResult {
                    fields,
                    failure: None,
                };
            }
            Err(InferError::MalformedResponse(detail)) if !strict => {
                warn!("{}: unparseable response, retrying with strict prompt: {}", pass, detail);
                last_error = Some(InferError::MalformedResponse(detail));
            }
            Err(e) => {
                last_error = Some(e);
                break;
            }
        }
    }

    let detail = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown failure".to_string());
    warn!("{}: extraction failed, continuing with an empty pass: {}", pass, detail);
    PassResult {
        fields: RawFieldSet::empty(pass),
        failure: Some(detail),
    }
}

/// Run both passes concurrently.
pub async fn extract_both(
    extractor: &dyn FieldExtractor,
    document_text: &str,
    budget: CallBudget,
) -> (PassResult, PassResult) {
    tokio::join!(
        extract_pass(extractor, Pass::One, document_text, budget),
        extract_pass(extractor, Pass::Two, document_text, budget),
    )
}
