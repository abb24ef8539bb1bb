//! Retry policy for blocking external calls.
//!
//! The policy is a plain value (attempt cap + exponential schedule) plus a
//! classification hook, so the schedule can be inspected and tested without
//! ever sleeping. With the default 500 ms base, ×2 multiplier and 4 attempts
//! the waits between attempts are 500 ms → 1 s → 2 s.

use crate::error::StoreError;
use edgequake_llm::LlmError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Tells the retry loop whether an error is worth another attempt.
pub trait Classify {
    /// `true` for transient failures (network, throttling, 5xx).
    fn is_transient(&self) -> bool;
}

impl Classify for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Network, throttling and server errors are retried. Auth, bad-request and
/// unknown-model errors are not, and neither is an oversized prompt: the same
/// request would fail the same way.
impl Classify for LlmError {
    fn is_transient(&self) -> bool {
        self.is_recoverable() && !matches!(self, LlmError::TokenLimitExceeded { .. })
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always ≥ 1.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_backoff: Duration,
    /// Growth factor applied to each subsequent wait.
    pub multiplier: u32,
    /// Upper bound on any single wait.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Attempts actually made (1-based).
    pub attempts: u32,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait inserted before attempt number `attempt` (1-based).
    ///
    /// Attempt 1 never waits; attempt 2 waits `initial_backoff`; each later
    /// attempt multiplies the previous wait, capped at `max_backoff`.
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(2));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// The full list of waits this policy would insert.
    pub fn schedule(&self) -> Vec<Duration> {
        (2..=self.max_attempts.max(1))
            .map(|a| self.backoff_before(a))
            .collect()
    }

    /// Run `op` until it succeeds, fails permanently, or the cap is hit.
    ///
    /// `op` receives the 1-based attempt number. Non-transient errors are
    /// returned immediately without consuming further attempts.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let wait = self.backoff_before(attempt);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            match op(attempt).await {
                Ok(v) => {
                    return RetryOutcome {
                        result: Ok(v),
                        attempts: attempt,
                    }
                }
                Err(e) if e.is_transient() && attempt < max => {
                    warn!(
                        "{}: attempt {}/{} failed, retrying in {:?}: {}",
                        label,
                        attempt,
                        max,
                        self.backoff_before(attempt + 1),
                        e
                    );
                    attempt += 1;
                }
                Err(e) => {
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
            }
        }
    }
}
