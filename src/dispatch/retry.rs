//! Whole-cycle retry with exponential backoff.
//!
//! An attempt is a full submit+poll cycle. Only failures the provider marks as
//! transient are retried, and each retry resubmits from scratch so the
//! provider hands out a new job id.

use std::future::Future;
use std::time::Duration;

use crate::error::SketchbookError;

/// Outcome of one submit+poll cycle.
#[derive(Debug)]
pub enum AttemptResult {
    Success(String),
    Retryable(SketchbookError),
    Fatal(SketchbookError),
}

impl AttemptResult {
    /// Tag a raw attempt result using the provider's transient predicate.
    pub fn classify(
        result: Result<String, SketchbookError>,
        is_transient: impl Fn(&SketchbookError) -> bool,
    ) -> Self {
        match result {
            Ok(url) => Self::Success(url),
            Err(e) if is_transient(&e) => Self::Retryable(e),
            Err(e) => Self::Fatal(e),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each retry after it.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-indexed): initial × 2^retry.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.initial_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `attempt` until it succeeds, fails fatally, or the budget is spent.
/// `attempt` receives the 1-based attempt number. Returns the last error on
/// failure.
pub async fn run_with_retry<F, Fut>(
    policy: &RetryPolicy,
    provider: &str,
    mut attempt: F,
) -> Result<String, SketchbookError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptResult>,
{
    let max_attempts = policy.attempts();
    let mut number = 1;

    loop {
        match attempt(number).await {
            AttemptResult::Success(url) => return Ok(url),
            AttemptResult::Fatal(e) => {
                tracing::error!(
                    provider,
                    attempt = number,
                    reason = e.reason(),
                    "generation failed: {e}"
                );
                return Err(e);
            }
            AttemptResult::Retryable(e) if number < max_attempts => {
                let delay = policy.delay_for_retry(number - 1);
                tracing::warn!(
                    provider,
                    attempt = number,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient generation failure, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
                number += 1;
            }
            AttemptResult::Retryable(e) => {
                tracing::error!(
                    provider,
                    attempt = number,
                    "generation failed after {max_attempts} attempts: {e}"
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delays_double_from_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_retry(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(8));
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(policy.attempts(), 1);
    }
}
