//! Bounded retry with exponential backoff and jitter.
//!
//! Retry lives entirely inside the provider adapter: exactly the
//! categories {RateLimit, Server, Network} are retried, every other
//! category is terminal, and the orchestrator never re-submits a whole
//! job. Backoff sleeps are capped by the job deadline so a retrying
//! adapter cannot outlive its run.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{CategorizedError, ErrorCategory};

/// Attempt budget and backoff shape for one adapter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first; minimum 1.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub base_delay: Duration,
    /// Ceiling on any single backoff sleep.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff for the given zero-based completed-attempt count, with up
    /// to 25% random jitter added.
    fn backoff(&self, completed_attempts: u32) -> Duration {
        let exponent = completed_attempts.saturating_sub(1).min(16);
        let factor = 2_u32.saturating_pow(exponent);
        let raw = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter_ms = raw.as_millis().min(u128::from(u64::MAX / 4)) / 4;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            let bound = u64::try_from(jitter_ms).unwrap_or(u64::MAX);
            Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
        };
        raw.saturating_add(jitter)
    }
}

/// Run `attempt` until it succeeds, fails terminally, or the budget or
/// deadline is exhausted.
///
/// # Errors
///
/// Returns the last observed error once no retry is possible, or
/// [`ErrorCategory::Cancelled`] when the deadline elapses before another
/// attempt could start.
pub async fn with_retries<F, Fut, T>(
    policy: RetryPolicy,
    provider: &str,
    deadline: Option<Instant>,
    mut attempt: F,
) -> Result<T, CategorizedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CategorizedError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts_made = 0_u32;

    loop {
        if deadline_elapsed(deadline) {
            return Err(deadline_error(provider));
        }

        let result = attempt().await;
        attempts_made = attempts_made.saturating_add(1);

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.category.is_retryable() || attempts_made >= max_attempts {
            return Err(err);
        }

        let pause = policy.backoff(attempts_made);
        let pause = match deadline {
            Some(limit) => {
                let remaining = limit.saturating_duration_since(Instant::now());
                if remaining <= pause {
                    // Not enough budget for another attempt.
                    return Err(deadline_error(provider).with_source(err));
                }
                pause
            }
            None => pause,
        };

        debug!(
            provider,
            attempt = attempts_made,
            category = %err.category,
            backoff_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
            "retrying transient provider failure"
        );
        tokio::time::sleep(pause).await;
    }
}

fn deadline_elapsed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|limit| Instant::now() >= limit)
}

fn deadline_error(provider: &str) -> CategorizedError {
    CategorizedError::new(
        ErrorCategory::Cancelled,
        format!("deadline exceeded while calling {provider}"),
    )
    .with_provider(provider)
}
