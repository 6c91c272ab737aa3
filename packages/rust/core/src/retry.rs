//! Timeouts and retry with exponential backoff for capability calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use leadflow_shared::{LeadflowError, Result};

/// Backoff doubling stops growing after this many attempts.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// How a single capability call is bounded and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never less than one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            timeout,
        }
    }

    /// Delay after the `attempt`-th failure (1-based): `base * 2^(attempt - 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(1 << shift)
    }
}

/// Result of a retried call plus how many attempts were made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Bound a capability call. An elapsed timeout is a transient error.
pub async fn with_timeout<T, F>(capability: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(LeadflowError::transient(
            capability,
            format!("timed out after {}s", limit.as_secs_f64()),
        )),
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
pub async fn retry<T, F, Fut>(capability: &'static str, policy: RetryPolicy, mut op: F) -> Attempted<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = with_timeout(capability, policy.timeout, op(attempt)).await;
        match result {
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    capability,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            result => {
                return Attempted {
                    result,
                    attempts: attempt,
                };
            }
        }
    }
}
