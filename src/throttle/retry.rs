//! Retry with exponential backoff
//!
//! [`RetryPolicy`] is stateless: it runs an async operation, asks a predicate
//! whether a failure is worth another attempt, and sleeps between attempts.

use crate::config::RetryConfig;
use crate::FetchError;
use std::future::Future;
use std::time::Duration;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the policy's backoff delay
    Retry,
    /// Retry after a server-provided delay (e.g. `Retry-After`)
    RetryAfter(Duration),
    /// Give up and return the error
    Stop,
}

/// Exponential backoff retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` counts the first attempt and is at least 1
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// A policy that runs the operation exactly once
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff after the given number of failed attempts (1-based)
    ///
    /// `min(base * 2^(failures - 1), max)`
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, the predicate says stop, or attempts run out
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn execute<T, E, F, Fut, P>(&self, mut op: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> RetryDecision,
    {
        let mut attempt = 1;
        loop {
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= self.max_attempts {
                return Err(error);
            }

            let delay = match should_retry(&error) {
                RetryDecision::Stop => return Err(error),
                RetryDecision::Retry => self.backoff_delay(attempt),
                RetryDecision::RetryAfter(delay) => delay,
            };

            tracing::debug!(attempt, ?delay, "Retrying after failed attempt");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Retry predicate for fetch failures
///
/// Transient failures retry with backoff. A 429 retries only after its
/// `Retry-After`, and only when that is at most `max_retry_after`; otherwise it
/// is left to the rate limiter for this cycle. Client errors never retry.
pub fn transient_only(max_retry_after: Duration) -> impl Fn(&FetchError) -> RetryDecision {
    move |error| match error {
        e if e.is_transient() => RetryDecision::Retry,
        FetchError::RateLimited {
            retry_after: Some(after),
        } if *after <= max_retry_after => RetryDecision::RetryAfter(*after),
        _ => RetryDecision::Stop,
    }
}
