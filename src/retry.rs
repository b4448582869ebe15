//! Retry with exponential backoff
//!
//! One policy type shared by the fetcher's lightweight path and the
//! summarization engine's provider calls. Whether an error is worth another
//! attempt is decided by the error type itself through [`Retryable`].

use std::future::Future;
use std::time::Duration;

/// Errors that know whether repeating the operation can help
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-provided delay before the next attempt, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// The last error seen once every attempt was used
#[derive(Debug, Clone)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub error: E,
}

/// Bounded retry schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            ..Self::default()
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Sum of the delays slept between attempts when every attempt fails
    ///
    /// Server-provided `Retry-After` hints are not included.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|attempt| self.backoff_for(attempt)).sum()
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out of attempts
    ///
    /// Non-retryable errors are returned immediately with the attempt count
    /// at which they happened.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        mut operation: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_retryable() || attempt >= self.max_attempts => {
                    return Err(RetryExhausted { attempts: attempt, error });
                }
                Err(error) => {
                    let delay = error
                        .retry_after()
                        .map(|hint| hint.min(self.max_backoff))
                        .unwrap_or_else(|| self.backoff_for(attempt));
                    tracing::debug!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {}",
                        error
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
