//! Retry logic with exponential backoff.
//!
//! Wraps any fallible async operation. The wrapper knows nothing about what
//! the operation does; callers decide which errors are worth another attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ScrapingConfig;

/// Retry budget and backoff shape
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Multiplier applied per attempt
    pub multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Build the policy used for network-facing steps of a scrape
    pub fn from_config(config: &ScrapingConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay: Duration::from_secs(config.retry_delay),
            multiplier: config.retry_backoff,
            max_delay: Duration::from_secs(config.retry_max_delay),
        }
    }

    /// Attempts actually permitted; a zero budget still runs once.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay slept after the failure of `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let delay_ms = self.base_delay.as_millis() as f64 * factor;
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64)
    }
}

/// Failure surfaced by the retry wrapper
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every permitted attempt failed with a retryable error
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: E,
    },
    /// A non-retryable error stopped the loop
    #[error("{operation} failed: {source}")]
    Aborted {
        operation: String,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Exhausted { attempts, .. } => Some(*attempts),
            RetryError::Aborted { .. } => None,
        }
    }

    /// The last error returned by the operation
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Aborted { source, .. } => source,
        }
    }
}

/// Retry an async operation, retrying only errors accepted by `is_retryable`
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if !is_retryable(&e) => {
                return Err(RetryError::Aborted {
                    operation: operation_name.to_string(),
                    source: e,
                });
            }
            Err(e) => {
                if attempt + 1 >= attempts {
                    return Err(RetryError::Exhausted {
                        operation: operation_name.to_string(),
                        attempts,
                        source: e,
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name,
                    attempt + 1,
                    attempts,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Retry an async operation, treating every error as retryable
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(policy, operation_name, |_| true, operation).await
}
