//! Bounded retry with exponential backoff for rate-limited calls
//!
//! Sources map their responses into a `FetchOutcome`. Only `RateLimited` is
//! retried; any other failure is returned immediately so the caller can log
//! and skip. Backoff doubles each attempt, is capped, and carries 0-199ms of
//! jitter so parallel refresh batches do not hit the upstream in lockstep.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::errors::{SourceError, SourceResult};

/// Outcome of a single upstream attempt
#[derive(Debug)]
pub enum FetchOutcome<T> {
    Ok(T),
    RateLimited,
    Failed(SourceError),
}

impl<T> From<SourceResult<T>> for FetchOutcome<T> {
    fn from(result: SourceResult<T>) -> Self {
        match result {
            Ok(value) => FetchOutcome::Ok(value),
            Err(e) if e.is_retryable() => FetchOutcome::RateLimited,
            Err(e) => FetchOutcome::Failed(e),
        }
    }
}

/// Retry policy for rate-limited upstream calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds (doubles each retry)
    pub initial_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-based), without jitter
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        std::cmp::min(self.initial_delay_ms.saturating_mul(factor), self.max_delay_ms)
    }
}

/// Run `op` until it succeeds, fails hard, or the attempt budget is spent
///
/// # Returns
/// * `Ok(T)` - an attempt succeeded
/// * `Err(SourceError::RateLimited)` - every attempt was throttled
/// * `Err(e)` - first non-retryable failure
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
) -> SourceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FetchOutcome<T>>,
{
    let attempts = config.max_attempts.max(1);

    for attempt in 0..attempts {
        match op().await {
            FetchOutcome::Ok(value) => return Ok(value),
            FetchOutcome::Failed(e) => return Err(e),
            FetchOutcome::RateLimited => {
                if attempt + 1 == attempts {
                    break;
                }
                let jitter = rand::random::<u64>() % 200;
                let backoff_ms = config.base_delay_ms(attempt) + jitter;
                tracing::warn!(
                    "{}: rate limited, attempt {} of {}, retrying in {}ms",
                    label,
                    attempt + 1,
                    attempts,
                    backoff_ms
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }

    Err(SourceError::RateLimited(format!(
        "{} after {} attempts",
        label, attempts
    )))
}
