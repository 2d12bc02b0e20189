//! Retry-with-backoff combinator
//!
//! Retry policy is deliberately kept out of the fetch client: callers wrap
//! individual requests in [`retry_fetch`], which retries transient faults
//! with exponential backoff and jitter up to a bounded attempt count. Fatal
//! faults and empty-page signals pass through untouched.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::constants::limits;
use crate::errors::{FetchError, FetchResult};

/// Bounded exponential backoff schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (must be >= 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Jitter factor applied to each delay (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: limits::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(limits::RETRY_BASE_DELAY_MS),
            max_delay: limits::MAX_BACKOFF,
            jitter: limits::BACKOFF_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Policy with a custom attempt bound and default delays
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Fast policy for tests
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        }
    }

    /// Delay before retry number `retry` (1-based), doubled each step
    fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let base = self.base_delay.saturating_mul(2_u32.saturating_pow(exp));
        let capped = base.min(self.max_delay);
        if self.jitter <= 0.0 {
            return capped;
        }
        let spread = capped.as_millis() as f64 * self.jitter;
        let offset = rand::thread_rng().gen_range(0.0..=spread);
        capped + Duration::from_millis(offset as u64)
    }
}

/// Outcome of a retried operation, with the attempt count for tracing
#[derive(Debug)]
pub struct Retried<T> {
    /// Final outcome after retries
    pub outcome: FetchResult<T>,
    /// Attempts actually made (>= 1)
    pub attempts: u32,
}

/// Run `op` up to `policy.max_attempts` times, backing off between
/// transient faults
///
/// The closure receives the 1-based attempt number. Non-transient errors
/// return immediately; a transient error on the final attempt is returned
/// as-is so callers can still classify it.
pub async fn retry_fetch<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Retried<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = FetchResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return Retried {
                    outcome: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff_delay(attempt);
                warn!(
                    "Transient fault (attempt {}/{}): {}. Retrying in {}ms",
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Retried {
                    outcome: Err(e),
                    attempts: attempt,
                }
            }
        }
    }
}
