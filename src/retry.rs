//! Retry-with-backoff combinator for adapter calls.
//!
//! Transient failures (5xx, connection errors, rate-limit responses) retry
//! with exponential backoff plus jitter; anti-bot signatures triple the
//! wait. Cancellation aborts immediately, so an in-flight operation stops
//! within one retry cycle.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::DiscoverError;

/// Retry settings for one adapter call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Multiplier applied to the wait when the error looks like an
    /// anti-bot response.
    pub anti_bot_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            anti_bot_multiplier: 3.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    /// Run `op` until it succeeds, fails terminally, or the retry budget
    /// is exhausted.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, DiscoverError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DiscoverError>>,
    {
        let mut last_error = DiscoverError::Network("no attempt made".to_string());

        for attempt in 0..=self.max_retries {
            if cancel.is_cancelled() {
                return Err(DiscoverError::Cancelled);
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(DiscoverError::Cancelled) => return Err(DiscoverError::Cancelled),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => {
                    if attempt < self.max_retries {
                        let mut wait = self.base_delay.as_secs_f64() * f64::from(1u32 << attempt)
                            + jitter_unit();
                        if err.is_anti_bot() {
                            wait *= self.anti_bot_multiplier;
                        }
                        warn!(
                            "Attempt {} failed: {}. Retrying in {:.1}s...",
                            attempt + 1,
                            err,
                            wait
                        );
                        let sleep = Duration::from_secs_f64(wait);
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(DiscoverError::Cancelled),
                            _ = tokio::time::sleep(sleep) => {}
                        }
                    }
                    last_error = err;
                }
            }
        }

        Err(last_error)
    }
}

/// Polite randomized delay between scrape tasks: `base` scaled by a
/// uniform factor in [0.5, 1.5].
pub async fn polite_delay(base: Duration, cancel: &CancellationToken) {
    let factor = 0.5 + jitter_unit();
    let wait = Duration::from_secs_f64(base.as_secs_f64() * factor);
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(wait) => {}
    }
}

/// Uniform-ish value in [0, 1) drawn from the clock's sub-second noise.
fn jitter_unit() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1_000_000) / 1_000_000.0
}
