//! Adaptive per-source rate limiter.
//!
//! One bucket per adapter id, living for the whole process. Backs off on
//! 429/503, detects 403-based throttling from patterns across distinct
//! URLs, and gradually recovers after consecutive successes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Limiter tuning knobs.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Delay between requests when not in backoff.
    pub base_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Applied on a confirmed rate limit.
    pub backoff_multiplier: f64,
    /// Applied per recovery step; below 1.0.
    pub recovery_multiplier: f64,
    /// Consecutive successes before a recovery step.
    pub recovery_threshold: u32,
    /// Window for 403 pattern detection.
    pub forbidden_window: Duration,
    /// Unique URLs receiving 403 inside the window that confirm throttling.
    pub forbidden_threshold: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(120),
            backoff_multiplier: 2.0,
            recovery_multiplier: 0.75,
            recovery_threshold: 5,
            forbidden_window: Duration::from_secs(60),
            forbidden_threshold: 3,
        }
    }
}

/// State for a single adapter bucket.
#[derive(Debug, Clone)]
struct BucketState {
    current_delay: Duration,
    last_request: Option<Instant>,
    consecutive_successes: u32,
    /// Recent 403s as (timestamp, url); only a pattern across unique URLs
    /// in a short window counts as throttling.
    recent_403s: Vec<(Instant, String)>,
    in_backoff: bool,
    total_requests: u64,
    rate_limit_hits: u64,
}

impl BucketState {
    fn new(base_delay: Duration) -> Self {
        Self {
            current_delay: base_delay,
            last_request: None,
            consecutive_successes: 0,
            recent_403s: Vec::new(),
            in_backoff: false,
            total_requests: 0,
            rate_limit_hits: 0,
        }
    }

    fn time_until_ready(&self) -> Duration {
        match self.last_request {
            Some(last) => {
                let elapsed = last.elapsed();
                if elapsed >= self.current_delay {
                    Duration::ZERO
                } else {
                    self.current_delay - elapsed
                }
            }
            None => Duration::ZERO,
        }
    }

    fn add_403(&mut self, url: &str, window: Duration, threshold: usize) -> bool {
        let now = Instant::now();
        self.recent_403s.retain(|(time, _)| now.duration_since(*time) <= window);
        self.recent_403s.push((now, url.to_string()));
        self.unique_403_count() >= threshold
    }

    fn unique_403_count(&self) -> usize {
        let mut urls: Vec<&str> = self.recent_403s.iter().map(|(_, u)| u.as_str()).collect();
        urls.sort();
        urls.dedup();
        urls.len()
    }
}

/// Snapshot of one bucket for diagnostics.
#[derive(Debug, Clone)]
pub struct BucketStats {
    pub current_delay: Duration,
    pub in_backoff: bool,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}

/// Adaptive rate limiter keyed by adapter id.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<RwLock<HashMap<String, BucketState>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Wait until the bucket is ready, then mark the request as started.
    pub async fn acquire(&self, key: &str) {
        let wait = {
            let buckets = self.buckets.read().await;
            buckets
                .get(key)
                .map(|b| b.time_until_ready())
                .unwrap_or(Duration::ZERO)
        };

        if wait > Duration::ZERO {
            debug!("Rate limiting {}: waiting {:?}", key, wait);
            tokio::time::sleep(wait).await;
        }

        let mut buckets = self.buckets.write().await;
        let state = buckets
            .entry(key.to_string())
            .or_insert_with(|| BucketState::new(self.config.base_delay));
        state.last_request = Some(Instant::now());
        state.total_requests += 1;
    }

    /// Report a successful request; may take a recovery step.
    pub async fn report_success(&self, key: &str) {
        let mut buckets = self.buckets.write().await;
        if let Some(state) = buckets.get_mut(key) {
            state.consecutive_successes += 1;
            state.recent_403s.clear();

            if state.in_backoff && state.consecutive_successes >= self.config.recovery_threshold {
                let reduced = Duration::from_secs_f64(
                    state.current_delay.as_secs_f64() * self.config.recovery_multiplier,
                );
                state.current_delay = reduced.max(self.config.min_delay);

                if state.current_delay <= self.config.base_delay {
                    state.in_backoff = false;
                    state.current_delay = self.config.base_delay;
                    info!("Source {} recovered from rate limit backoff", key);
                } else {
                    debug!("Source {} delay reduced to {:?}", key, state.current_delay);
                }
                state.consecutive_successes = 0;
            }
        }
    }

    /// Report a confirmed rate limit (429 or 503).
    pub async fn report_rate_limit(&self, key: &str, status_code: u16) {
        let mut buckets = self.buckets.write().await;
        if let Some(state) = buckets.get_mut(key) {
            state.rate_limit_hits += 1;
            state.consecutive_successes = 0;
            state.recent_403s.clear();
            state.in_backoff = true;

            let raised = Duration::from_secs_f64(
                state.current_delay.as_secs_f64() * self.config.backoff_multiplier,
            );
            state.current_delay = raised.min(self.config.max_delay);

            warn!(
                "Rate limited on {} (HTTP {}), backing off to {:?}",
                key, status_code, state.current_delay
            );
        }
    }

    /// Report a 403. Backs off only when a pattern across unique URLs (or a
    /// Retry-After header) confirms throttling; returns true in that case.
    pub async fn report_forbidden(&self, key: &str, url: &str, has_retry_after: bool) -> bool {
        let mut buckets = self.buckets.write().await;
        let Some(state) = buckets.get_mut(key) else {
            return false;
        };

        let pattern = state.add_403(
            url,
            self.config.forbidden_window,
            self.config.forbidden_threshold,
        );
        state.consecutive_successes = 0;

        if has_retry_after || pattern {
            let unique = state.unique_403_count();
            state.rate_limit_hits += 1;
            state.in_backoff = true;
            state.recent_403s.clear();

            let raised = Duration::from_secs_f64(
                state.current_delay.as_secs_f64() * self.config.backoff_multiplier,
            );
            state.current_delay = raised.min(self.config.max_delay);

            warn!(
                "Throttling pattern on {} ({} unique URLs got 403), backing off to {:?}",
                key, unique, state.current_delay
            );
            true
        } else {
            debug!("403 on {} for {} - treating as access denied", key, url);
            false
        }
    }

    /// Report a 5xx other than 503: mild backoff.
    pub async fn report_server_error(&self, key: &str) {
        let mut buckets = self.buckets.write().await;
        if let Some(state) = buckets.get_mut(key) {
            let raised = Duration::from_secs_f64(state.current_delay.as_secs_f64() * 1.5);
            state.current_delay = raised.min(self.config.max_delay);
            debug!("Server error on {}, delay increased to {:?}", key, state.current_delay);
        }
    }

    pub async fn stats(&self) -> HashMap<String, BucketStats> {
        let buckets = self.buckets.read().await;
        buckets
            .iter()
            .map(|(key, state)| {
                (
                    key.clone(),
                    BucketStats {
                        current_delay: state.current_delay,
                        in_backoff: state.in_backoff,
                        total_requests: state.total_requests,
                        rate_limit_hits: state.rate_limit_hits,
                    },
                )
            })
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            buckets: self.buckets.clone(),
        }
    }
}
