//! Error taxonomy for the discovery engine.
//!
//! Adapters catch their own errors: everything except `Config` is logged
//! into the session log stream and counted in per-source stats rather than
//! propagated. A session fails only on `Config` errors raised before
//! planning.

use thiserror::Error;

/// Errors that can occur during a discovery session.
#[derive(Debug, Error)]
pub enum DiscoverError {
    /// Missing credentials, invalid target, unrecognized option keys.
    /// Fatal at session start.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout, 5xx, connection reset. Retried with backoff inside the
    /// adapter.
    #[error("Network error: {0}")]
    Network(String),

    /// 429, 202, or an anti-bot page signature. Retried with a longer
    /// backoff; the adapter may shed remaining work.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// 401/403 or API quota exhausted. The adapter is disabled for the
    /// rest of the session.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Malformed XML, JSON, or HTML. The record is skipped and counted.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Per-source timeout or max-results limit reached.
    #[error("Budget exhausted: {0}")]
    Budget(String),

    /// Caller cancel or session deadline. No retries.
    #[error("Cancelled")]
    Cancelled,
}

impl DiscoverError {
    /// Classify an HTTP status into an error kind, where one applies.
    /// 202 counts as rate limiting: the archive indexes answer it while
    /// shedding load.
    pub fn from_status(status: u16, context: &str) -> Option<Self> {
        match status {
            202 | 429 => Some(DiscoverError::RateLimited(format!("HTTP {status}: {context}"))),
            200..=399 => None,
            401 | 403 => Some(DiscoverError::Permission(format!("HTTP {status}: {context}"))),
            _ => Some(DiscoverError::Network(format!("HTTP {status}: {context}"))),
        }
    }

    /// Whether a retry inside the adapter is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, DiscoverError::Network(_) | DiscoverError::RateLimited(_))
    }

    /// Anti-bot responses get a tripled backoff.
    pub fn is_anti_bot(&self) -> bool {
        let text = self.to_string().to_lowercase();
        text.contains("captcha") || text.contains("blocked")
    }
}

impl From<reqwest::Error> for DiscoverError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DiscoverError::Network(format!("timeout: {err}"))
        } else if err.is_status() {
            let status = err.status().map(|s| s.as_u16()).unwrap_or(0);
            DiscoverError::from_status(status, &err.to_string())
                .unwrap_or_else(|| DiscoverError::Network(err.to_string()))
        } else {
            DiscoverError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DiscoverError {
    fn from(err: serde_json::Error) -> Self {
        DiscoverError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(DiscoverError::from_status(200, "ok").is_none());
        assert!(matches!(
            DiscoverError::from_status(429, "x"),
            Some(DiscoverError::RateLimited(_))
        ));
        assert!(matches!(
            DiscoverError::from_status(202, "x"),
            Some(DiscoverError::RateLimited(_))
        ));
        assert!(matches!(
            DiscoverError::from_status(403, "x"),
            Some(DiscoverError::Permission(_))
        ));
        assert!(matches!(
            DiscoverError::from_status(503, "x"),
            Some(DiscoverError::Network(_))
        ));
    }

    #[test]
    fn transient_kinds() {
        assert!(DiscoverError::Network("reset".into()).is_transient());
        assert!(DiscoverError::RateLimited("429".into()).is_transient());
        assert!(!DiscoverError::Permission("403".into()).is_transient());
        assert!(!DiscoverError::Cancelled.is_transient());
    }

    #[test]
    fn anti_bot_detection() {
        assert!(DiscoverError::RateLimited("captcha page returned".into()).is_anti_bot());
        assert!(DiscoverError::Network("request Blocked by host".into()).is_anti_bot());
        assert!(!DiscoverError::Network("connection reset".into()).is_anti_bot());
    }
}
