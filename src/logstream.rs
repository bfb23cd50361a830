//! Structured per-source progress log.
//!
//! Every discovery run appends time-ordered entries that are returned with
//! the response so a consumer can render per-adapter progress. Entries also
//! mirror to `tracing` at info level.

use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One progress entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    /// Adapter or phase identifier.
    pub source: String,
    pub message: String,
    /// Result count associated with the message, 0 when not applicable.
    pub count: usize,
    /// Milliseconds since the run started.
    pub elapsed_ms: u64,
}

/// Append-only log shared across the workers of one run.
#[derive(Debug)]
pub struct LogStream {
    started: Instant,
    entries: Mutex<Vec<LogEntry>>,
}

impl LogStream {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Append an entry and mirror it to tracing.
    pub fn log(&self, source: &str, message: impl Into<String>, count: usize) {
        let message = message.into();
        if count > 0 {
            info!("[{}] {} ({} results)", source, message, count);
        } else {
            info!("[{}] {}", source, message);
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            source: source.to_string(),
            message,
            count,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };
        self.entries.lock().expect("log stream lock poisoned").push(entry);
    }

    /// Milliseconds since the run started.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Snapshot of all entries so far, in append order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().expect("log stream lock poisoned").clone()
    }
}

impl Default for LogStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_append_order() {
        let log = LogStream::new();
        log.log("sitemap", "Parsing root sitemap", 0);
        log.log("sitemap", "Found URLs", 12);
        log.log("crt.sh", "Found subdomains", 3);

        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].source, "sitemap");
        assert_eq!(entries[1].count, 12);
        assert_eq!(entries[2].source, "crt.sh");
    }

    #[test]
    fn elapsed_is_monotonic() {
        let log = LogStream::new();
        log.log("init", "start", 0);
        std::thread::sleep(std::time::Duration::from_millis(5));
        log.log("init", "later", 0);

        let entries = log.entries();
        assert!(entries[1].elapsed_ms >= entries[0].elapsed_ms);
    }
}
