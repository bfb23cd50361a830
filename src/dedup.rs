//! Session-scoped unique-URL filter.
//!
//! One dedup instance is shared by all workers of a run. Keys are canonical
//! URLs; a record is emitted at most once per session. Optional post-filters
//! drop hits that fail the exact-phrase or time-slice checks before they
//! count as seen.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};
use tokio::sync::Mutex;
use url::Url;

use crate::models::{SearchHit, UrlRecord};

/// Canonical form used as the dedup key: scheme and host lowercased,
/// trailing slash removed from the path, query preserved byte-for-byte,
/// fragment dropped.
pub fn canonical_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(parsed) => {
            let scheme = parsed.scheme().to_lowercase();
            let host = parsed.host_str().unwrap_or("").to_lowercase();
            let port = match parsed.port() {
                Some(p) => format!(":{p}"),
                None => String::new(),
            };
            let mut path = parsed.path().to_string();
            while path.ends_with('/') {
                path.pop();
            }
            let query = match parsed.query() {
                Some(q) => format!("?{q}"),
                None => String::new(),
            };
            format!("{scheme}://{host}{port}{path}{query}")
        }
        Err(_) => raw.trim().to_string(),
    }
}

/// Caller-supplied date window for the time-slice post-filter.
///
/// Dates compare lexically, which is correct for the ISO and CDX timestamp
/// formats the sources emit.
#[derive(Debug, Clone, Default)]
pub struct TimeSlice {
    pub after: Option<String>,
    pub before: Option<String>,
}

impl TimeSlice {
    fn passes(&self, date: Option<&str>) -> bool {
        let Some(date) = date else {
            // No date on the record: include by default.
            return true;
        };
        if let Some(after) = &self.after {
            if date < after.as_str() {
                return false;
            }
        }
        if let Some(before) = &self.before {
            if date > before.as_str() {
                return false;
            }
        }
        true
    }
}

#[derive(Default)]
struct DedupState {
    seen: HashSet<String>,
    domains: HashSet<String>,
}

/// Thread-safe unique-URL filter with optional post-filters.
pub struct Dedup {
    state: Mutex<DedupState>,
    phrase_filter: Option<Regex>,
    time_slice: Option<TimeSlice>,
}

impl Dedup {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DedupState::default()),
            phrase_filter: None,
            time_slice: None,
        }
    }

    /// Require title+snippet+url to contain the phrase, tolerating
    /// whitespace, hyphens, underscores, periods and slashes between words.
    /// The regex is built once, at session start.
    pub fn with_exact_phrase(mut self, phrase: &str) -> Self {
        let clean = phrase.trim().trim_matches(|c| c == '"' || c == '\'');
        let words: Vec<String> = clean.split_whitespace().map(|w| regex::escape(w)).collect();
        if words.is_empty() {
            return self;
        }
        let pattern = words.join(r"[\s\-_./]*");
        match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(regex) => self.phrase_filter = Some(regex),
            Err(_) => self.phrase_filter = None,
        }
        self
    }

    pub fn with_time_slice(mut self, slice: TimeSlice) -> Self {
        self.time_slice = Some(slice);
        self
    }

    fn passes_phrase(&self, text: &str) -> bool {
        match &self.phrase_filter {
            Some(regex) => regex.is_match(text),
            None => true,
        }
    }

    fn passes_time(&self, date: Option<&str>) -> bool {
        match &self.time_slice {
            Some(slice) => slice.passes(date),
            None => true,
        }
    }

    /// Insert a URL record; returns it only when previously unseen and
    /// passing all post-filters.
    pub async fn add_url_record(&self, record: UrlRecord) -> Option<UrlRecord> {
        let text = format!(
            "{} {} {}",
            record.title.as_deref().unwrap_or(""),
            record.snippet.as_deref().unwrap_or(""),
            record.url
        );
        if !self.passes_phrase(&text) {
            return None;
        }
        if !self.passes_time(record.lastmod.as_deref()) {
            return None;
        }

        let key = canonical_url(&record.url);
        let mut state = self.state.lock().await;
        if !state.seen.insert(key) {
            return None;
        }
        if let Some(host) = host_of(&record.url) {
            state.domains.insert(host);
        }
        Some(record)
    }

    /// Insert a batch, returning only the freshly added records.
    pub async fn add_url_records(&self, records: Vec<UrlRecord>) -> Vec<UrlRecord> {
        let mut fresh = Vec::new();
        for record in records {
            if let Some(record) = self.add_url_record(record).await {
                fresh.push(record);
            }
        }
        fresh
    }

    /// Insert a search hit; same contract as [`add_url_record`].
    pub async fn add_search_hit(&self, hit: SearchHit) -> Option<SearchHit> {
        let text = format!(
            "{} {} {}",
            hit.title.as_deref().unwrap_or(""),
            hit.snippet.as_deref().unwrap_or(""),
            hit.url
        );
        if !self.passes_phrase(&text) {
            return None;
        }
        if !self.passes_time(hit.date.as_deref()) {
            return None;
        }

        let key = canonical_url(&hit.url);
        let mut state = self.state.lock().await;
        if !state.seen.insert(key) {
            return None;
        }
        if let Some(host) = host_of(&hit.url) {
            state.domains.insert(host);
        }
        Some(hit)
    }

    /// Snapshot of the domains emitted so far. Used by the iterative
    /// excluder; arrivals after the snapshot join the next one.
    pub async fn domain_snapshot(&self) -> HashSet<String> {
        self.state.lock().await.domains.clone()
    }

    /// Number of unique URLs admitted so far.
    pub async fn len(&self) -> usize {
        self.state.lock().await.seen.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.seen.is_empty()
    }
}

impl Default for Dedup {
    fn default() -> Self {
        Self::new()
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}
