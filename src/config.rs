//! Options structs for the session API.
//!
//! Every struct rejects unrecognized keys when deserialized, so a typo in a
//! caller-supplied options object fails at planning time instead of being
//! silently ignored.

use serde::{Deserialize, Serialize};

use crate::error::DiscoverError;

/// Known Common Crawl archive segments, newest first.
pub const CC_ARCHIVES: &[&str] = &[
    "CC-MAIN-2024-51",
    "CC-MAIN-2024-46",
    "CC-MAIN-2024-33",
    "CC-MAIN-2024-22",
    "CC-MAIN-2024-10",
];

/// Mapping depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Quick sources only.
    Fast,
    /// All sources, including crawls and deep archive sweeps.
    Deep,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Fast
    }
}

/// Options for `discover_domain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoverOptions {
    pub mode: Mode,

    /// Explicit source subset; all mode-admitted sources when absent.
    pub sources: Option<Vec<String>>,

    /// Admit URLs outside the target domain.
    pub allow_external: bool,

    /// Maximum unique records to emit; 0 means unlimited.
    pub limit: usize,

    /// Archive date range (CDX timestamp or ISO prefix), applied by
    /// archive sources.
    pub from: Option<String>,
    pub to: Option<String>,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Fast,
            sources: None,
            allow_external: false,
            limit: 0,
            from: None,
            to: None,
        }
    }
}

impl DiscoverOptions {
    /// Parse from a caller-supplied JSON object, rejecting unknown keys.
    pub fn from_value(value: serde_json::Value) -> Result<Self, DiscoverError> {
        serde_json::from_value(value).map_err(|e| DiscoverError::Config(e.to_string()))
    }
}

/// Options for `discover_backlinks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BacklinkOptions {
    /// False: referring domains only (fast). True: referring pages with
    /// anchor verification (rich).
    pub pages: bool,

    pub include_anchor_text: bool,

    /// Consult the archive pipeline (CC Index + WARC fetches).
    pub include_archives: bool,

    /// Merge the paid provider's data when available.
    pub include_majestic: bool,

    /// Merge Tor bridge sources when available.
    pub include_tor: bool,

    /// How many top referring domains get page-level enrichment.
    pub top_domains: usize,

    pub limit: usize,

    /// Archive segment for index lookups.
    pub archive: String,
}

impl Default for BacklinkOptions {
    fn default() -> Self {
        Self {
            pages: false,
            include_anchor_text: true,
            include_archives: true,
            include_majestic: true,
            include_tor: true,
            top_domains: 20,
            limit: 100,
            archive: CC_ARCHIVES[CC_ARCHIVES.len() - 1].to_string(),
        }
    }
}

impl BacklinkOptions {
    pub fn from_value(value: serde_json::Value) -> Result<Self, DiscoverError> {
        serde_json::from_value(value).map_err(|e| DiscoverError::Config(e.to_string()))
    }
}

/// Options for `discover_filetypes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FiletypeOptions {
    pub limit: usize,

    /// How many found PDFs get content-searched for the keyword.
    pub max_content_pdfs: usize,

    /// Concurrency of the per-PDF extraction cascade.
    pub content_concurrency: usize,
}

impl Default for FiletypeOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            max_content_pdfs: 20,
            content_concurrency: 10,
        }
    }
}

impl FiletypeOptions {
    pub fn from_value(value: serde_json::Value) -> Result<Self, DiscoverError> {
        serde_json::from_value(value).map_err(|e| DiscoverError::Config(e.to_string()))
    }
}

/// Caller-facing time-slice bounds (lexical date comparison).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeSliceOptions {
    pub after: Option<String>,
    pub before: Option<String>,
}

/// Options for `recall_search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecallOptions {
    /// Engine code the recall sweep targets.
    pub engine: String,

    /// Chunked lists of host patterns, each becoming a `(site:a OR …)`
    /// block.
    pub site_groups: Vec<Vec<String>>,

    /// Market codes (e.g. "en-US"); the unfiltered variant always runs too.
    pub locales: Vec<String>,

    /// Filetype categories resolved through the extension library.
    pub filetype_categories: Vec<String>,

    /// Extra extensions in plain form ("csv", not "filetype:csv").
    pub extra_extensions: Vec<String>,

    /// Base-operator subset; all supported bases when absent.
    pub bases: Option<Vec<String>>,

    pub max_results_per_query: usize,

    /// Base polite delay between engine calls, milliseconds.
    pub polite_delay_ms: u64,

    pub exception_search_iterations: u32,

    pub time_slice: Option<TimeSliceOptions>,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            engine: "bing".to_string(),
            site_groups: Vec::new(),
            locales: Vec::new(),
            filetype_categories: Vec::new(),
            extra_extensions: Vec::new(),
            bases: None,
            max_results_per_query: 50,
            polite_delay_ms: 500,
            exception_search_iterations: 3,
            time_slice: None,
        }
    }
}

impl RecallOptions {
    pub fn from_value(value: serde_json::Value) -> Result<Self, DiscoverError> {
        serde_json::from_value(value).map_err(|e| DiscoverError::Config(e.to_string()))
    }
}

/// Session-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Archive segments consulted by archive sources, newest first.
    pub archives: Vec<String>,

    /// Path of the out-of-process link-extractor binary, when installed.
    pub link_binary_path: Option<String>,

    /// Base URL of the archive data bucket (Range requests).
    pub archive_data_base: String,

    /// Base URL of the archive index API.
    pub archive_index_base: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            archives: CC_ARCHIVES.iter().map(|s| s.to_string()).collect(),
            link_binary_path: None,
            archive_data_base: "https://data.commoncrawl.org".to_string(),
            archive_index_base: "https://index.commoncrawl.org".to_string(),
        }
    }
}

/// Validate a caller-supplied target domain before planning.
pub fn validate_target(target: &str) -> Result<(), DiscoverError> {
    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(DiscoverError::Config("empty target".to_string()));
    }
    let bare = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    if bare.contains(char::is_whitespace) {
        return Err(DiscoverError::Config(format!("invalid target: {target}")));
    }
    if !bare.contains('.') {
        return Err(DiscoverError::Config(format!(
            "target is not a domain or URL: {target}"
        )));
    }
    Ok(())
}
