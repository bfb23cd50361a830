//! Record types produced by discovery sources.
//!
//! All records are value objects: once created they are never mutated.
//! Enrichment builds a new record through the `with_*` constructors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A discovered URL with metadata about how it was found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    /// The discovered URL (absolute).
    pub url: String,

    /// The target domain this record belongs to.
    pub domain: String,

    /// Identifier of the adapter that produced it (e.g. "crt.sh", "wayback").
    pub source: String,

    /// Title from the source, when it provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Snippet or description text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,

    /// When the record was produced.
    pub discovered_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Page the URL was found on, when discovered by crawling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_url: Option<String>,

    /// Sitemap `<priority>` value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<f32>,

    /// Sitemap `<lastmod>` value, as given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastmod: Option<String>,

    /// Sitemap `<changefreq>` value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changefreq: Option<String>,

    /// Subdomain segment when found through a CT log or subdomain source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,

    /// True when the record came out of a web archive.
    #[serde(default)]
    pub is_archived: bool,

    /// Snapshot URL inside the archive, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_url: Option<String>,

    /// Which archive produced the record (e.g. "wayback", "commoncrawl").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_source: Option<String>,

    /// The materialized query that surfaced this URL, for engine sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_used: Option<String>,

    /// File extension for filetype discovery results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filetype: Option<String>,
}

impl UrlRecord {
    /// Create a record with the minimal required fields.
    pub fn new(
        url: impl Into<String>,
        domain: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            domain: domain.into(),
            source: source.into(),
            title: None,
            snippet: None,
            discovered_at: Utc::now(),
            status_code: None,
            content_type: None,
            parent_url: None,
            priority: None,
            lastmod: None,
            changefreq: None,
            subdomain: None,
            is_archived: false,
            archive_url: None,
            archive_source: None,
            query_used: None,
            filetype: None,
        }
    }

    /// Set title and snippet from a search result.
    pub fn with_metadata(mut self, title: Option<String>, snippet: Option<String>) -> Self {
        self.title = title;
        self.snippet = snippet;
        self
    }

    pub fn with_status(mut self, status_code: Option<u16>, content_type: Option<String>) -> Self {
        self.status_code = status_code;
        self.content_type = content_type;
        self
    }

    pub fn with_parent(mut self, parent_url: impl Into<String>) -> Self {
        self.parent_url = Some(parent_url.into());
        self
    }

    /// Set sitemap metadata.
    pub fn with_sitemap_fields(
        mut self,
        priority: Option<f32>,
        lastmod: Option<String>,
        changefreq: Option<String>,
    ) -> Self {
        self.priority = priority;
        self.lastmod = lastmod;
        self.changefreq = changefreq;
        self
    }

    pub fn with_subdomain(mut self, subdomain: Option<String>) -> Self {
        self.subdomain = subdomain;
        self
    }

    /// Mark the record as coming out of an archive.
    pub fn with_archive(
        mut self,
        archive_source: impl Into<String>,
        archive_url: Option<String>,
    ) -> Self {
        self.is_archived = true;
        self.archive_source = Some(archive_source.into());
        self.archive_url = archive_url;
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_used = Some(query.into());
        self
    }

    pub fn with_filetype(mut self, filetype: impl Into<String>) -> Self {
        self.filetype = Some(filetype.into());
        self
    }
}

/// Which backend verified or reported a link edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkProvider {
    HostGraph,
    CcWat,
    CcWatOffline,
    Majestic,
    TorBridge,
}

impl LinkProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkProvider::HostGraph => "host_graph",
            LinkProvider::CcWat => "cc_wat",
            LinkProvider::CcWatOffline => "cc_wat_offline",
            LinkProvider::Majestic => "majestic",
            LinkProvider::TorBridge => "tor_bridge",
        }
    }
}

impl std::fmt::Display for LinkProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge from one page or host to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Page or host that contains the link.
    pub source: String,

    /// Link destination (URL or domain).
    pub target: String,

    /// Edge weight from the graph index, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u64>,

    /// Human-visible anchor text, when extracted from archived HTML.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_live: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_flow: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation_flow: Option<u32>,

    pub provider: LinkProvider,
}

impl LinkRecord {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        provider: LinkProvider,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            weight: None,
            anchor_text: None,
            first_seen: None,
            last_seen: None,
            is_live: None,
            trust_flow: None,
            citation_flow: None,
            provider,
        }
    }

    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_anchor_text(mut self, anchor_text: impl Into<String>) -> Self {
        self.anchor_text = Some(anchor_text.into());
        self
    }

    pub fn with_flow(mut self, trust_flow: u32, citation_flow: u32) -> Self {
        self.trust_flow = Some(trust_flow);
        self.citation_flow = Some(citation_flow);
        self
    }
}

/// Whether a hit came from the main sweep or an exclusion iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Normal,
    Exception,
}

/// A search-engine hit from the recall runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,

    /// Engine code (e.g. "bing").
    pub engine: String,

    /// Short engine badge shown next to results (e.g. "B").
    pub badge: String,

    /// The fully materialized query that produced this hit.
    pub query_used: String,

    /// Stable tag of the leaf query.
    pub query_tag: String,

    pub search_type: SearchType,

    /// 1-based exclusion iteration, for exception hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_iteration: Option<u32>,

    /// Market code the query ran under (e.g. "de-DE").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,

    /// Publication date when the engine reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl SearchHit {
    pub fn new(
        url: impl Into<String>,
        engine: impl Into<String>,
        badge: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: None,
            snippet: None,
            engine: engine.into(),
            badge: badge.into(),
            query_used: String::new(),
            query_tag: String::new(),
            search_type: SearchType::Normal,
            exception_iteration: None,
            market: None,
            date: None,
        }
    }

    pub fn with_metadata(mut self, title: Option<String>, snippet: Option<String>) -> Self {
        self.title = title;
        self.snippet = snippet;
        self
    }

    pub fn with_query(mut self, query: impl Into<String>, tag: impl Into<String>) -> Self {
        self.query_used = query.into();
        self.query_tag = tag.into();
        self
    }

    pub fn with_market(mut self, market: Option<String>) -> Self {
        self.market = market;
        self
    }

    /// Re-tag a hit as an exception-search result for the given iteration.
    pub fn as_exception(mut self, iteration: u32) -> Self {
        self.search_type = SearchType::Exception;
        self.exception_iteration = Some(iteration);
        self
    }
}

/// Byte-addressable pointer into an archived corpus.
///
/// The exact record bytes are fetched with
/// `Range: bytes={offset}-{offset + length - 1}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRef {
    pub url: String,

    /// Archive segment id (e.g. "CC-MAIN-2024-10").
    pub archive: String,

    /// Path of the WARC file inside the archive bucket.
    pub filename: String,

    pub offset: u64,
    pub length: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl PageRef {
    /// Value for the HTTP Range header addressing this record.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.offset, self.offset + self.length - 1)
    }
}

/// Per-source counters reported in the completion summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: String,
    /// Records the source yielded, before dedup.
    pub found: usize,
    /// Records that survived dedup.
    pub unique: usize,
    /// Errors the source logged (including deadline hits).
    pub errors: usize,
}

/// Completion summary for a discovery run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub per_source: Vec<SourceStats>,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
    pub logs: Vec<crate::logstream::LogEntry>,
}

impl Summary {
    /// Every source that ran in this session, in plan order.
    pub fn sources_used(&self) -> Vec<&str> {
        self.per_source.iter().map(|s| s.source.as_str()).collect()
    }

    /// Sources that contributed at least one unique record.
    pub fn sources_with_results(&self) -> Vec<&str> {
        self.per_source
            .iter()
            .filter(|s| s.unique > 0)
            .map(|s| s.source.as_str())
            .collect()
    }
}

/// Which tier of the PDF extraction cascade produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Cloud,
    CcWarc,
    Local,
    VisionOcr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Cloud => "cloud",
            ExtractionMethod::CcWarc => "cc_warc",
            ExtractionMethod::Local => "local",
            ExtractionMethod::VisionOcr => "vision_ocr",
        }
    }
}

/// A PDF whose body text contained the search keyword.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentMatch {
    pub url: String,
    pub keyword_matches: usize,
    /// ±200 chars of context around the first occurrence.
    pub snippet: String,
    pub content_length: usize,
    pub extraction_method: ExtractionMethod,
}

/// Response of a filetype discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiletypeResponse {
    pub domain: String,
    pub filetypes_searched: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    pub total_found: usize,
    pub results: Vec<UrlRecord>,
    /// PDFs containing the keyword, sorted by match count descending.
    pub content_matches: Vec<ContentMatch>,
    pub sources_used: Vec<String>,
    pub elapsed_ms: u64,
    pub logs: Vec<crate::logstream::LogEntry>,
}

/// Whether a backlink target names a whole domain or one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Domain,
    Url,
}

/// Per-provider contribution counter for backlink runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCount {
    pub provider: String,
    pub count: usize,
}

/// Response of a backlink discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklinkResponse {
    pub target: String,
    pub target_kind: TargetKind,
    pub links: Vec<LinkRecord>,
    pub per_provider: Vec<ProviderCount>,
    pub elapsed_ms: u64,
    pub logs: Vec<crate::logstream::LogEntry>,
}
