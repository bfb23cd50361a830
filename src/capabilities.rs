//! External capability interfaces.
//!
//! The engine consumes these services without knowing which implementation
//! backs them; tests wire in fakes. Response shapes are limited to what the
//! adapters need to build normalized records.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DiscoverError;
use crate::fetch::Fetcher;
use crate::models::PageRef;

/// One SERP result from a search-engine backend.
#[derive(Debug, Clone)]
pub struct SerpResult {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub date: Option<String>,
}

/// Search-engine results page capability (API-backed or scrape-backed).
#[async_trait]
pub trait SerpClient: Send + Sync {
    /// Run `query` on the given engine; `market` is an engine market code
    /// like `en-US`. A zero-result return is success, not an error.
    async fn search(
        &self,
        engine: &str,
        query: &str,
        market: Option<&str>,
        num: usize,
    ) -> Result<Vec<SerpResult>, DiscoverError>;
}

/// URL returned by the fast site-map endpoint.
#[derive(Debug, Clone)]
pub struct MappedUrl {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Running,
    Completed,
    Failed,
}

/// One crawled page reported by a crawl-status poll.
#[derive(Debug, Clone)]
pub struct CrawlPage {
    pub url: Option<String>,
    pub title: Option<String>,
    /// Outgoing links reported for the page.
    pub links: Vec<String>,
    /// Raw HTML when the service returns it; asset references are mined
    /// out of this.
    pub html: Option<String>,
}

/// Status-poll payload for a running crawl job.
#[derive(Debug, Clone)]
pub struct CrawlStatus {
    pub state: CrawlState,
    /// Pages accumulated so far; pollers dedup across polls.
    pub pages: Vec<CrawlPage>,
    pub error: Option<String>,
}

/// Site-mapper service: fast map, deep polled crawl, search, and cloud
/// document parsing.
#[async_trait]
pub trait SiteMapper: Send + Sync {
    /// Single-call fast map, up to `limit` URLs.
    async fn map(
        &self,
        domain: &str,
        include_subdomains: bool,
        limit: usize,
    ) -> Result<Vec<MappedUrl>, DiscoverError>;

    /// Start a deep recursive crawl; returns a job id to poll.
    async fn start_crawl(
        &self,
        domain: &str,
        limit: usize,
        allow_external: bool,
    ) -> Result<String, DiscoverError>;

    async fn crawl_status(&self, job_id: &str) -> Result<CrawlStatus, DiscoverError>;

    /// Operator-style search endpoint (`site:` / `filetype:` queries).
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SerpResult>, DiscoverError>;

    /// Cloud document parser: fetches the URL server-side with
    /// `parsers: ["pdf"]` and returns markdown text.
    async fn parse_document(&self, url: &str) -> Result<String, DiscoverError>;
}

/// An incoming edge reported by the web-graph index.
#[derive(Debug, Clone)]
pub struct HostEdge {
    pub source_host: String,
    pub weight: u64,
}

/// Local web-graph backend: domain -> incoming edges.
#[async_trait]
pub trait GraphIndex: Send + Sync {
    async fn incoming_edges(
        &self,
        domain: &str,
        limit: usize,
        include_subdomains: bool,
    ) -> Result<Vec<HostEdge>, DiscoverError>;
}

/// A row from the local indexed corpus.
#[derive(Debug, Clone)]
pub struct IndexedPage {
    pub url: String,
    pub title: Option<String>,
    pub status_code: Option<u16>,
}

/// Previously crawled/discovered data in the local index.
#[async_trait]
pub trait LocalIndex: Send + Sync {
    /// Pages already scraped for a domain.
    async fn crawled_pages(
        &self,
        domain: &str,
        limit: usize,
    ) -> Result<Vec<IndexedPage>, DiscoverError>;

    /// Previously discovered URLs matching a domain or URL wildcard.
    async fn discovered_urls(
        &self,
        pattern: &str,
        limit: usize,
    ) -> Result<Vec<IndexedPage>, DiscoverError>;
}

/// Library-based PDF-to-text extraction. CPU-bound, runs on the worker.
pub trait PdfText: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, DiscoverError>;
}

/// Vision-capable LLM used as the OCR tier of the PDF cascade.
#[async_trait]
pub trait VisionOcr: Send + Sync {
    /// `pdf_base64` is the standard-base64 document body.
    async fn extract_text(&self, pdf_base64: &str) -> Result<String, DiscoverError>;
}

/// A backlink reported by a paid provider or the Tor bridge list.
#[derive(Debug, Clone)]
pub struct ProviderLink {
    pub source: String,
    pub target: String,
    pub anchor_text: Option<String>,
    pub trust_flow: Option<u32>,
    pub citation_flow: Option<u32>,
}

/// Paid backlink API (historic mode, trust/citation flow scores).
#[async_trait]
pub trait BacklinkProvider: Send + Sync {
    async fn referring_domains(
        &self,
        domain: &str,
        limit: usize,
    ) -> Result<Vec<ProviderLink>, DiscoverError>;

    async fn referring_pages(
        &self,
        domain: &str,
        limit: usize,
    ) -> Result<Vec<ProviderLink>, DiscoverError>;
}

/// Dark-web pages bridging to a clearnet domain.
#[async_trait]
pub trait TorBridgeIndex: Send + Sync {
    async fn bridges_to(
        &self,
        domain: &str,
        limit: usize,
    ) -> Result<Vec<ProviderLink>, DiscoverError>;
}

/// Pre-downloaded archive index used when the live index is unreachable.
#[async_trait]
pub trait OfflineArchiveIndex: Send + Sync {
    async fn lookup_domain(
        &self,
        domain: &str,
        archive: &str,
        limit: usize,
    ) -> Result<Vec<PageRef>, DiscoverError>;
}

/// Everything a session may consume. Only the fetcher is mandatory;
/// adapters whose capability is absent skip themselves with a log line.
#[derive(Clone)]
pub struct Capabilities {
    pub fetcher: Arc<dyn Fetcher>,
    pub serp: Option<Arc<dyn SerpClient>>,
    pub mapper: Option<Arc<dyn SiteMapper>>,
    pub graph: Option<Arc<dyn GraphIndex>>,
    pub local_index: Option<Arc<dyn LocalIndex>>,
    pub pdf_text: Option<Arc<dyn PdfText>>,
    pub vision_ocr: Option<Arc<dyn VisionOcr>>,
    pub backlink_provider: Option<Arc<dyn BacklinkProvider>>,
    pub tor_bridges: Option<Arc<dyn TorBridgeIndex>>,
    pub offline_index: Option<Arc<dyn OfflineArchiveIndex>>,
}

impl Capabilities {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            serp: None,
            mapper: None,
            graph: None,
            local_index: None,
            pdf_text: None,
            vision_ocr: None,
            backlink_provider: None,
            tor_bridges: None,
            offline_index: None,
        }
    }

    pub fn with_serp(mut self, serp: Arc<dyn SerpClient>) -> Self {
        self.serp = Some(serp);
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn SiteMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn with_graph(mut self, graph: Arc<dyn GraphIndex>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_local_index(mut self, index: Arc<dyn LocalIndex>) -> Self {
        self.local_index = Some(index);
        self
    }

    pub fn with_pdf_text(mut self, pdf_text: Arc<dyn PdfText>) -> Self {
        self.pdf_text = Some(pdf_text);
        self
    }

    pub fn with_vision_ocr(mut self, vision_ocr: Arc<dyn VisionOcr>) -> Self {
        self.vision_ocr = Some(vision_ocr);
        self
    }

    pub fn with_backlink_provider(mut self, provider: Arc<dyn BacklinkProvider>) -> Self {
        self.backlink_provider = Some(provider);
        self
    }

    pub fn with_tor_bridges(mut self, bridges: Arc<dyn TorBridgeIndex>) -> Self {
        self.tor_bridges = Some(bridges);
        self
    }

    pub fn with_offline_index(mut self, index: Arc<dyn OfflineArchiveIndex>) -> Self {
        self.offline_index = Some(index);
        self
    }
}
