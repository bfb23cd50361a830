//! Discovery source implementations.
//!
//! Each source wraps one external service behind the uniform
//! [`SourceAdapter`] contract: stream records into the sink, own your rate
//! limit and retries, honor cancellation, and never raise upward.

pub mod archives;
pub mod engines;
pub mod graph;
pub mod local;
pub mod mapper_api;
pub mod sitemap;
pub mod subdomains;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::capabilities::Capabilities;
use crate::config::DiscoverOptions;
use crate::logstream::LogStream;
use crate::models::UrlRecord;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

/// Shared sink the fan-out hands to every adapter. Dropping the last
/// sender closes the stream; that is the completion sentinel.
#[derive(Clone)]
pub struct RecordSink {
    tx: mpsc::Sender<UrlRecord>,
}

impl RecordSink {
    pub fn new(tx: mpsc::Sender<UrlRecord>) -> Self {
        Self { tx }
    }

    /// Send a record downstream. Returns false once the consumer is gone,
    /// which adapters treat as a stop signal.
    pub async fn send(&self, record: UrlRecord) -> bool {
        self.tx.send(record).await.is_ok()
    }
}

/// Per-run error record, kept for the completion summary.
#[derive(Default)]
pub struct ErrorSink {
    inner: std::sync::Mutex<Vec<(String, String)>>,
}

impl ErrorSink {
    pub fn record(&self, source: &str, message: impl Into<String>) {
        self.inner
            .lock()
            .expect("error sink lock poisoned")
            .push((source.to_string(), message.into()));
    }

    pub fn count_for(&self, source: &str) -> usize {
        self.inner
            .lock()
            .expect("error sink lock poisoned")
            .iter()
            .filter(|(s, _)| s == source)
            .count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("error sink lock poisoned")
            .iter()
            .map(|(source, message)| format!("[{source}] {message}"))
            .collect()
    }
}

/// Everything an adapter needs for one run, shared across workers.
pub struct SourceContext {
    pub caps: Capabilities,
    pub config: crate::config::SessionConfig,
    pub limiter: RateLimiter,
    pub retry: RetryPolicy,
    pub log: Arc<LogStream>,
    pub errors: Arc<ErrorSink>,
    pub cancel: CancellationToken,
    pub options: DiscoverOptions,
}

impl SourceContext {
    /// Domain-belonging check applied before yielding, unless the run
    /// allows external links.
    pub fn admits(&self, url: &str, domain: &str) -> bool {
        self.options.allow_external || belongs_to(url, domain)
    }
}

/// `host == domain || host.ends_with(".domain")`, case-insensitive.
pub fn belongs_to(url: &str, domain: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    let domain = domain.to_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Strip scheme and `www.` from a caller-provided target.
pub fn normalize_target(target: &str) -> String {
    let mut domain = target.trim().to_lowercase();
    if domain.starts_with("http://") || domain.starts_with("https://") {
        if let Ok(parsed) = Url::parse(&domain) {
            if let Some(host) = parsed.host_str() {
                domain = host.to_string();
            }
        }
    }
    domain.trim_end_matches('/').trim_start_matches("www.").to_string()
}

/// Which mapping mode a source participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTier {
    /// Quick sources, always run.
    Fast,
    /// Slow sources, only in deep mode.
    Deep,
}

/// Uniform contract for a single discovery source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier, also the rate-limit bucket key.
    fn id(&self) -> &str;

    fn tier(&self) -> SourceTier {
        SourceTier::Fast
    }

    /// Worker-pool width for this source.
    fn concurrency(&self) -> usize {
        4
    }

    /// Per-task deadline, tuned to the source's latency profile.
    fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }

    /// Produce records for `target` into `sink`. Failures are logged and
    /// counted, never returned.
    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink);
}

/// Registry of all built-in sources for domain mapping.
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    /// Create a registry with every built-in source.
    pub fn new() -> Self {
        let mut sources: HashMap<String, Arc<dyn SourceAdapter>> = HashMap::new();

        let builtin: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(subdomains::CtLogSource::new()),
            Arc::new(subdomains::WhoisSubdomainSource::new()),
            Arc::new(subdomains::SubEnumSource::new()),
            Arc::new(subdomains::DnsReconSource::new()),
            Arc::new(sitemap::SitemapSource::new()),
            Arc::new(sitemap::RobotsSource::new()),
            Arc::new(mapper_api::FastMapSource::new()),
            Arc::new(mapper_api::DeepCrawlSource::new()),
            Arc::new(engines::EngineSource::new("google")),
            Arc::new(engines::EngineSource::new("bing")),
            Arc::new(engines::EngineSource::new("duckduckgo")),
            Arc::new(engines::EngineSource::new("yandex")),
            Arc::new(archives::WaybackSource::new()),
            Arc::new(archives::CommonCrawlSource::new()),
            Arc::new(archives::MementoSource::new()),
            Arc::new(graph::HostGraphSource::new()),
            Arc::new(graph::LinkBinarySource::new()),
            Arc::new(graph::MajesticSource::new()),
            Arc::new(local::CrawledPagesSource::new()),
            Arc::new(local::DiscoveredUrlsSource::new()),
        ];

        for source in builtin {
            sources.insert(source.id().to_string(), source);
        }

        Self { sources }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.sources.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Register a custom source.
    pub fn register(&mut self, source: Arc<dyn SourceAdapter>) {
        self.sources.insert(source.id().to_string(), source);
    }

    /// Sources selected for a run: the caller's subset when given,
    /// otherwise everything admitted by the mode.
    pub fn select(
        &self,
        requested: Option<&[String]>,
        deep: bool,
    ) -> Vec<Arc<dyn SourceAdapter>> {
        let mut selected: Vec<Arc<dyn SourceAdapter>> = match requested {
            Some(names) => names
                .iter()
                .filter_map(|name| self.sources.get(name).cloned())
                .collect(),
            None => self
                .sources
                .values()
                .filter(|s| deep || s.tier() == SourceTier::Fast)
                .cloned()
                .collect(),
        };
        selected.sort_by(|a, b| a.id().cmp(b.id()));
        selected
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
