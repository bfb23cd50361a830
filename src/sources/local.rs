//! Local-index sources: previously crawled pages and previously
//! discovered URLs, filtered by domain or URL wildcard.

use async_trait::async_trait;
use tracing::debug;

use super::{RecordSink, SourceAdapter, SourceContext};
use crate::models::UrlRecord;

/// Pages already scraped into the local index.
pub struct CrawledPagesSource;

impl CrawledPagesSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CrawledPagesSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for CrawledPagesSource {
    fn id(&self) -> &str {
        "local.pages"
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let Some(index) = &ctx.caps.local_index else {
            debug!("[local.pages] Skipping - no local index capability");
            return;
        };

        let pages = match index.crawled_pages(target, 10_000).await {
            Ok(pages) => pages,
            Err(e) => {
                ctx.errors.record("local.pages", e.to_string());
                return;
            }
        };

        let mut count = 0;
        for page in pages {
            if ctx.cancel.is_cancelled() {
                return;
            }
            if !ctx.admits(&page.url, target) {
                continue;
            }
            count += 1;
            let record = UrlRecord::new(page.url, target, "local.pages")
                .with_metadata(page.title, None)
                .with_status(page.status_code, None);
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log("local.pages", "Found indexed pages", count);
    }
}

/// URLs previously discovered and written to the local index.
pub struct DiscoveredUrlsSource;

impl DiscoveredUrlsSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DiscoveredUrlsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for DiscoveredUrlsSource {
    fn id(&self) -> &str {
        "local.urls"
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let Some(index) = &ctx.caps.local_index else {
            debug!("[local.urls] Skipping - no local index capability");
            return;
        };

        // Wildcard over the whole domain, subdomains included.
        let pattern = format!("*.{target}/*");
        let pages = match index.discovered_urls(&pattern, 10_000).await {
            Ok(pages) => pages,
            Err(e) => {
                ctx.errors.record("local.urls", e.to_string());
                return;
            }
        };

        let mut count = 0;
        for page in pages {
            if ctx.cancel.is_cancelled() {
                return;
            }
            if !ctx.admits(&page.url, target) {
                continue;
            }
            count += 1;
            let record = UrlRecord::new(page.url, target, "local.urls")
                .with_metadata(page.title, None);
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log("local.urls", "Found indexed URLs", count);
    }
}
