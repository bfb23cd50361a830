//! Site-mapper service sources.
//!
//! `mapper.map` is a single fast call returning up to 100k URLs;
//! `mapper.crawl` starts a recursive crawl job and polls it, mining page
//! links and every asset reference out of the returned HTML.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use url::Url;

use super::{RecordSink, SourceAdapter, SourceContext, SourceTier};
use crate::capabilities::CrawlState;
use crate::models::UrlRecord;

const MAP_LIMIT: usize = 100_000;
const CRAWL_LIMIT: usize = 50_000;
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLLS: usize = 120;

/// Regexes that pull every asset URL out of raw HTML: images, srcset
/// variants, stylesheets, scripts, media, embeds, iframes, CSS url()
/// values, and lazy-load data attributes.
fn asset_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r#"(?i)<img[^>]+src=["']([^"']+)["']"#,
            r#"(?i)<img[^>]+srcset=["']([^"']+)["']"#,
            r#"(?i)<link[^>]+href=["']([^"']+)["']"#,
            r#"(?i)<script[^>]+src=["']([^"']+)["']"#,
            r#"(?i)<source[^>]+src=["']([^"']+)["']"#,
            r#"(?i)<video[^>]+src=["']([^"']+)["']"#,
            r#"(?i)<audio[^>]+src=["']([^"']+)["']"#,
            r#"(?i)<embed[^>]+src=["']([^"']+)["']"#,
            r#"(?i)<object[^>]+data=["']([^"']+)["']"#,
            r#"(?i)<iframe[^>]+src=["']([^"']+)["']"#,
            r#"(?i)url\(["']?([^"')\s]+)["']?\)"#,
            r#"(?i)data-src=["']([^"']+)["']"#,
            r#"(?i)data-background=["']([^"']+)["']"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("Failed to compile asset regex"))
        .collect()
    })
}

/// Extract all asset URLs from HTML, resolved against `base_url`.
pub fn extract_assets(html: &str, base_url: &str) -> Vec<String> {
    let mut raw: HashSet<String> = HashSet::new();
    for (index, pattern) in asset_patterns().iter().enumerate() {
        for caps in pattern.captures_iter(html) {
            let value = caps[1].to_string();
            // srcset is comma-separated "url descriptor" pairs.
            if index == 1 && value.contains(',') {
                for part in value.split(',') {
                    if let Some(url) = part.trim().split_whitespace().next() {
                        raw.insert(url.to_string());
                    }
                }
            } else {
                raw.insert(value);
            }
        }
    }

    let base = Url::parse(base_url).ok();
    let mut resolved = HashSet::new();
    for candidate in raw {
        if candidate.starts_with("data:")
            || candidate.starts_with("javascript:")
            || candidate.starts_with("mailto:")
            || candidate.starts_with('#')
        {
            continue;
        }
        if candidate.starts_with("http://") || candidate.starts_with("https://") {
            resolved.insert(candidate);
        } else if let Some(base) = &base {
            if let Ok(joined) = base.join(&candidate) {
                let joined = joined.to_string();
                if joined.starts_with("http://") || joined.starts_with("https://") {
                    resolved.insert(joined);
                }
            }
        }
    }

    let mut out: Vec<String> = resolved.into_iter().collect();
    out.sort();
    out
}

/// Fast site-map endpoint: one call, up to 100k URLs.
pub struct FastMapSource;

impl FastMapSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FastMapSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for FastMapSource {
    fn id(&self) -> &str {
        "mapper.map"
    }

    fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(300)
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let Some(mapper) = &ctx.caps.mapper else {
            debug!("[mapper.map] Skipping - no site-mapper capability");
            return;
        };

        ctx.limiter.acquire("mapper.map").await;
        let links = match mapper.map(target, true, MAP_LIMIT).await {
            Ok(links) => links,
            Err(e) => {
                ctx.errors.record("mapper.map", e.to_string());
                ctx.log.log("mapper.map", format!("Failed: {e}"), 0);
                return;
            }
        };

        let mut count = 0;
        for link in links {
            if ctx.cancel.is_cancelled() {
                return;
            }
            if !ctx.admits(&link.url, target) {
                continue;
            }
            count += 1;
            let record = UrlRecord::new(link.url, target, "mapper.map")
                .with_metadata(link.title, link.description);
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log("mapper.map", "Mapped URLs", count);
    }
}

/// Deep recursive crawl job, polled until completion.
pub struct DeepCrawlSource;

impl DeepCrawlSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DeepCrawlSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for DeepCrawlSource {
    fn id(&self) -> &str {
        "mapper.crawl"
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Deep
    }

    fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(600)
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let Some(mapper) = &ctx.caps.mapper else {
            debug!("[mapper.crawl] Skipping - no site-mapper capability");
            return;
        };

        ctx.limiter.acquire("mapper.crawl").await;
        let job_id = match mapper
            .start_crawl(target, CRAWL_LIMIT, ctx.options.allow_external)
            .await
        {
            Ok(job_id) => job_id,
            Err(e) => {
                ctx.errors.record("mapper.crawl", e.to_string());
                ctx.log.log("mapper.crawl", format!("Failed to start job: {e}"), 0);
                return;
            }
        };
        debug!("[mapper.crawl] Job started: {}", job_id);

        let mut seen: HashSet<String> = HashSet::new();
        let mut count = 0;

        for _ in 0..MAX_POLLS {
            if ctx.cancel.is_cancelled() {
                return;
            }

            let status = match mapper.crawl_status(&job_id).await {
                Ok(status) => status,
                Err(e) => {
                    ctx.errors.record("mapper.crawl", e.to_string());
                    break;
                }
            };

            for page in &status.pages {
                let Some(page_url) = &page.url else {
                    continue;
                };

                if ctx.admits(page_url, target) && seen.insert(page_url.clone()) {
                    count += 1;
                    let record = UrlRecord::new(page_url.clone(), target, "mapper.crawl")
                        .with_metadata(page.title.clone(), None);
                    if !sink.send(record).await {
                        return;
                    }
                }

                for link in &page.links {
                    let absolute = if link.starts_with("http://") || link.starts_with("https://")
                    {
                        link.clone()
                    } else {
                        match Url::parse(page_url).and_then(|base| base.join(link)) {
                            Ok(joined) => joined.to_string(),
                            Err(_) => continue,
                        }
                    };
                    if !ctx.admits(&absolute, target) || !seen.insert(absolute.clone()) {
                        continue;
                    }
                    count += 1;
                    let record = UrlRecord::new(absolute, target, "mapper.crawl")
                        .with_parent(page_url.clone());
                    if !sink.send(record).await {
                        return;
                    }
                }

                if let Some(html) = &page.html {
                    for asset in extract_assets(html, page_url) {
                        if !ctx.admits(&asset, target) || !seen.insert(asset.clone()) {
                            continue;
                        }
                        count += 1;
                        let record = UrlRecord::new(asset, target, "mapper.crawl")
                            .with_parent(page_url.clone());
                        if !sink.send(record).await {
                            return;
                        }
                    }
                }
            }

            match status.state {
                CrawlState::Completed => {
                    debug!("[mapper.crawl] Complete: {} URLs", seen.len());
                    break;
                }
                CrawlState::Failed => {
                    let message = status.error.unwrap_or_else(|| "crawl failed".to_string());
                    ctx.errors.record("mapper.crawl", message);
                    break;
                }
                CrawlState::Running => {
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => return,
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    }
                }
            }
        }

        ctx.log.log("mapper.crawl", "Deep crawl complete", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_extraction_covers_tags() {
        let html = r#"
            <img src="/images/logo.png">
            <img srcset="/images/a-1x.png 1x, /images/a-2x.png 2x">
            <link href="/css/site.css" rel="stylesheet">
            <script src="https://cdn.example.org/app.js"></script>
            <iframe src="/embed/map"></iframe>
            <div style="background: url('/images/bg.jpg')"></div>
            <img data-src="/images/lazy.png">
            <a href="javascript:void(0)">x</a>
            <img src="data:image/png;base64,xyz">
        "#;
        let assets = extract_assets(html, "https://example.org/page");

        assert!(assets.contains(&"https://example.org/images/logo.png".to_string()));
        assert!(assets.contains(&"https://example.org/images/a-1x.png".to_string()));
        assert!(assets.contains(&"https://example.org/images/a-2x.png".to_string()));
        assert!(assets.contains(&"https://example.org/css/site.css".to_string()));
        assert!(assets.contains(&"https://cdn.example.org/app.js".to_string()));
        assert!(assets.contains(&"https://example.org/embed/map".to_string()));
        assert!(assets.contains(&"https://example.org/images/bg.jpg".to_string()));
        assert!(assets.contains(&"https://example.org/images/lazy.png".to_string()));
        // data: and javascript: URLs never survive.
        assert!(!assets.iter().any(|a| a.starts_with("data:")));
        assert!(!assets.iter().any(|a| a.contains("javascript")));
    }

    #[test]
    fn relative_assets_resolve_against_page() {
        let assets = extract_assets(
            r#"<img src="../up.png">"#,
            "https://example.org/dir/page.html",
        );
        assert_eq!(assets, vec!["https://example.org/up.png"]);
    }
}
