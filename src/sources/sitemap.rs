//! Sitemap and robots.txt discovery sources.
//!
//! The sitemap source walks `sitemap.xml` recursively (sitemap indexes,
//! gzipped files, hreflang alternates); the robots source turns
//! `Disallow:`/`Allow:` paths into probe URLs.

use std::collections::HashSet;
use std::io::Read;

use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use regex::Regex;
use tracing::{debug, warn};

use super::{RecordSink, SourceAdapter, SourceContext};
use crate::fetch::rate_limited_get;
use crate::models::UrlRecord;

/// Standard sitemap locations probed in addition to robots.txt directives.
const SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/sitemaps/sitemap.xml",
];

/// Recursion cap across sitemap-index levels.
const MAX_DEPTH: usize = 5;

/// Hard cap on sitemap files fetched in one run.
const MAX_SITEMAPS: usize = 100;

/// Unescape the XML entities that appear in `<loc>` values.
fn unescape_xml(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

/// Text of the first `<tag>…</tag>` inside `block`, tolerating attributes
/// on the opening tag. Sitemap namespaces defeat selector engines, so this
/// stays at the string level.
fn tag_text(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let start = block.find(&open)?;
    let after_open = start + block[start..].find('>')? + 1;
    let end = after_open + block[after_open..].find(&close)?;
    let text = block[after_open..end].trim();
    if text.is_empty() {
        None
    } else {
        Some(unescape_xml(text))
    }
}

/// Split an XML document into the bodies of repeated `<tag>…</tag>` blocks.
fn tag_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        // Skip matches that are longer tag names (e.g. <urlset for <url).
        let after = &rest[start + open.len()..];
        match after.chars().next() {
            Some('>') | Some(' ') | Some('\t') | Some('\n') | Some('\r') | Some('/') => {}
            _ => {
                rest = &rest[start + open.len()..];
                continue;
            }
        }
        let Some(end) = rest[start..].find(&close) else {
            break;
        };
        blocks.push(&rest[start..start + end]);
        rest = &rest[start + end + close.len()..];
    }
    blocks
}

/// Discovery source that walks sitemaps.
pub struct SitemapSource {
    alternate_href: Regex,
}

impl SitemapSource {
    pub fn new() -> Self {
        Self {
            alternate_href: Regex::new(
                r#"<(?:xhtml:)?link[^>]*rel=["']alternate["'][^>]*href=["']([^"']+)["']"#,
            )
            .expect("Failed to compile alternate-link regex"),
        }
    }

    /// Extract `Sitemap:` directives from a robots.txt body.
    pub fn sitemaps_from_robots(body: &str) -> Vec<String> {
        body.lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.to_lowercase().starts_with("sitemap:") {
                    let value = line[8..].trim();
                    if value.is_empty() {
                        None
                    } else {
                        Some(value.to_string())
                    }
                } else {
                    None
                }
            })
            .collect()
    }

    fn is_index(xml: &str) -> bool {
        xml.contains("<sitemapindex")
    }

    /// `<sitemap><loc>` children of a sitemap index.
    fn child_sitemaps(xml: &str) -> Vec<String> {
        tag_blocks(xml, "sitemap")
            .into_iter()
            .filter_map(|block| tag_text(block, "loc"))
            .collect()
    }

    /// `<url>` entries of a regular sitemap, with their metadata.
    fn entries(xml: &str) -> Vec<(String, Option<f32>, Option<String>, Option<String>)> {
        tag_blocks(xml, "url")
            .into_iter()
            .filter_map(|block| {
                let loc = tag_text(block, "loc")?;
                let priority = tag_text(block, "priority").and_then(|p| p.parse::<f32>().ok());
                let lastmod = tag_text(block, "lastmod");
                let changefreq = tag_text(block, "changefreq");
                Some((loc, priority, lastmod, changefreq))
            })
            .collect()
    }

    /// hreflang alternate URLs declared alongside `<url>` entries.
    fn alternate_urls(&self, xml: &str) -> Vec<String> {
        self.alternate_href
            .captures_iter(xml)
            .map(|caps| unescape_xml(&caps[1]))
            .collect()
    }

    async fn fetch_body(&self, ctx: &SourceContext, url: &str) -> Option<String> {
        let fetcher = ctx.caps.fetcher.clone();
        let limiter = ctx.limiter.clone();
        let response = ctx
            .retry
            .run(&ctx.cancel, || {
                rate_limited_get(fetcher.as_ref(), &limiter, "sitemap", url, &[])
            })
            .await;

        let response = match response {
            Ok(r) if r.is_success() => r,
            Ok(r) => {
                debug!("[sitemap] HTTP {}: {}", r.status, url);
                return None;
            }
            Err(e) => {
                debug!("[sitemap] Error fetching {}: {}", url, e);
                return None;
            }
        };

        // Inflate gzipped sitemaps; transport compression is already
        // handled, this covers literal .gz payloads.
        let body = &response.body;
        if url.ends_with(".gz") || body.starts_with(&[0x1f, 0x8b]) {
            let mut decoder = MultiGzDecoder::new(body.as_slice());
            let mut inflated = String::new();
            match decoder.read_to_string(&mut inflated) {
                Ok(_) => Some(inflated),
                Err(e) => {
                    warn!("[sitemap] Failed to inflate {}: {}", url, e);
                    None
                }
            }
        } else {
            Some(response.text())
        }
    }
}

impl Default for SitemapSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for SitemapSource {
    fn id(&self) -> &str {
        "sitemap"
    }

    fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(60)
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let base = format!("https://{target}");
        let mut pending: Vec<(String, usize)> = Vec::new();
        let mut processed: HashSet<String> = HashSet::new();
        let mut emitted: HashSet<String> = HashSet::new();

        // Seed from robots.txt Sitemap directives first.
        if let Some(robots) = self.fetch_body(ctx, &format!("{base}/robots.txt")).await {
            for sitemap_url in Self::sitemaps_from_robots(&robots) {
                pending.push((sitemap_url, 0));
            }
        }
        for path in SITEMAP_PATHS {
            pending.push((format!("{base}{path}"), 0));
        }

        let mut count = 0;
        while let Some((sitemap_url, depth)) = pending.pop() {
            if ctx.cancel.is_cancelled() {
                return;
            }
            if depth > MAX_DEPTH {
                warn!("[sitemap] Max depth reached: {}", sitemap_url);
                continue;
            }
            if !processed.insert(sitemap_url.clone()) || processed.len() > MAX_SITEMAPS {
                continue;
            }

            debug!("[sitemap] Parsing: {}", sitemap_url);
            let Some(xml) = self.fetch_body(ctx, &sitemap_url).await else {
                continue;
            };

            if Self::is_index(&xml) {
                for child in Self::child_sitemaps(&xml) {
                    if !processed.contains(&child) {
                        pending.push((child, depth + 1));
                    }
                }
                continue;
            }

            for (loc, priority, lastmod, changefreq) in Self::entries(&xml) {
                if !emitted.insert(loc.clone()) || !ctx.admits(&loc, target) {
                    continue;
                }
                count += 1;
                let record = UrlRecord::new(loc, target, "sitemap")
                    .with_sitemap_fields(priority, lastmod, changefreq);
                if !sink.send(record).await {
                    return;
                }
            }

            for href in self.alternate_urls(&xml) {
                if !emitted.insert(href.clone()) || !ctx.admits(&href, target) {
                    continue;
                }
                count += 1;
                if !sink.send(UrlRecord::new(href, target, "sitemap")).await {
                    return;
                }
            }
        }

        ctx.log.log("sitemap", "Sitemap discovery complete", count);
    }
}

/// Discovery source that mines robots.txt path rules.
pub struct RobotsSource;

impl RobotsSource {
    pub fn new() -> Self {
        Self
    }

    /// Paths from `Disallow:`/`Allow:` rules, with glob characters
    /// stripped. Bare `/` is skipped.
    pub fn paths(body: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        for line in body.lines() {
            let line = line.trim();
            let lower = line.to_lowercase();
            let value = if lower.starts_with("disallow:") {
                line[9..].trim()
            } else if lower.starts_with("allow:") {
                line[6..].trim()
            } else {
                continue;
            };

            let path = value.replace(['*', '$'], "");
            if path.is_empty() || path == "/" || !path.starts_with('/') {
                continue;
            }
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
        paths
    }
}

impl Default for RobotsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for RobotsSource {
    fn id(&self) -> &str {
        "robots"
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let robots_url = format!("https://{target}/robots.txt");
        debug!("[robots] Checking {}", robots_url);

        let fetcher = ctx.caps.fetcher.clone();
        let limiter = ctx.limiter.clone();
        let response = ctx
            .retry
            .run(&ctx.cancel, || {
                rate_limited_get(fetcher.as_ref(), &limiter, "robots", &robots_url, &[])
            })
            .await;

        let body = match response {
            Ok(r) if r.is_success() => r.text(),
            Ok(r) => {
                debug!("[robots] HTTP {}", r.status);
                return;
            }
            Err(e) => {
                ctx.errors.record("robots", e.to_string());
                return;
            }
        };

        let paths = Self::paths(&body);
        let count = paths.len();
        for path in paths {
            if ctx.cancel.is_cancelled() {
                return;
            }
            let url = format!("https://{target}{path}");
            if !sink.send(UrlRecord::new(url, target, "robots")).await {
                return;
            }
        }
        ctx.log.log("robots", "Found paths", count);
    }
}
