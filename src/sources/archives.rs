//! Archive-backed discovery sources: Wayback CDX, Common Crawl Index, and
//! the Memento TimeMap aggregator.
//!
//! Records from these sources always carry `is_archived` and an
//! `archive_source`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{RecordSink, SourceAdapter, SourceContext, SourceTier};
use crate::error::DiscoverError;
use crate::fetch::{rate_limited_get, Fetcher};
use crate::models::{PageRef, UrlRecord};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use tokio_util::sync::CancellationToken;

const CDX_API_URL: &str = "https://web.archive.org/cdx/search/cdx";
const TIMEMAP_URL: &str = "https://timetravel.mementoweb.org/timemap/link";

/// One NDJSON line of an archive-index response.
#[derive(Debug, Deserialize)]
struct IndexLine {
    #[serde(default)]
    url: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    offset: Option<serde_json::Value>,
    #[serde(default)]
    length: Option<serde_json::Value>,
    #[serde(default)]
    mime: Option<String>,
    #[serde(default)]
    status: Option<serde_json::Value>,
    #[serde(default)]
    timestamp: Option<String>,
}

fn value_as_u64(value: &Option<serde_json::Value>) -> Option<u64> {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_u16(value: &Option<serde_json::Value>) -> Option<u16> {
    value_as_u64(value).and_then(|v| u16::try_from(v).ok())
}

/// Query an archive index for a URL pattern, returning byte-addressable
/// page records. `filters` are index-side field filters (e.g.
/// `mime:application/pdf`, `status:200`). Malformed NDJSON lines are
/// skipped. Shared by the mapping source, the backlink pipeline, and the
/// filetype cascade.
#[allow(clippy::too_many_arguments)]
pub async fn query_index(
    fetcher: &dyn Fetcher,
    limiter: &RateLimiter,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    index_base: &str,
    archive: &str,
    url_pattern: &str,
    filters: &[String],
    limit: usize,
) -> Result<Vec<PageRef>, DiscoverError> {
    let mut query_url = format!(
        "{index_base}/{archive}-index?url={}&output=json&limit={limit}",
        urlencoding::encode(url_pattern)
    );
    for filter in filters {
        query_url.push_str(&format!("&filter={}", urlencoding::encode(filter)));
    }

    let response = retry
        .run(cancel, || {
            rate_limited_get(fetcher, limiter, "cc.index", &query_url, &[])
        })
        .await?;

    if !response.is_success() {
        // The index answers 404 for patterns with no captures.
        if response.status == 404 {
            return Ok(Vec::new());
        }
        return Err(
            DiscoverError::from_status(response.status, "archive index")
                .unwrap_or_else(|| DiscoverError::Network("archive index".to_string())),
        );
    }

    let text = response.text();
    let mut records = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(parsed) = serde_json::from_str::<IndexLine>(line) else {
            continue;
        };
        let (Some(offset), Some(length)) =
            (value_as_u64(&parsed.offset), value_as_u64(&parsed.length))
        else {
            continue;
        };
        if parsed.url.is_empty() || parsed.filename.is_empty() {
            continue;
        }
        records.push(PageRef {
            url: parsed.url,
            archive: archive.to_string(),
            filename: parsed.filename,
            offset,
            length,
            mime: parsed.mime,
            status: value_as_u16(&parsed.status),
            timestamp: parsed.timestamp,
        });
    }
    Ok(records)
}

/// MIME types worth surfacing from archive sweeps.
fn is_document_mimetype(mimetype: &str) -> bool {
    matches!(
        mimetype,
        "application/pdf"
            | "application/msword"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "application/vnd.ms-excel"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "text/html"
            | "application/xhtml+xml"
    )
}

/// Wayback Machine CDX source.
pub struct WaybackSource;

impl WaybackSource {
    pub fn new() -> Self {
        Self
    }

    /// Build the CDX query URL with filters.
    fn build_cdx_url(
        domain: &str,
        from: Option<&str>,
        to: Option<&str>,
        limit: usize,
    ) -> String {
        let mut url = format!(
            "{CDX_API_URL}?url=*.{domain}&matchType=domain&output=json&fl=original,mimetype,statuscode,timestamp&collapse=urlkey&filter=statuscode:200"
        );
        if let Some(from) = from {
            url.push_str(&format!("&from={from}"));
        }
        if let Some(to) = to {
            url.push_str(&format!("&to={to}"));
        }
        if limit > 0 {
            url.push_str(&format!("&limit={limit}"));
        }
        url
    }
}

impl Default for WaybackSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for WaybackSource {
    fn id(&self) -> &str {
        "wayback"
    }

    fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(120)
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let limit = if ctx.options.limit > 0 {
            ctx.options.limit
        } else {
            10_000
        };
        let cdx_url = Self::build_cdx_url(
            target,
            ctx.options.from.as_deref(),
            ctx.options.to.as_deref(),
            limit,
        );
        debug!("[wayback] Querying CDX API: {}", cdx_url);

        let fetcher = ctx.caps.fetcher.clone();
        let limiter = ctx.limiter.clone();
        let response = ctx
            .retry
            .run(&ctx.cancel, || {
                rate_limited_get(fetcher.as_ref(), &limiter, "wayback", &cdx_url, &[])
            })
            .await;

        let response = match response {
            Ok(r) if r.is_success() => r,
            Ok(r) => {
                ctx.errors.record("wayback", format!("CDX API returned {}", r.status));
                return;
            }
            Err(e) => {
                ctx.errors.record("wayback", e.to_string());
                return;
            }
        };

        // CDX JSON output is an array of arrays with a header row.
        let rows: Vec<Vec<String>> = match response.json() {
            Ok(rows) => rows,
            Err(e) => {
                ctx.errors.record("wayback", e.to_string());
                return;
            }
        };
        let data_rows = if rows
            .first()
            .and_then(|r| r.first())
            .map(|s| s.as_str())
            == Some("original")
        {
            &rows[1..]
        } else {
            &rows[..]
        };

        let mut count = 0;
        for row in data_rows {
            if ctx.cancel.is_cancelled() {
                return;
            }
            let Some(original) = row.first() else {
                continue;
            };
            let mimetype = row.get(1).map(|s| s.as_str()).unwrap_or("");
            if !mimetype.is_empty() && !is_document_mimetype(mimetype) {
                continue;
            }
            if !ctx.admits(original, target) {
                continue;
            }
            let status = row.get(2).and_then(|s| s.parse::<u16>().ok());
            let timestamp = row.get(3).cloned();
            let archive_url = timestamp
                .as_ref()
                .map(|ts| format!("https://web.archive.org/web/{ts}/{original}"));

            count += 1;
            let record = UrlRecord::new(original.clone(), target, "wayback")
                .with_status(status, Some(mimetype.to_string()).filter(|m| !m.is_empty()))
                .with_archive("wayback", archive_url);
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log("wayback", "Found archived URLs", count);
    }
}

/// Common Crawl Index source for domain mapping.
pub struct CommonCrawlSource;

impl CommonCrawlSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CommonCrawlSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for CommonCrawlSource {
    fn id(&self) -> &str {
        "cc.index"
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Deep
    }

    fn concurrency(&self) -> usize {
        10
    }

    fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(120)
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let Some(archive) = ctx.config.archives.first() else {
            debug!("[cc.index] Skipping - no archives configured");
            return;
        };

        let pages = match query_index(
            ctx.caps.fetcher.as_ref(),
            &ctx.limiter,
            &ctx.retry,
            &ctx.cancel,
            &ctx.config.archive_index_base,
            archive,
            &format!("{target}/*"),
            &[],
            5000,
        )
        .await
        {
            Ok(pages) => pages,
            Err(e) => {
                ctx.errors.record("cc.index", e.to_string());
                ctx.log.log("cc.index", format!("Failed: {e}"), 0);
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
            let record = UrlRecord::new(page.url.clone(), target, "cc.index")
                .with_status(page.status, page.mime.clone())
                .with_archive("commoncrawl", None);
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log("cc.index", "Found archived URLs", count);
    }
}

/// Memento TimeMap aggregator source.
pub struct MementoSource;

impl MementoSource {
    pub fn new() -> Self {
        Self
    }

    /// Parse a link-format TimeMap into (snapshot_uri, datetime) pairs and
    /// the original URL. Entries are scanned as `<uri>; params` segments
    /// because datetime values contain commas.
    fn parse_timemap(body: &str) -> (Option<String>, Vec<(String, Option<String>)>) {
        let mut original = None;
        let mut mementos = Vec::new();

        let mut rest = body;
        while let Some(start) = rest.find('<') {
            let Some(uri_end) = rest[start..].find('>') else {
                break;
            };
            let uri = rest[start + 1..start + uri_end].to_string();
            let after = &rest[start + uri_end + 1..];
            let params_end = after.find('<').unwrap_or(after.len());
            let params = &after[..params_end];

            if params.contains("rel=\"original\"") {
                original = Some(uri);
            } else if params.contains("memento") && params.contains("rel=") {
                let datetime = params
                    .split("datetime=\"")
                    .nth(1)
                    .and_then(|value| value.split('"').next())
                    .map(|s| s.to_string());
                mementos.push((uri, datetime));
            }

            rest = &after[params_end..];
        }
        (original, mementos)
    }
}

impl Default for MementoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for MementoSource {
    fn id(&self) -> &str {
        "memento"
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Deep
    }

    fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(180)
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let timemap_url = format!("{TIMEMAP_URL}/https://{target}/");
        debug!("[memento] Fetching TimeMap: {}", timemap_url);

        let fetcher = ctx.caps.fetcher.clone();
        let limiter = ctx.limiter.clone();
        let response = ctx
            .retry
            .run(&ctx.cancel, || {
                rate_limited_get(fetcher.as_ref(), &limiter, "memento", &timemap_url, &[])
            })
            .await;

        let body = match response {
            Ok(r) if r.is_success() => r.text(),
            Ok(r) => {
                ctx.errors.record("memento", format!("HTTP {}", r.status));
                return;
            }
            Err(e) => {
                ctx.errors.record("memento", e.to_string());
                return;
            }
        };

        let (original, mementos) = Self::parse_timemap(&body);
        let original = original.unwrap_or_else(|| format!("https://{target}/"));

        let cap = 1000;
        let mut count = 0;
        for (snapshot_uri, datetime) in mementos.into_iter().take(cap) {
            if ctx.cancel.is_cancelled() {
                return;
            }
            let archive_host = Url::parse(&snapshot_uri)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_string()))
                .unwrap_or_else(|| "memento".to_string());

            count += 1;
            let mut record = UrlRecord::new(original.clone(), target, "memento")
                .with_archive(archive_host, Some(snapshot_uri));
            record.lastmod = datetime;
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log("memento", "Found archived snapshots", count);
    }
}
