//! Filetype discovery and the PDF keyword cascade.
//!
//! Seven discovery sources run in parallel with individual timeouts; the
//! sweep never stops early because total recall dominates. When a keyword
//! is given, found PDFs go through a four-tier text extraction and the
//! keyword is counted inside the document body.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures::stream::{FuturesUnordered, StreamExt};
use regex::RegexBuilder;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::capabilities::CrawlState;
use crate::config::FiletypeOptions;
use crate::dedup::canonical_url;
use crate::error::DiscoverError;
use crate::models::{ContentMatch, ExtractionMethod, FiletypeResponse, UrlRecord};
use crate::sources::archives::query_index;
use crate::sources::{normalize_target, SourceContext};
use crate::warc::fetch_record;

/// Extension lists behind the filetype aliases.
const FILETYPE_ALIASES: &[(&str, &[&str])] = &[
    ("pdf", &["pdf"]),
    ("document", &["pdf", "doc", "docx", "odt", "rtf", "txt"]),
    ("word", &["doc", "docx", "odt", "rtf"]),
    ("excel", &["xls", "xlsx", "ods", "csv"]),
    ("spreadsheet", &["xls", "xlsx", "ods", "csv", "numbers", "tsv"]),
    ("powerpoint", &["ppt", "pptx", "odp", "key"]),
    ("presentation", &["ppt", "pptx", "odp", "key"]),
    ("archive", &["zip", "rar", "7z", "tar", "gz"]),
    ("image", &["jpg", "jpeg", "png", "gif", "bmp", "svg", "webp"]),
    ("audio", &["mp3", "wav", "aac", "flac", "ogg"]),
    ("video", &["mp4", "avi", "mkv", "mov", "wmv", "webm"]),
];

/// Content types recorded by the archive index, per extension.
const MIME_MAP: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("ppt", "application/vnd.ms-powerpoint"),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    ("csv", "text/csv"),
    ("txt", "text/plain"),
    ("xml", "application/xml"),
    ("json", "application/json"),
];

/// A tier must return at least this much text to win.
const MIN_EXTRACT_CHARS: usize = 50;

/// PDFs above this size skip the vision tier.
const MAX_VISION_PDF_BYTES: usize = 10 * 1024 * 1024;

/// Resolve a filetype alias or bare extension into extensions.
pub fn resolve_filetypes(filetype_query: &str) -> Vec<String> {
    let query = filetype_query.trim().trim_matches('!').to_lowercase();

    if query == "file" || query == "all" {
        let mut all: Vec<String> = FILETYPE_ALIASES
            .iter()
            .flat_map(|(_, exts)| exts.iter().map(|e| e.to_string()))
            .collect();
        all.sort();
        all.dedup();
        return all;
    }

    match FILETYPE_ALIASES.iter().find(|(name, _)| *name == query) {
        Some((_, exts)) => exts.iter().map(|e| e.to_string()).collect(),
        None => vec![query],
    }
}

fn mime_for(ext: &str) -> Option<&'static str> {
    MIME_MAP.iter().find(|(e, _)| *e == ext).map(|(_, m)| *m)
}

fn ext_for_mime(mime: &str) -> Option<&'static str> {
    MIME_MAP.iter().find(|(_, m)| *m == mime).map(|(e, _)| *e)
}

fn ext_of_url<'a>(url: &str, extensions: &'a [String]) -> Option<&'a str> {
    let lower = url.to_lowercase();
    extensions
        .iter()
        .find(|ext| {
            let marker = format!(".{ext}");
            lower.ends_with(&marker) || lower.contains(&format!("{marker}?"))
        })
        .map(|e| e.as_str())
}

/// Engine query for one extension: `site:domain filetype:ext ["kw"]`.
fn engine_query(domain: &str, ext: &str, keyword: Option<&str>) -> String {
    let mut parts = vec![format!("site:{domain}"), format!("filetype:{ext}")];
    if let Some(keyword) = keyword {
        if keyword.contains(' ') {
            parts.push(format!("\"{keyword}\""));
        } else {
            parts.push(keyword.to_string());
        }
    }
    parts.join(" ")
}

/// Count keyword occurrences on word boundaries and cut a snippet around
/// the first one.
fn keyword_matches(text: &str, keyword: &str) -> Option<(usize, String)> {
    let pattern = format!(r"\b{}\b", regex::escape(keyword));
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()?;

    let first = regex.find(text)?;
    let count = regex.find_iter(text).count();

    let mut start = first.start().saturating_sub(200);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (first.end() + 200).min(text.len());
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    let snippet = text[start..end].trim().to_string();
    Some((count, format!("...{snippet}...")))
}

struct SweepOutcome {
    source: &'static str,
    records: Vec<UrlRecord>,
    error: Option<String>,
}

async fn run_sweep<F>(
    source: &'static str,
    timeout: Duration,
    work: F,
) -> SweepOutcome
where
    F: std::future::Future<Output = Result<Vec<UrlRecord>, DiscoverError>>,
{
    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(records)) => SweepOutcome {
            source,
            records,
            error: None,
        },
        Ok(Err(e)) => SweepOutcome {
            source,
            records: Vec::new(),
            error: Some(e.to_string()),
        },
        Err(_) => SweepOutcome {
            source,
            records: Vec::new(),
            error: Some(format!("timed out after {}s", timeout.as_secs())),
        },
    }
}

/// The seven-source filetype sweep plus the keyword cascade.
pub struct FiletypeCascade<'a> {
    ctx: &'a SourceContext,
}

impl<'a> FiletypeCascade<'a> {
    pub fn new(ctx: &'a SourceContext) -> Self {
        Self { ctx }
    }

    /// Run the full discovery for `(domain, filetype query, keyword)`.
    pub async fn discover(
        &self,
        domain: &str,
        filetype_query: &str,
        keyword: Option<&str>,
        options: &FiletypeOptions,
    ) -> FiletypeResponse {
        let ctx = self.ctx;
        let domain = normalize_target(domain);
        let extensions = resolve_filetypes(filetype_query);

        if extensions.is_empty() {
            return FiletypeResponse {
                domain,
                filetypes_searched: Vec::new(),
                keyword: keyword.map(|k| k.to_string()),
                total_found: 0,
                results: Vec::new(),
                content_matches: Vec::new(),
                sources_used: Vec::new(),
                elapsed_ms: ctx.log.elapsed_ms(),
                logs: ctx.log.entries(),
            };
        }

        ctx.log.log(
            "init",
            format!(
                "Starting cascade for {:?} on {domain}{}",
                extensions,
                keyword.map(|k| format!(" with keyword '{k}'")).unwrap_or_default()
            ),
            0,
        );

        // All seven methods in parallel; one hung API never blocks the rest.
        ctx.log.log("parallel", "Starting ALL 7 discovery methods in parallel", 0);

        let limit = options.limit;
        let (s1, s2, s3, s4, s5, s6, s7) = tokio::join!(
            run_sweep(
                "cc_mime",
                Duration::from_secs(60),
                self.cc_mime_search(&domain, &extensions, limit),
            ),
            run_sweep(
                "google",
                Duration::from_secs(30),
                self.serp_search("google", &domain, &extensions, keyword, limit),
            ),
            run_sweep(
                "mapper.search",
                Duration::from_secs(45),
                self.mapper_search(&domain, &extensions, keyword, limit),
            ),
            run_sweep(
                "brave",
                Duration::from_secs(30),
                self.serp_search("brave", &domain, &extensions, keyword, limit),
            ),
            run_sweep(
                "cc.index",
                Duration::from_secs(60),
                self.cc_pattern_search(&domain, &extensions, limit),
            ),
            run_sweep(
                "site_crawl",
                Duration::from_secs(180),
                self.site_crawl(&domain, &extensions, keyword, limit),
            ),
            run_sweep(
                "archive_deep",
                Duration::from_secs(120),
                self.archive_deep(&domain, &extensions, keyword, limit),
            ),
        );

        let mut results: Vec<UrlRecord> = Vec::new();
        let mut sources_used: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for outcome in [s1, s2, s3, s4, s5, s6, s7] {
            if let Some(error) = outcome.error {
                if error.starts_with("timed out") {
                    ctx.log.log(
                        outcome.source,
                        "Timed out (results may still come from other sources)",
                        0,
                    );
                } else {
                    ctx.log.log(outcome.source, format!("Failed: {error}"), 0);
                }
                ctx.errors.record(outcome.source, error);
                continue;
            }
            if outcome.records.is_empty() {
                ctx.log.log(outcome.source, "No results", 0);
                continue;
            }

            let mut added = 0;
            let found = outcome.records.len();
            for record in outcome.records {
                if seen.insert(canonical_url(&record.url)) {
                    results.push(record);
                    added += 1;
                }
            }
            if added > 0 {
                sources_used.push(outcome.source.to_string());
            }
            ctx.log.log(
                outcome.source,
                format!("Found {found} results, {added} unique"),
                added,
            );
        }

        ctx.log.log(
            "parallel",
            "All 7 methods complete",
            results.len(),
        );
        results.truncate(limit);

        // Keyword phase: search inside the found PDFs.
        let mut content_matches = Vec::new();
        if let Some(keyword) = keyword {
            let pdf_urls: Vec<String> = results
                .iter()
                .filter(|r| r.filetype.as_deref() == Some("pdf"))
                .map(|r| r.url.clone())
                .take(options.max_content_pdfs)
                .collect();

            if !pdf_urls.is_empty() {
                ctx.log.log(
                    "pdf_extract",
                    format!(
                        "Extracting content from {} PDFs to search for '{keyword}'",
                        pdf_urls.len()
                    ),
                    0,
                );
                content_matches = self
                    .extract_pdf_batch(&pdf_urls, keyword, options.content_concurrency)
                    .await;
                ctx.log.log(
                    "pdf_extract",
                    format!("Keyword found in {} PDFs", content_matches.len()),
                    content_matches.len(),
                );
            }
        }

        FiletypeResponse {
            domain,
            filetypes_searched: extensions,
            keyword: keyword.map(|k| k.to_string()),
            total_found: results.len(),
            results,
            content_matches,
            sources_used,
            elapsed_ms: ctx.log.elapsed_ms(),
            logs: ctx.log.entries(),
        }
    }

    /// Archive index with MIME filtering, across configured archives.
    async fn cc_mime_search(
        &self,
        domain: &str,
        extensions: &[String],
        limit: usize,
    ) -> Result<Vec<UrlRecord>, DiscoverError> {
        let ctx = self.ctx;
        let mime_types: Vec<&str> = extensions.iter().filter_map(|e| mime_for(e)).collect();
        if mime_types.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        let mut seen = HashSet::new();

        for archive in &ctx.config.archives {
            if results.len() >= limit || ctx.cancel.is_cancelled() {
                break;
            }
            for mime in &mime_types {
                let remaining = limit.saturating_sub(results.len());
                if remaining == 0 {
                    break;
                }
                let filters = vec![format!("mime:{mime}"), "status:200".to_string()];
                let pages = match query_index(
                    ctx.caps.fetcher.as_ref(),
                    &ctx.limiter,
                    &ctx.retry,
                    &ctx.cancel,
                    &ctx.config.archive_index_base,
                    archive,
                    &format!("*.{domain}/*"),
                    &filters,
                    remaining.min(100),
                )
                .await
                {
                    Ok(pages) => pages,
                    Err(e) => {
                        debug!("[cc_mime] {archive} failed: {e}");
                        continue;
                    }
                };

                for page in pages {
                    if !seen.insert(page.url.clone()) {
                        continue;
                    }
                    let ext = page
                        .mime
                        .as_deref()
                        .and_then(ext_for_mime)
                        .map(|e| e.to_string())
                        .or_else(|| ext_of_url(&page.url, extensions).map(|e| e.to_string()));
                    let Some(ext) = ext else {
                        continue;
                    };
                    results.push(
                        UrlRecord::new(page.url.clone(), domain, "cc_mime")
                            .with_status(page.status, page.mime.clone())
                            .with_archive("commoncrawl", None)
                            .with_filetype(ext),
                    );
                }
            }
        }
        Ok(results)
    }

    /// Engine-operator search through the SERP capability.
    async fn serp_search(
        &self,
        engine: &'static str,
        domain: &str,
        extensions: &[String],
        keyword: Option<&str>,
        limit: usize,
    ) -> Result<Vec<UrlRecord>, DiscoverError> {
        let ctx = self.ctx;
        let Some(serp) = &ctx.caps.serp else {
            return Ok(Vec::new());
        };

        let per_ext = (limit / extensions.len().max(1)).clamp(1, 20);
        let mut results = Vec::new();

        for ext in extensions {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let query = engine_query(domain, ext, keyword);
            ctx.limiter.acquire(engine).await;
            let hits = match serp.search(engine, &query, None, per_ext).await {
                Ok(hits) => hits,
                Err(e) => {
                    debug!("[{engine}] {ext} search failed: {e}");
                    continue;
                }
            };

            for hit in hits {
                // Validate the URL actually carries the extension.
                if !hit.url.to_lowercase().contains(&format!(".{ext}")) {
                    continue;
                }
                results.push(
                    UrlRecord::new(hit.url, domain, engine)
                        .with_metadata(hit.title, hit.snippet)
                        .with_query(query.clone())
                        .with_filetype(ext.clone()),
                );
            }
        }
        Ok(results)
    }

    /// Site-mapper search endpoint with the same operator syntax.
    async fn mapper_search(
        &self,
        domain: &str,
        extensions: &[String],
        keyword: Option<&str>,
        limit: usize,
    ) -> Result<Vec<UrlRecord>, DiscoverError> {
        let ctx = self.ctx;
        let Some(mapper) = &ctx.caps.mapper else {
            return Ok(Vec::new());
        };

        let per_ext = (limit / extensions.len().max(1)).clamp(1, 20);
        let mut results = Vec::new();

        for ext in extensions {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let query = engine_query(domain, ext, keyword);
            let hits = match mapper.search(&query, per_ext).await {
                Ok(hits) => hits,
                Err(e) => {
                    debug!("[mapper.search] {ext} search failed: {e}");
                    continue;
                }
            };
            for hit in hits {
                if !hit.url.to_lowercase().contains(&format!(".{ext}")) {
                    continue;
                }
                results.push(
                    UrlRecord::new(hit.url, domain, "mapper.search")
                        .with_metadata(hit.title, hit.snippet)
                        .with_query(query.clone())
                        .with_filetype(ext.clone()),
                );
            }
        }
        Ok(results)
    }

    /// Archive index by URL extension pattern, newest archive only.
    async fn cc_pattern_search(
        &self,
        domain: &str,
        extensions: &[String],
        limit: usize,
    ) -> Result<Vec<UrlRecord>, DiscoverError> {
        let ctx = self.ctx;
        let Some(archive) = ctx.config.archives.first() else {
            return Ok(Vec::new());
        };

        let per_ext = (limit / extensions.len().max(1)).clamp(1, 100);
        let mut results = Vec::new();

        for ext in extensions {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let pages = match query_index(
                ctx.caps.fetcher.as_ref(),
                &ctx.limiter,
                &ctx.retry,
                &ctx.cancel,
                &ctx.config.archive_index_base,
                archive,
                &format!("*.{domain}/*.{ext}"),
                &[],
                per_ext,
            )
            .await
            {
                Ok(pages) => pages,
                Err(e) => {
                    debug!("[cc.index] {ext} pattern failed: {e}");
                    continue;
                }
            };

            for page in pages {
                results.push(
                    UrlRecord::new(page.url.clone(), domain, "cc.index")
                        .with_status(page.status, page.mime.clone())
                        .with_archive("commoncrawl", None)
                        .with_filetype(ext.clone()),
                );
            }
        }
        Ok(results)
    }

    /// Crawl the site and mine file links out of pages.
    async fn site_crawl(
        &self,
        domain: &str,
        extensions: &[String],
        keyword: Option<&str>,
        limit: usize,
    ) -> Result<Vec<UrlRecord>, DiscoverError> {
        let ctx = self.ctx;
        let Some(mapper) = &ctx.caps.mapper else {
            return Ok(Vec::new());
        };

        let job_id = mapper.start_crawl(domain, (limit * 3).min(200), false).await?;
        let mut results = Vec::new();
        let mut seen = HashSet::new();

        for _ in 0..36 {
            if ctx.cancel.is_cancelled() || results.len() >= limit {
                break;
            }
            let status = mapper.crawl_status(&job_id).await?;

            for page in &status.pages {
                let Some(page_url) = &page.url else { continue };
                let mut candidates: Vec<String> = page.links.clone();
                if let Some(html) = &page.html {
                    candidates.extend(crate::sources::mapper_api::extract_assets(html, page_url));
                }
                for link in candidates {
                    let Some(ext) = ext_of_url(&link, extensions) else {
                        continue;
                    };
                    if let Some(keyword) = keyword {
                        if !link.to_lowercase().contains(&keyword.to_lowercase()) {
                            continue;
                        }
                    }
                    if !seen.insert(link.clone()) {
                        continue;
                    }
                    results.push(
                        UrlRecord::new(link, domain, "site_crawl")
                            .with_parent(page_url.clone())
                            .with_filetype(ext.to_string()),
                    );
                }
            }

            match status.state {
                CrawlState::Completed | CrawlState::Failed => break,
                CrawlState::Running => {
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    }
                }
            }
        }
        Ok(results)
    }

    /// Historical archives plus the Wayback CDX, the slowest but most
    /// thorough method.
    async fn archive_deep(
        &self,
        domain: &str,
        extensions: &[String],
        keyword: Option<&str>,
        limit: usize,
    ) -> Result<Vec<UrlRecord>, DiscoverError> {
        let ctx = self.ctx;
        let mut results = Vec::new();
        let mut seen = HashSet::new();

        // Several historical index segments.
        for archive in &ctx.config.archives {
            if results.len() >= limit || ctx.cancel.is_cancelled() {
                break;
            }
            for ext in extensions {
                let pages = match query_index(
                    ctx.caps.fetcher.as_ref(),
                    &ctx.limiter,
                    &ctx.retry,
                    &ctx.cancel,
                    &ctx.config.archive_index_base,
                    archive,
                    &format!("*.{domain}/*.{ext}"),
                    &[],
                    50,
                )
                .await
                {
                    Ok(pages) => pages,
                    Err(e) => {
                        debug!("[archive_deep] {archive} error: {e}");
                        continue;
                    }
                };

                for page in pages {
                    if !seen.insert(page.url.clone()) {
                        continue;
                    }
                    if let Some(keyword) = keyword {
                        if !page.url.to_lowercase().contains(&keyword.to_lowercase()) {
                            continue;
                        }
                    }
                    results.push(
                        UrlRecord::new(page.url.clone(), domain, "archive_deep")
                            .with_status(page.status, page.mime.clone())
                            .with_archive("commoncrawl", None)
                            .with_filetype(ext.clone()),
                    );
                }
            }
        }

        // Wayback CDX per extension.
        for ext in extensions {
            if results.len() >= limit || ctx.cancel.is_cancelled() {
                break;
            }
            let cdx_url = format!(
                "https://web.archive.org/cdx/search/cdx?url={}&matchType=prefix&output=json&limit=100&filter=statuscode:200&collapse=urlkey",
                urlencoding::encode(&format!("{domain}/*.{ext}"))
            );
            let fetcher = ctx.caps.fetcher.clone();
            let limiter = ctx.limiter.clone();
            let response = ctx
                .retry
                .run(&ctx.cancel, || {
                    crate::fetch::rate_limited_get(
                        fetcher.as_ref(),
                        &limiter,
                        "wayback",
                        &cdx_url,
                        &[],
                    )
                })
                .await;

            let Ok(response) = response else { continue };
            if !response.is_success() {
                continue;
            }
            let Ok(rows) = response.json::<Vec<Vec<String>>>() else {
                continue;
            };
            if rows.len() < 2 {
                continue;
            }

            let headers = &rows[0];
            let url_idx = headers.iter().position(|h| h == "original").unwrap_or(2);
            let ts_idx = headers.iter().position(|h| h == "timestamp").unwrap_or(1);

            for row in &rows[1..] {
                let Some(url) = row.get(url_idx) else { continue };
                if !seen.insert(url.clone()) {
                    continue;
                }
                if let Some(keyword) = keyword {
                    if !url.to_lowercase().contains(&keyword.to_lowercase()) {
                        continue;
                    }
                }
                let timestamp = row.get(ts_idx);
                let archive_url =
                    timestamp.map(|ts| format!("https://web.archive.org/web/{ts}/{url}"));
                results.push(
                    UrlRecord::new(url.clone(), domain, "archive_deep")
                        .with_archive("wayback", archive_url)
                        .with_filetype(ext.clone()),
                );
            }
        }

        Ok(results)
    }

    /// Four-tier extraction per PDF, bounded concurrency; results sorted
    /// by match count descending.
    async fn extract_pdf_batch(
        &self,
        pdf_urls: &[String],
        keyword: &str,
        concurrency: usize,
    ) -> Vec<ContentMatch> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = FuturesUnordered::new();

        for url in pdf_urls {
            let semaphore = semaphore.clone();
            let url = url.clone();
            tasks.push(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return None;
                };
                self.extract_single_pdf(&url, keyword).await
            });
        }

        let mut matches = Vec::new();
        while let Some(result) = tasks.next().await {
            if let Some(found) = result {
                matches.push(found);
            }
        }
        matches.sort_by_key(|m| std::cmp::Reverse(m.keyword_matches));
        matches
    }

    async fn extract_single_pdf(&self, url: &str, keyword: &str) -> Option<ContentMatch> {
        let ctx = self.ctx;

        // Tier 1: cloud parser.
        let mut content: Option<(String, ExtractionMethod)> = None;
        if let Some(mapper) = &ctx.caps.mapper {
            if let Ok(Ok(text)) =
                tokio::time::timeout(Duration::from_secs(45), mapper.parse_document(url)).await
            {
                if text.trim().chars().count() >= MIN_EXTRACT_CHARS {
                    content = Some((text, ExtractionMethod::Cloud));
                }
            }
        }

        // Tier 2: archived copy out of the WARC corpus.
        if content.is_none() {
            if let Ok(Some(text)) =
                tokio::time::timeout(Duration::from_secs(60), self.extract_via_archive(url)).await
            {
                content = Some((text, ExtractionMethod::CcWarc));
            }
        }

        // Tiers 3 and 4 need the live bytes.
        let mut pdf_bytes: Option<Vec<u8>> = None;
        if content.is_none() {
            if let Ok(Ok(response)) = tokio::time::timeout(
                Duration::from_secs(30),
                ctx.caps.fetcher.get(url, &[]),
            )
            .await
            {
                if response.is_success() {
                    pdf_bytes = Some(response.body);
                }
            }
        }

        if content.is_none() {
            if let (Some(bytes), Some(extractor)) = (&pdf_bytes, &ctx.caps.pdf_text) {
                if let Ok(text) = extractor.extract(bytes) {
                    if text.trim().chars().count() >= MIN_EXTRACT_CHARS {
                        content = Some((text, ExtractionMethod::Local));
                    }
                }
            }
        }

        if content.is_none() {
            if let (Some(bytes), Some(vision)) = (&pdf_bytes, &ctx.caps.vision_ocr) {
                if bytes.len() <= MAX_VISION_PDF_BYTES {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                    if let Ok(Ok(text)) = tokio::time::timeout(
                        Duration::from_secs(120),
                        vision.extract_text(&encoded),
                    )
                    .await
                    {
                        if text.trim().chars().count() >= MIN_EXTRACT_CHARS {
                            content = Some((text, ExtractionMethod::VisionOcr));
                        }
                    }
                } else {
                    debug!("[pdf_extract] PDF too large for vision tier: {url}");
                }
            }
        }

        let (text, method) = content?;
        let (count, snippet) = keyword_matches(&text, keyword)?;
        Some(ContentMatch {
            url: url.to_string(),
            keyword_matches: count,
            snippet,
            content_length: text.len(),
            extraction_method: method,
        })
    }

    /// Tier 2: locate the exact URL in the archive index, Range-fetch the
    /// record, and run the local extractor on the archived bytes.
    async fn extract_via_archive(&self, url: &str) -> Option<String> {
        let ctx = self.ctx;
        let extractor = ctx.caps.pdf_text.as_ref()?;

        for archive in &ctx.config.archives {
            let pages = match query_index(
                ctx.caps.fetcher.as_ref(),
                &ctx.limiter,
                &ctx.retry,
                &ctx.cancel,
                &ctx.config.archive_index_base,
                archive,
                url,
                &[],
                10,
            )
            .await
            {
                Ok(pages) => pages,
                Err(e) => {
                    debug!("[pdf_extract] {archive} index lookup failed: {e}");
                    continue;
                }
            };

            let record = pages.iter().find(|p| {
                p.mime.as_deref() == Some("application/pdf") && p.status == Some(200)
            });
            let Some(record) = record else {
                continue;
            };

            let payload = match fetch_record(
                ctx.caps.fetcher.as_ref(),
                &ctx.limiter,
                &ctx.retry,
                &ctx.cancel,
                &ctx.config.archive_data_base,
                record,
            )
            .await
            {
                Ok(payload) => payload,
                Err(e) => {
                    debug!("[pdf_extract] archive fetch failed for {url}: {e}");
                    continue;
                }
            };

            if payload.body.len() < 100 {
                continue;
            }
            if let Ok(text) = extractor.extract(&payload.body) {
                if text.trim().chars().count() >= MIN_EXTRACT_CHARS {
                    return Some(text);
                }
            }
        }
        None
    }
}
