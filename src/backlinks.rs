//! Backlink discovery: pages and hosts linking *to* a target.
//!
//! The fast mode merges graph-index edges with provider domain lists. The
//! rich mode walks from top referring domains through the archive index to
//! byte-range WARC fetches, and verifies anchors by parsing the archived
//! HTML; anchor text is never synthesized.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

use crate::config::BacklinkOptions;
use crate::models::{
    BacklinkResponse, LinkProvider, LinkRecord, PageRef, ProviderCount, TargetKind,
};
use crate::sources::archives::query_index;
use crate::sources::graph::run_link_binary;
use crate::sources::SourceContext;
use crate::warc::{fetch_record, wat_links_to_target};

/// Referring pages fetched per source domain from the archive index.
const MAX_PAGES_PER_SOURCE: usize = 50;

/// Hard cap on byte-range fetches per run.
const MAX_CHUNK_FETCHES: usize = 500;

/// Concurrent index queries / range fetches.
const FETCH_CONCURRENCY: usize = 30;

/// Split a backlink target into `(domain, path, kind)`.
///
/// `soax.com` -> domain; `soax.com/pricing` and full URLs -> url targets.
pub fn parse_target(target: &str) -> (String, Option<String>, TargetKind) {
    let (domain, path) = if target.starts_with("http://") || target.starts_with("https://") {
        match Url::parse(target) {
            Ok(parsed) => {
                let domain = parsed.host_str().unwrap_or("").to_string();
                let path = parsed.path();
                let path = if path.is_empty() || path == "/" {
                    None
                } else {
                    Some(path.to_string())
                };
                (domain, path)
            }
            Err(_) => (target.to_string(), None),
        }
    } else {
        match target.split_once('/') {
            Some((domain, rest)) => (domain.to_string(), Some(format!("/{rest}"))),
            None => (target.to_string(), None),
        }
    };

    let kind = if path.is_some() {
        TargetKind::Url
    } else {
        TargetKind::Domain
    };
    (domain.to_lowercase(), path, kind)
}

/// `<a href>` elements of `html` whose href mentions the target host, as
/// `(href, anchor_text)` pairs. Anchor text is trimmed to 200 chars.
pub fn extract_links_to_target(html: &str, target_host: &str) -> Vec<(String, String)> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("Failed to parse anchor selector");
    let target_lower = target_host.to_lowercase();

    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if !href.to_lowercase().contains(&target_lower) {
            continue;
        }
        let text: String = element.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let text: String = text.chars().take(200).collect();
        links.push((href.to_string(), text));
    }
    links
}

fn host_of(source: &str) -> String {
    if source.starts_with("http://") || source.starts_with("https://") {
        Url::parse(source)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_else(|| source.to_string())
    } else {
        source.split('/').next().unwrap_or(source).to_lowercase()
    }
}

fn provider_counts(links: &[LinkRecord]) -> Vec<ProviderCount> {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for link in links {
        *counts.entry(link.provider.as_str()).or_default() += 1;
    }
    let mut out: Vec<ProviderCount> = counts
        .into_iter()
        .map(|(provider, count)| ProviderCount {
            provider: provider.to_string(),
            count,
        })
        .collect();
    out.sort_by(|a, b| a.provider.cmp(&b.provider));
    out
}

/// The backlink pipeline, driven directly off the session context.
pub struct BacklinkCore<'a> {
    ctx: &'a SourceContext,
}

impl<'a> BacklinkCore<'a> {
    pub fn new(ctx: &'a SourceContext) -> Self {
        Self { ctx }
    }

    /// Fast mode: referring domains only.
    pub async fn referring_domains(
        &self,
        target: &str,
        options: &BacklinkOptions,
    ) -> BacklinkResponse {
        let ctx = self.ctx;
        let (domain, _path, kind) = parse_target(target);
        let mut by_host: HashMap<String, LinkRecord> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        if let Some(graph) = &ctx.caps.graph {
            ctx.log.log("host_graph", "Querying host graph", 0);
            match graph.incoming_edges(&domain, options.limit.max(1000), true).await {
                Ok(edges) => {
                    ctx.log.log("host_graph", "Found referring hosts", edges.len());
                    for edge in edges {
                        let host = edge.source_host.to_lowercase();
                        by_host.entry(host.clone()).or_insert_with(|| {
                            order.push(host.clone());
                            LinkRecord::new(host.clone(), domain.clone(), LinkProvider::HostGraph)
                                .with_weight(edge.weight)
                        });
                    }
                }
                Err(e) => ctx.errors.record("host_graph", e.to_string()),
            }
        }

        if options.include_majestic {
            if let Some(provider) = &ctx.caps.backlink_provider {
                ctx.log.log("majestic", "Querying provider (domains mode)", 0);
                match provider.referring_domains(&domain, options.limit).await {
                    Ok(links) => {
                        ctx.log.log("majestic", "Found referring domains", links.len());
                        for link in links {
                            let host = host_of(&link.source);
                            match by_host.get_mut(&host) {
                                Some(existing) => {
                                    existing.trust_flow = link.trust_flow;
                                    existing.citation_flow = link.citation_flow;
                                }
                                None => {
                                    order.push(host.clone());
                                    let mut record = LinkRecord::new(
                                        host.clone(),
                                        domain.clone(),
                                        LinkProvider::Majestic,
                                    );
                                    record.trust_flow = link.trust_flow;
                                    record.citation_flow = link.citation_flow;
                                    by_host.insert(host, record);
                                }
                            }
                        }
                    }
                    Err(e) => ctx.errors.record("majestic", e.to_string()),
                }
            }
        }

        if options.include_tor {
            if let Some(bridges) = &ctx.caps.tor_bridges {
                match bridges.bridges_to(&domain, 100).await {
                    Ok(links) => {
                        ctx.log.log("tor_bridge", "Found bridges", links.len());
                        for link in links {
                            let host = host_of(&link.source);
                            by_host.entry(host.clone()).or_insert_with(|| {
                                order.push(host.clone());
                                LinkRecord::new(
                                    host.clone(),
                                    domain.clone(),
                                    LinkProvider::TorBridge,
                                )
                            });
                        }
                    }
                    Err(e) => ctx.errors.record("tor_bridge", e.to_string()),
                }
            }
        }

        let mut links: Vec<LinkRecord> = order
            .into_iter()
            .filter_map(|host| by_host.remove(&host))
            .collect();
        // Flow scores rank first, edge weight breaks ties.
        links.sort_by_key(|l| {
            let flow = l.trust_flow.unwrap_or(0) as u64 + l.citation_flow.unwrap_or(0) as u64;
            std::cmp::Reverse((flow, l.weight.unwrap_or(0)))
        });
        links.truncate(options.limit);

        BacklinkResponse {
            target: target.to_string(),
            target_kind: kind,
            per_provider: provider_counts(&links),
            links,
            elapsed_ms: ctx.log.elapsed_ms(),
            logs: ctx.log.entries(),
        }
    }

    /// Rich mode: referring pages with verified anchor text.
    pub async fn referring_pages(
        &self,
        target: &str,
        options: &BacklinkOptions,
    ) -> BacklinkResponse {
        let ctx = self.ctx;
        let (domain, _path, kind) = parse_target(target);

        // Step 1: host-level candidates from the graph, weight-ranked.
        let mut edges = Vec::new();
        if let Some(graph) = &ctx.caps.graph {
            ctx.log.log("host_graph", "Querying host graph", 0);
            match graph.incoming_edges(&domain, 1000, true).await {
                Ok(found) => edges = found,
                Err(e) => ctx.errors.record("host_graph", e.to_string()),
            }
        }
        edges.sort_by_key(|e| std::cmp::Reverse(e.weight));

        let mut source_domains: Vec<String> = Vec::new();
        let mut seen_hosts = HashSet::new();
        for edge in edges.iter().take(options.top_domains) {
            let host = host_of(&edge.source_host);
            if host != domain && seen_hosts.insert(host.clone()) {
                source_domains.push(host);
            }
        }

        let mut links: Vec<LinkRecord> = Vec::new();

        // Steps 2-4: archive index -> byte-range fetch -> anchor parse.
        if options.include_archives && !source_domains.is_empty() {
            let archive_links = self
                .archive_pages(&domain, &source_domains, &options.archive, options.limit)
                .await;
            ctx.log.log(
                "cc_wat",
                "Archive extraction found backlinks with anchor text",
                archive_links.len(),
            );

            // Step 5: offline fallback when the live index produced nothing.
            if archive_links.is_empty() {
                links.extend(
                    self.offline_fallback(&domain, &source_domains, &options.archive)
                        .await,
                );
            } else {
                links.extend(archive_links);
            }
        }

        if options.include_majestic {
            if let Some(provider) = &ctx.caps.backlink_provider {
                match provider.referring_pages(&domain, options.limit).await {
                    Ok(found) => {
                        ctx.log.log("majestic", "Found referring pages", found.len());
                        for link in found {
                            let mut record = LinkRecord::new(
                                link.source,
                                link.target,
                                LinkProvider::Majestic,
                            );
                            record.trust_flow = link.trust_flow;
                            record.citation_flow = link.citation_flow;
                            if let Some(anchor) = link.anchor_text {
                                record = record.with_anchor_text(anchor);
                            }
                            links.push(record);
                        }
                    }
                    Err(e) => ctx.errors.record("majestic", e.to_string()),
                }
            }
        }

        if options.include_tor {
            if let Some(bridges) = &ctx.caps.tor_bridges {
                match bridges.bridges_to(&domain, 100).await {
                    Ok(found) => {
                        for link in found {
                            let mut record = LinkRecord::new(
                                link.source,
                                link.target,
                                LinkProvider::TorBridge,
                            );
                            if let Some(anchor) = link.anchor_text {
                                record = record.with_anchor_text(anchor);
                            }
                            links.push(record);
                        }
                    }
                    Err(e) => ctx.errors.record("tor_bridge", e.to_string()),
                }
            }
        }

        if !options.include_anchor_text {
            links = links
                .into_iter()
                .map(|mut link| {
                    link.anchor_text = None;
                    link
                })
                .collect();
        }

        // Dedup by source URL, first provider wins.
        let mut seen_sources = HashSet::new();
        let mut unique = Vec::new();
        for link in links {
            if seen_sources.insert(link.source.clone()) {
                unique.push(link);
            }
        }
        unique.truncate(options.limit);

        BacklinkResponse {
            target: target.to_string(),
            target_kind: kind,
            per_provider: provider_counts(&unique),
            links: unique,
            elapsed_ms: ctx.log.elapsed_ms(),
            logs: ctx.log.entries(),
        }
    }

    /// Per (source domain, archive): index query, then bounded-parallel
    /// range fetches with anchor extraction.
    async fn archive_pages(
        &self,
        target_domain: &str,
        source_domains: &[String],
        archive: &str,
        limit: usize,
    ) -> Vec<LinkRecord> {
        let ctx = self.ctx;
        ctx.log.log(
            "cc.index",
            format!("Querying archive index for {} source domains", source_domains.len()),
            0,
        );

        // Index queries, bounded.
        let semaphore = Arc::new(Semaphore::new(10));
        let mut index_queries = FuturesUnordered::new();
        for source in source_domains {
            let semaphore = semaphore.clone();
            let source = source.clone();
            let archive = archive.to_string();
            index_queries.push(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return Vec::new();
                };
                match query_index(
                    ctx.caps.fetcher.as_ref(),
                    &ctx.limiter,
                    &ctx.retry,
                    &ctx.cancel,
                    &ctx.config.archive_index_base,
                    &archive,
                    &format!("{source}/*"),
                    &[],
                    MAX_PAGES_PER_SOURCE,
                )
                .await
                {
                    Ok(pages) => pages,
                    Err(e) => {
                        debug!("[cc.index] {} failed: {}", source, e);
                        ctx.errors.record("cc.index", e.to_string());
                        Vec::new()
                    }
                }
            });
        }

        let mut candidates: Vec<PageRef> = Vec::new();
        while let Some(pages) = index_queries.next().await {
            candidates.extend(pages);
            if candidates.len() >= MAX_CHUNK_FETCHES {
                break;
            }
        }
        candidates.truncate(MAX_CHUNK_FETCHES);

        if candidates.is_empty() {
            return Vec::new();
        }
        ctx.log.log(
            "cc.index",
            "Found candidate pages, fetching archived bytes",
            candidates.len(),
        );

        // Range fetches + parse, bounded.
        let fetch_semaphore = Arc::new(Semaphore::new(FETCH_CONCURRENCY));
        let mut fetches = FuturesUnordered::new();
        for page in candidates {
            let semaphore = fetch_semaphore.clone();
            let target_domain = target_domain.to_string();
            fetches.push(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return Vec::new();
                };
                if ctx.cancel.is_cancelled() {
                    return Vec::new();
                }
                let payload = match fetch_record(
                    ctx.caps.fetcher.as_ref(),
                    &ctx.limiter,
                    &ctx.retry,
                    &ctx.cancel,
                    &ctx.config.archive_data_base,
                    &page,
                )
                .await
                {
                    Ok(payload) => payload,
                    Err(e) => {
                        debug!("[cc.data] range fetch failed for {}: {}", page.url, e);
                        return Vec::new();
                    }
                };

                let body = payload.body_text();
                let mut found: Vec<LinkRecord> = extract_links_to_target(&body, &target_domain)
                    .into_iter()
                    .map(|(href, anchor)| {
                        let record =
                            LinkRecord::new(page.url.clone(), href, LinkProvider::CcWat);
                        if anchor.is_empty() {
                            record
                        } else {
                            record.with_anchor_text(anchor)
                        }
                    })
                    .collect();

                // WAT metadata records carry the link list as JSON.
                if found.is_empty() && body.contains("\"Envelope\"") {
                    found = wat_links_to_target(&body, &target_domain)
                        .into_iter()
                        .map(|(href, anchor)| {
                            let record =
                                LinkRecord::new(page.url.clone(), href, LinkProvider::CcWat);
                            if anchor.is_empty() {
                                record
                            } else {
                                record.with_anchor_text(anchor)
                            }
                        })
                        .collect();
                }
                found
            });
        }

        let mut links = Vec::new();
        while let Some(found) = fetches.next().await {
            links.extend(found);
            if links.len() >= limit {
                break;
            }
        }
        links
    }

    /// Offline index lookup plus the out-of-process extractor binary.
    async fn offline_fallback(
        &self,
        target_domain: &str,
        source_domains: &[String],
        archive: &str,
    ) -> Vec<LinkRecord> {
        let ctx = self.ctx;
        let Some(offline) = &ctx.caps.offline_index else {
            ctx.log.log("cc_wat_offline", "No offline index available", 0);
            return Vec::new();
        };
        let Some(binary_path) = &ctx.config.link_binary_path else {
            ctx.log.log("cc_wat_offline", "No extractor binary configured", 0);
            return Vec::new();
        };

        ctx.log.log(
            "cc_wat_offline",
            format!("Running offline index lookup for {} domains", source_domains.len()),
            0,
        );

        let mut candidates = Vec::new();
        for source in source_domains {
            match offline.lookup_domain(source, archive, MAX_PAGES_PER_SOURCE).await {
                Ok(pages) => candidates.extend(pages),
                Err(e) => debug!("[cc_wat_offline] lookup {} failed: {}", source, e),
            }
        }
        if candidates.is_empty() {
            ctx.log.log("cc_wat_offline", "No candidate pages in offline index", 0);
            return Vec::new();
        }

        match run_link_binary(binary_path, target_domain, &candidates, archive, &ctx.cancel).await
        {
            Ok(links) => {
                ctx.log.log("cc_wat_offline", "Extractor binary found links", links.len());
                links
            }
            Err(e) => {
                ctx.errors.record("cc_wat_offline", e.to_string());
                Vec::new()
            }
        }
    }
}
