//! Exact-phrase recall with the iterative exclusion phase, against a
//! scripted engine fake.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use dragnet::capabilities::{SerpClient, SerpResult};
use dragnet::error::DiscoverError;
use dragnet::models::SearchType;
use dragnet::{Capabilities, RecallOptions, Session};
use tokio_stream::StreamExt;

use common::FakeFetcher;

fn hit(url: &str, title: &str) -> SerpResult {
    SerpResult {
        url: url.to_string(),
        title: Some(title.to_string()),
        snippet: None,
        date: None,
    }
}

/// Scripted engine: two site-group leaves carry hits, the first exclusion
/// pass surfaces one long-tail domain, later passes are dry.
struct ScriptedSerp;

#[async_trait]
impl SerpClient for ScriptedSerp {
    async fn search(
        &self,
        _engine: &str,
        query: &str,
        _market: Option<&str>,
        _num: usize,
    ) -> Result<Vec<SerpResult>, DiscoverError> {
        if query.contains("-site:") {
            // Exclusion phase: once d.gov is excluded, nothing is left.
            if query.contains("-site:d.gov") {
                return Ok(Vec::new());
            }
            assert!(query.contains("-site:a.gov"));
            assert!(query.contains("-site:b.gov"));
            assert!(query.contains("-site:c.gov"));
            return Ok(vec![hit("https://d.gov/w", "Widget foo press release")]);
        }

        match query {
            "\"widget foo\" (site:*.gov)" => Ok(vec![
                hit("https://a.gov/x", "Widget foo report"),
                hit("https://b.gov/y", "Widget-foo annual data"),
                hit("https://a.gov/x", "Widget foo report"),
            ]),
            "\"widget foo\" filetype:pdf (site:*.gov)" => Ok(vec![
                hit("https://c.gov/z.pdf", "Widget foo filing"),
                hit("https://b.gov/y2", "widget foo appendix"),
            ]),
            _ => Ok(Vec::new()),
        }
    }
}

fn recall_options() -> RecallOptions {
    RecallOptions {
        site_groups: vec![vec!["*.gov".to_string()]],
        polite_delay_ms: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn recall_with_exclusion_surfaces_long_tail_domain() {
    let caps = Capabilities::new(Arc::new(FakeFetcher::new())).with_serp(Arc::new(ScriptedSerp));
    let session = Session::new(caps);

    let (mut stream, handle) = session
        .recall_search("\"widget foo\"", recall_options())
        .unwrap();

    let mut normal = Vec::new();
    let mut exceptions = Vec::new();
    while let Some(hit) = stream.next().await {
        match hit.search_type {
            SearchType::Normal => normal.push(hit),
            SearchType::Exception => exceptions.push(hit),
        }
    }
    let summary = handle.await.unwrap();

    // First pass: 4 unique records over the domains {a.gov, b.gov, c.gov}.
    let mut normal_urls: Vec<&str> = normal.iter().map(|h| h.url.as_str()).collect();
    normal_urls.sort();
    assert_eq!(
        normal_urls,
        vec![
            "https://a.gov/x",
            "https://b.gov/y",
            "https://b.gov/y2",
            "https://c.gov/z.pdf",
        ]
    );

    // The exclusion phase admitted exactly the long-tail domain, tagged
    // as iteration 2 (the main sweep counts as iteration 1).
    assert_eq!(exceptions.len(), 1);
    let exception = &exceptions[0];
    assert_eq!(exception.url, "https://d.gov/w");
    assert_eq!(exception.exception_iteration, Some(2));
    assert!(exception.query_used.contains("-site:a.gov"));

    assert_eq!(summary.total, 5);
    assert!(summary.errors.is_empty());
}

#[tokio::test]
async fn every_hit_carries_its_leaf_query_and_tag() {
    let caps = Capabilities::new(Arc::new(FakeFetcher::new())).with_serp(Arc::new(ScriptedSerp));
    let session = Session::new(caps);

    let (mut stream, handle) = session
        .recall_search("\"widget foo\"", recall_options())
        .unwrap();

    while let Some(hit) = stream.next().await {
        assert!(!hit.query_used.is_empty());
        assert!(!hit.query_tag.is_empty());
        assert_eq!(hit.engine, "bing");
        assert_eq!(hit.badge, "BI");
        assert!(hit.query_used.contains("\"widget foo\""));
    }
    handle.await.unwrap();
}

/// The exact-phrase post-filter drops word-order mismatches even when the
/// engine returned them.
#[tokio::test]
async fn exact_phrase_filter_applies_to_engine_hits() {
    struct MismatchSerp;

    #[async_trait]
    impl SerpClient for MismatchSerp {
        async fn search(
            &self,
            _engine: &str,
            query: &str,
            _market: Option<&str>,
            _num: usize,
        ) -> Result<Vec<SerpResult>, DiscoverError> {
            if query == "\"Backward Spyglass\"" {
                return Ok(vec![
                    hit("https://a.example/review", "Backward Spyglass Review"),
                    hit("https://a.example/other", "Spyglass backwards"),
                ]);
            }
            Ok(Vec::new())
        }
    }

    let caps = Capabilities::new(Arc::new(FakeFetcher::new())).with_serp(Arc::new(MismatchSerp));
    let session = Session::new(caps);

    let options = RecallOptions {
        polite_delay_ms: 1,
        exception_search_iterations: 0,
        ..Default::default()
    };
    let (mut stream, handle) = session
        .recall_search("\"Backward Spyglass\"", options)
        .unwrap();

    let mut urls = Vec::new();
    while let Some(hit) = stream.next().await {
        urls.push(hit.url);
    }
    handle.await.unwrap();

    assert_eq!(urls, vec!["https://a.example/review"]);
}
