//! End-to-end domain mapping against declared-source fakes.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use dragnet::{Capabilities, DiscoverOptions, Session};
use tokio_stream::StreamExt;

use common::FakeFetcher;

const ROOT_SITEMAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.org/a</loc></url>
  <url><loc>https://example.org/b</loc><priority>0.9</priority></url>
  <url><loc>https://example.org/c</loc></url>
</urlset>"#;

const SITEMAP_INDEX: &str = r#"<?xml version="1.0"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.org/sm/child.xml</loc></sitemap>
</sitemapindex>"#;

const CHILD_SITEMAP: &str = r#"<?xml version="1.0"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.org/d</loc></url>
  <url><loc>https://example.org/e</loc></url>
</urlset>"#;

const ROBOTS: &str = "User-agent: *\nDisallow: /admin/\nSitemap: https://example.org/sm/index.xml\n";

#[tokio::test]
async fn maps_a_small_domain_from_declared_sources() -> anyhow::Result<()> {
    let fetcher = FakeFetcher::new()
        .route_text("example.org/robots.txt", ROBOTS)
        .route_text("example.org/sitemap.xml", ROOT_SITEMAP)
        .route_text("example.org/sm/index.xml", SITEMAP_INDEX)
        .route_text("example.org/sm/child.xml", CHILD_SITEMAP)
        .route_text("crt.sh", "[]");

    let session = Session::new(Capabilities::new(Arc::new(fetcher)));
    let options = DiscoverOptions {
        sources: Some(vec![
            "sitemap".to_string(),
            "robots".to_string(),
            "crt.sh".to_string(),
        ]),
        ..Default::default()
    };

    let (mut stream, handle) = session.discover_domain("example.org", options)?;

    let mut urls = HashSet::new();
    while let Some(record) = stream.next().await {
        urls.insert(record.url);
    }
    let summary = handle.await?;

    let expected: HashSet<String> = [
        "https://example.org/a",
        "https://example.org/b",
        "https://example.org/c",
        "https://example.org/d",
        "https://example.org/e",
        "https://example.org/admin/",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    assert_eq!(urls, expected);
    assert_eq!(summary.total, 6);
    assert_eq!(summary.sources_used(), vec!["crt.sh", "robots", "sitemap"]);

    let sitemap = summary
        .per_source
        .iter()
        .find(|s| s.source == "sitemap")
        .unwrap();
    assert_eq!(sitemap.unique, 5);
    let robots = summary
        .per_source
        .iter()
        .find(|s| s.source == "robots")
        .unwrap();
    assert_eq!(robots.unique, 1);
    let ct = summary
        .per_source
        .iter()
        .find(|s| s.source == "crt.sh")
        .unwrap();
    assert_eq!(ct.unique, 0);
    assert_eq!(ct.errors, 0);
    Ok(())
}

#[tokio::test]
async fn sitemap_metadata_survives_into_records() {
    let fetcher = FakeFetcher::new().route_text("example.org/sitemap.xml", ROOT_SITEMAP);
    let session = Session::new(Capabilities::new(Arc::new(fetcher)));

    let options = DiscoverOptions {
        sources: Some(vec!["sitemap".to_string()]),
        ..Default::default()
    };
    let (mut stream, handle) = session.discover_domain("example.org", options).unwrap();

    let mut records = Vec::new();
    while let Some(record) = stream.next().await {
        records.push(record);
    }
    handle.await.unwrap();

    let b = records
        .iter()
        .find(|r| r.url == "https://example.org/b")
        .unwrap();
    assert_eq!(b.priority, Some(0.9));
    assert_eq!(b.source, "sitemap");
}

#[tokio::test]
async fn out_of_domain_sitemap_entries_are_dropped() {
    let sitemap = r#"<urlset>
  <url><loc>https://example.org/page</loc></url>
  <url><loc>https://unrelated.net/other</loc></url>
</urlset>"#;
    let fetcher = FakeFetcher::new().route_text("example.org/sitemap.xml", sitemap);
    let session = Session::new(Capabilities::new(Arc::new(fetcher)));

    let options = DiscoverOptions {
        sources: Some(vec!["sitemap".to_string()]),
        ..Default::default()
    };
    let (mut stream, handle) = session.discover_domain("example.org", options).unwrap();

    let mut urls = Vec::new();
    while let Some(record) = stream.next().await {
        urls.push(record.url);
    }
    handle.await.unwrap();

    assert_eq!(urls, vec!["https://example.org/page"]);
}

#[tokio::test]
async fn ct_log_yields_subdomain_records() {
    let ct_body = r#"[
      {"name_value": "www.example.org\napi.example.org"},
      {"name_value": "*.example.org"},
      {"name_value": "www.example.org"}
    ]"#;
    let fetcher = FakeFetcher::new().route_text("crt.sh", ct_body);
    let session = Session::new(Capabilities::new(Arc::new(fetcher)));

    let options = DiscoverOptions {
        sources: Some(vec!["crt.sh".to_string()]),
        ..Default::default()
    };
    let (mut stream, handle) = session.discover_domain("example.org", options).unwrap();

    let mut records = Vec::new();
    while let Some(record) = stream.next().await {
        records.push(record);
    }
    let summary = handle.await.unwrap();

    assert_eq!(summary.total, 2);
    let api = records
        .iter()
        .find(|r| r.url == "https://api.example.org")
        .unwrap();
    assert_eq!(api.subdomain.as_deref(), Some("api"));
}
