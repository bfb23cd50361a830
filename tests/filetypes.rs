//! Filetype sweep plus the keyword-in-PDF cascade, against fakes where
//! only the local extraction tier succeeds.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use dragnet::capabilities::{Capabilities, PdfText, SerpClient, SerpResult};
use dragnet::error::DiscoverError;
use dragnet::models::ExtractionMethod;
use dragnet::{FiletypeOptions, Session};

use common::FakeFetcher;

const PDF1: &str = "https://acme.com/reports/annual.pdf";
const PDF2: &str = "https://acme.com/files/brochure.pdf";
const PDF3: &str = "https://acme.com/files/menu.pdf";

fn hit(url: &str, title: &str) -> SerpResult {
    SerpResult {
        url: url.to_string(),
        title: Some(title.to_string()),
        snippet: None,
        date: None,
    }
}

/// Two engines with overlapping result sets: three unique PDFs total.
struct EngineFake;

#[async_trait]
impl SerpClient for EngineFake {
    async fn search(
        &self,
        engine: &str,
        _query: &str,
        _market: Option<&str>,
        _num: usize,
    ) -> Result<Vec<SerpResult>, DiscoverError> {
        match engine {
            "google" => Ok(vec![hit(PDF1, "Annual Report"), hit(PDF2, "Brochure")]),
            "brave" => Ok(vec![hit(PDF2, "Brochure"), hit(PDF3, "Menu")]),
            _ => Ok(Vec::new()),
        }
    }
}

/// Local extractor keyed off the fetched body bytes.
struct BodyKeyedExtractor;

impl PdfText for BodyKeyedExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, DiscoverError> {
        match bytes {
            b"PDF1" => Ok(format!("Consolidated results. {}", "revenue ".repeat(11))),
            b"PDF2" => Ok("Product brochure with feature descriptions and imagery, nothing fiscal about it at all.".to_string()),
            b"PDF3" => Ok("Cafeteria menu for the spring season, soups and sandwiches listed by weekday.".to_string()),
            _ => Err(DiscoverError::Parse("unknown document".to_string())),
        }
    }
}

fn session() -> Session {
    let fetcher = FakeFetcher::new()
        .route_bytes("reports/annual.pdf", b"PDF1".to_vec())
        .route_bytes("files/brochure.pdf", b"PDF2".to_vec())
        .route_bytes("files/menu.pdf", b"PDF3".to_vec());

    let caps = Capabilities::new(Arc::new(fetcher))
        .with_serp(Arc::new(EngineFake))
        .with_pdf_text(Arc::new(BodyKeyedExtractor));
    Session::new(caps)
}

#[tokio::test]
async fn keyword_is_found_inside_one_pdf_via_local_tier() {
    let session = session();
    let response = session
        .discover_filetypes("acme.com", "pdf", Some("revenue"), FiletypeOptions::default())
        .await
        .unwrap();

    assert_eq!(response.domain, "acme.com");
    assert_eq!(response.filetypes_searched, vec!["pdf"]);
    assert_eq!(response.total_found, 3);

    let mut urls: Vec<&str> = response.results.iter().map(|r| r.url.as_str()).collect();
    urls.sort();
    assert_eq!(urls, vec![PDF2, PDF3, PDF1]);

    // Only the annual report contains the keyword; tiers 1 and 2 have no
    // backing capability or archive copy, so the local tier wins.
    assert_eq!(response.content_matches.len(), 1);
    let matched = &response.content_matches[0];
    assert_eq!(matched.url, PDF1);
    assert_eq!(matched.keyword_matches, 11);
    assert_eq!(matched.extraction_method, ExtractionMethod::Local);
    assert!(matched.snippet.to_lowercase().contains("revenue"));

    assert_eq!(response.sources_used, vec!["google", "brave"]);
    assert!(!response.logs.is_empty());
}

#[tokio::test]
async fn content_matches_sort_by_count_descending() {
    struct TwoMatchExtractor;

    impl PdfText for TwoMatchExtractor {
        fn extract(&self, bytes: &[u8]) -> Result<String, DiscoverError> {
            match bytes {
                b"PDF1" => Ok(format!(
                    "Quarterly filing with detailed commentary. {} end of filing.",
                    "revenue ".repeat(3)
                )),
                b"PDF2" => Ok(format!("{} appendix tables.", "revenue ".repeat(9))),
                b"PDF3" => Ok("No fiscal terms in this document, only seasonal menu items listed.".to_string()),
                _ => Err(DiscoverError::Parse("unknown document".to_string())),
            }
        }
    }

    let fetcher = FakeFetcher::new()
        .route_bytes("reports/annual.pdf", b"PDF1".to_vec())
        .route_bytes("files/brochure.pdf", b"PDF2".to_vec())
        .route_bytes("files/menu.pdf", b"PDF3".to_vec());
    let caps = Capabilities::new(Arc::new(fetcher))
        .with_serp(Arc::new(EngineFake))
        .with_pdf_text(Arc::new(TwoMatchExtractor));
    let session = Session::new(caps);

    let response = session
        .discover_filetypes("acme.com", "pdf", Some("revenue"), FiletypeOptions::default())
        .await
        .unwrap();

    assert_eq!(response.content_matches.len(), 2);
    assert_eq!(response.content_matches[0].url, PDF2);
    assert_eq!(response.content_matches[0].keyword_matches, 9);
    assert_eq!(response.content_matches[1].url, PDF1);
    assert_eq!(response.content_matches[1].keyword_matches, 3);
}

#[tokio::test]
async fn no_keyword_skips_the_extraction_phase() {
    let session = session();
    let response = session
        .discover_filetypes("acme.com", "pdf", None, FiletypeOptions::default())
        .await
        .unwrap();

    assert_eq!(response.total_found, 3);
    assert!(response.content_matches.is_empty());
    assert!(response.keyword.is_none());
}

#[tokio::test]
async fn alias_expands_to_extension_list() {
    let session = session();
    let response = session
        .discover_filetypes("acme.com", "word", None, FiletypeOptions::default())
        .await
        .unwrap();

    assert_eq!(response.filetypes_searched, vec!["doc", "docx", "odt", "rtf"]);
    // The engine fakes only answer PDFs, which fail extension validation.
    assert_eq!(response.total_found, 0);
}
