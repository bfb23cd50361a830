//! Capability fakes shared by the integration tests. No network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Once;

use async_trait::async_trait;
use dragnet::error::DiscoverError;
use dragnet::fetch::{FetchResponse, Fetcher};

static TRACING: Once = Once::new();

/// Install the test subscriber once so `RUST_LOG` works in test runs.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Fetcher answering from a fixed route table. The first route whose
/// needle is a substring of the URL wins; everything else is a 404.
pub struct FakeFetcher {
    routes: Vec<(String, FetchResponse)>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        init_tracing();
        Self { routes: Vec::new() }
    }

    pub fn route(mut self, needle: &str, response: FetchResponse) -> Self {
        self.routes.push((needle.to_string(), response));
        self
    }

    pub fn route_text(self, needle: &str, body: &str) -> Self {
        self.route(needle, text_response(200, body))
    }

    pub fn route_bytes(self, needle: &str, body: Vec<u8>) -> Self {
        self.route(
            needle,
            FetchResponse {
                status: 200,
                headers: HashMap::new(),
                body,
            },
        )
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn get(
        &self,
        url: &str,
        _headers: &[(String, String)],
    ) -> Result<FetchResponse, DiscoverError> {
        for (needle, response) in &self.routes {
            if url.contains(needle.as_str()) {
                return Ok(response.clone());
            }
        }
        Ok(FetchResponse {
            status: 404,
            headers: HashMap::new(),
            body: Vec::new(),
        })
    }

    async fn post_json(
        &self,
        url: &str,
        _headers: &[(String, String)],
        _body: serde_json::Value,
    ) -> Result<FetchResponse, DiscoverError> {
        self.get(url, &[]).await
    }
}

pub fn text_response(status: u16, body: &str) -> FetchResponse {
    FetchResponse {
        status,
        headers: HashMap::new(),
        body: body.as_bytes().to_vec(),
    }
}

/// A minimal uncompressed WARC response record wrapping `html`, the way a
/// byte-range fetch returns one.
pub fn warc_response_record(target_uri: &str, html: &str) -> Vec<u8> {
    let http = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
        html.len(),
        html
    );
    format!(
        "WARC/1.0\r\nWARC-Type: response\r\nWARC-Target-URI: {}\r\nWARC-Record-ID: <urn:uuid:11111111-2222-3333-4444-555555555555>\r\nWARC-Date: 2024-03-01T00:00:00Z\r\nContent-Length: {}\r\n\r\n{}\r\n\r\n",
        target_uri,
        http.len(),
        http
    )
    .into_bytes()
}
