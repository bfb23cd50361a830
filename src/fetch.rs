//! HTTP fetch capability.
//!
//! Adapters never build their own client: one pooled fetcher per session is
//! injected everywhere so connections are reused. Tests substitute a fake
//! implementation of [`Fetcher`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::DiscoverError;
use crate::rate_limit::RateLimiter;

pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; Dragnet/0.4)";

/// Raw response handed back to adapters.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, DiscoverError> {
        serde_json::from_slice(&self.body).map_err(DiscoverError::from)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|v| v.as_str())
    }
}

/// Low-level HTTP capability consumed by every adapter.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<FetchResponse, DiscoverError>;

    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: serde_json::Value,
    ) -> Result<FetchResponse, DiscoverError>;

    /// Byte-range GET, used for archived WARC records.
    async fn get_range(&self, url: &str, range: &str) -> Result<FetchResponse, DiscoverError> {
        self.get(url, &[("Range".to_string(), range.to_string())])
            .await
    }
}

/// Pooled reqwest-backed fetcher.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<FetchResponse, DiscoverError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        into_fetch_response(response).await
    }

    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: serde_json::Value,
    ) -> Result<FetchResponse, DiscoverError> {
        let mut request = self.client.post(url).json(&body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        into_fetch_response(response).await
    }
}

async fn into_fetch_response(response: reqwest::Response) -> Result<FetchResponse, DiscoverError> {
    let status = response.status().as_u16();
    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str().to_lowercase(), v.to_string());
        }
    }
    let body = response.bytes().await?.to_vec();
    Ok(FetchResponse {
        status,
        headers,
        body,
    })
}

/// GET wrapped with the per-source rate-limit cycle: acquire before the
/// request, report the outcome after so the bucket can adapt.
pub async fn rate_limited_get(
    fetcher: &dyn Fetcher,
    limiter: &RateLimiter,
    source: &str,
    url: &str,
    headers: &[(String, String)],
) -> Result<FetchResponse, DiscoverError> {
    limiter.acquire(source).await;
    let result = fetcher.get(url, headers).await;

    if let Ok(response) = &result {
        let has_retry_after = response.header("retry-after").is_some();
        match response.status {
            // 202 is the archive indexes shedding load.
            202 | 429 | 503 => limiter.report_rate_limit(source, response.status).await,
            403 => {
                limiter.report_forbidden(source, url, has_retry_after).await;
            }
            status if status >= 500 => limiter.report_server_error(source).await,
            status if (200..400).contains(&status) => limiter.report_success(source).await,
            _ => {}
        }
    }

    result
}
