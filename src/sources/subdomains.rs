//! Subdomain discovery sources.
//!
//! Four ways to enumerate hosts under a target domain: certificate
//! transparency logs, a WHOIS-style subdomain API, a multi-source
//! enumeration API, and a DNS recon service.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{RecordSink, SourceAdapter, SourceContext};
use crate::fetch::rate_limited_get;
use crate::models::UrlRecord;

fn subdomain_segment(host: &str, domain: &str) -> Option<String> {
    if host == domain {
        None
    } else {
        host.strip_suffix(&format!(".{domain}")).map(|s| s.to_string())
    }
}

fn host_in_scope(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Certificate-transparency log source (crt.sh).
pub struct CtLogSource;

#[derive(Debug, Deserialize)]
struct CtEntry {
    #[serde(default)]
    name_value: String,
}

impl CtLogSource {
    pub fn new() -> Self {
        Self
    }

    /// Unique in-scope hosts from a CT response.
    fn extract_hosts(entries: &[CtEntry], domain: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut hosts = Vec::new();
        for entry in entries {
            for line in entry.name_value.split('\n') {
                let host = line.trim().to_lowercase();
                if host.is_empty() || host.contains('*') {
                    continue;
                }
                if !host_in_scope(&host, domain) {
                    continue;
                }
                if seen.insert(host.clone()) {
                    hosts.push(host);
                }
            }
        }
        hosts
    }
}

impl Default for CtLogSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for CtLogSource {
    fn id(&self) -> &str {
        "crt.sh"
    }

    fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(60)
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let url = format!(
            "https://crt.sh/?q={}&output=json",
            urlencoding::encode(&format!("%.{target}"))
        );
        debug!("[crt.sh] Searching for subdomains of: {}", target);

        let fetcher = ctx.caps.fetcher.clone();
        let limiter = ctx.limiter.clone();
        let response = ctx
            .retry
            .run(&ctx.cancel, || {
                rate_limited_get(fetcher.as_ref(), &limiter, "crt.sh", &url, &[])
            })
            .await;

        let response = match response {
            Ok(r) if r.is_success() => r,
            Ok(r) => {
                ctx.errors.record("crt.sh", format!("HTTP {}", r.status));
                ctx.log.log("crt.sh", format!("HTTP {}", r.status), 0);
                return;
            }
            Err(e) => {
                ctx.errors.record("crt.sh", e.to_string());
                ctx.log.log("crt.sh", format!("Failed: {e}"), 0);
                return;
            }
        };

        // crt.sh answers non-JSON when it has nothing for the pattern.
        let entries: Vec<CtEntry> = match response.json() {
            Ok(entries) => entries,
            Err(_) => {
                ctx.log.log("crt.sh", "No results (non-JSON response)", 0);
                return;
            }
        };

        let hosts = Self::extract_hosts(&entries, target);
        let count = hosts.len();
        for host in hosts {
            if ctx.cancel.is_cancelled() {
                return;
            }
            let record = UrlRecord::new(format!("https://{host}"), target, "crt.sh")
                .with_subdomain(subdomain_segment(&host, target));
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log("crt.sh", "Found subdomains", count);
    }
}

/// WHOIS-style subdomain lookup API. Skips itself when no API key is
/// configured.
pub struct WhoisSubdomainSource {
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhoisSubdomainsResponse {
    #[serde(default)]
    result: WhoisSubdomainsResult,
}

#[derive(Debug, Default, Deserialize)]
struct WhoisSubdomainsResult {
    #[serde(default)]
    records: Vec<WhoisSubdomainRecord>,
}

#[derive(Debug, Deserialize)]
struct WhoisSubdomainRecord {
    #[serde(default)]
    domain: String,
}

impl WhoisSubdomainSource {
    pub fn new() -> Self {
        Self { api_key: None }
    }

    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
        }
    }
}

impl Default for WhoisSubdomainSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for WhoisSubdomainSource {
    fn id(&self) -> &str {
        "whoisxml"
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let Some(api_key) = &self.api_key else {
            debug!("[whoisxml] Skipping - no API key");
            return;
        };

        let url = format!(
            "https://subdomains.whoisxmlapi.com/api/v1?apiKey={}&domainName={}",
            urlencoding::encode(api_key),
            urlencoding::encode(target)
        );

        let fetcher = ctx.caps.fetcher.clone();
        let limiter = ctx.limiter.clone();
        let response = ctx
            .retry
            .run(&ctx.cancel, || {
                rate_limited_get(fetcher.as_ref(), &limiter, "whoisxml", &url, &[])
            })
            .await;

        let response = match response {
            Ok(r) if r.status == 403 => {
                ctx.errors
                    .record("whoisxml", "API key invalid or quota exceeded");
                ctx.log.log("whoisxml", "API key invalid or quota exceeded", 0);
                return;
            }
            Ok(r) if r.is_success() => r,
            Ok(r) => {
                ctx.errors.record("whoisxml", format!("HTTP {}", r.status));
                return;
            }
            Err(e) => {
                ctx.errors.record("whoisxml", e.to_string());
                return;
            }
        };

        let parsed: WhoisSubdomainsResponse = match response.json() {
            Ok(parsed) => parsed,
            Err(e) => {
                ctx.errors.record("whoisxml", e.to_string());
                return;
            }
        };

        let mut count = 0;
        for record in parsed.result.records {
            let host = record.domain.to_lowercase();
            if host.is_empty() || !host_in_scope(&host, target) {
                continue;
            }
            count += 1;
            let url_record = UrlRecord::new(format!("https://{host}"), target, "whoisxml")
                .with_subdomain(subdomain_segment(&host, target));
            if !sink.send(url_record).await {
                return;
            }
        }
        ctx.log.log("whoisxml", "Found subdomains", count);
    }
}

/// Multi-source enumeration API (host search). Free, no key required;
/// answers CSV lines of `host,ip`.
pub struct SubEnumSource;

impl SubEnumSource {
    pub fn new() -> Self {
        Self
    }

    fn parse_hosts(body: &str, domain: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut hosts = Vec::new();
        for line in body.lines() {
            let host = line.split(',').next().unwrap_or("").trim().to_lowercase();
            if host.is_empty() || !host_in_scope(&host, domain) {
                continue;
            }
            if seen.insert(host.clone()) {
                hosts.push(host);
            }
        }
        hosts
    }
}

impl Default for SubEnumSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for SubEnumSource {
    fn id(&self) -> &str {
        "subenum"
    }

    fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(120)
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let url = format!(
            "https://api.hackertarget.com/hostsearch/?q={}",
            urlencoding::encode(target)
        );

        let fetcher = ctx.caps.fetcher.clone();
        let limiter = ctx.limiter.clone();
        let response = ctx
            .retry
            .run(&ctx.cancel, || {
                rate_limited_get(fetcher.as_ref(), &limiter, "subenum", &url, &[])
            })
            .await;

        let body = match response {
            Ok(r) if r.is_success() => r.text(),
            Ok(r) => {
                ctx.errors.record("subenum", format!("HTTP {}", r.status));
                return;
            }
            Err(e) => {
                ctx.errors.record("subenum", e.to_string());
                return;
            }
        };

        // The service reports quota errors as a plain-text body.
        if body.starts_with("error") || body.contains("API count exceeded") {
            ctx.errors.record("subenum", body.lines().next().unwrap_or("error").to_string());
            return;
        }

        let hosts = Self::parse_hosts(&body, target);
        let count = hosts.len();
        for host in hosts {
            if ctx.cancel.is_cancelled() {
                return;
            }
            let record = UrlRecord::new(format!("https://{host}"), target, "subenum")
                .with_subdomain(subdomain_segment(&host, target));
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log("subenum", "Found subdomains", count);
    }
}

/// DNS recon service. Needs an API token; skips itself without one.
pub struct DnsReconSource {
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DnsReconResponse {
    #[serde(default)]
    a: Vec<DnsReconHost>,
    #[serde(default)]
    cname: Vec<DnsReconHost>,
}

#[derive(Debug, Deserialize)]
struct DnsReconHost {
    #[serde(default)]
    host: String,
}

impl DnsReconSource {
    pub fn new() -> Self {
        Self { api_key: None }
    }

    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
        }
    }
}

impl Default for DnsReconSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for DnsReconSource {
    fn id(&self) -> &str {
        "dnsrecon"
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let Some(api_key) = &self.api_key else {
            debug!("[dnsrecon] Skipping - no API token");
            return;
        };

        let url = format!(
            "https://api.dnsdumpster.com/domain/{}",
            urlencoding::encode(target)
        );
        let headers = vec![("X-API-Key".to_string(), api_key.clone())];

        let fetcher = ctx.caps.fetcher.clone();
        let limiter = ctx.limiter.clone();
        let response = ctx
            .retry
            .run(&ctx.cancel, || {
                rate_limited_get(fetcher.as_ref(), &limiter, "dnsrecon", &url, &headers)
            })
            .await;

        let parsed: DnsReconResponse = match response {
            Ok(r) if r.is_success() => match r.json() {
                Ok(parsed) => parsed,
                Err(e) => {
                    ctx.errors.record("dnsrecon", e.to_string());
                    return;
                }
            },
            Ok(r) => {
                ctx.errors.record("dnsrecon", format!("HTTP {}", r.status));
                return;
            }
            Err(e) => {
                ctx.errors.record("dnsrecon", e.to_string());
                return;
            }
        };

        let mut seen = HashSet::new();
        let mut count = 0;
        for entry in parsed.a.iter().chain(parsed.cname.iter()) {
            let host = entry.host.to_lowercase();
            if host.is_empty() || !host_in_scope(&host, target) || !seen.insert(host.clone()) {
                continue;
            }
            count += 1;
            let record = UrlRecord::new(format!("https://{host}"), target, "dnsrecon")
                .with_subdomain(subdomain_segment(&host, target));
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log("dnsrecon", "Found hosts", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ct_extraction_filters_wildcards_and_scope() {
        let entries = vec![
            CtEntry {
                name_value: "www.example.org\n*.example.org\napi.example.org".to_string(),
            },
            CtEntry {
                name_value: "example.org\nother.com".to_string(),
            },
            CtEntry {
                name_value: "www.example.org".to_string(),
            },
        ];

        let hosts = CtLogSource::extract_hosts(&entries, "example.org");
        assert_eq!(hosts, vec!["www.example.org", "api.example.org", "example.org"]);
    }

    #[test]
    fn subdomain_segment_strips_suffix() {
        assert_eq!(
            subdomain_segment("api.example.org", "example.org"),
            Some("api".to_string())
        );
        assert_eq!(subdomain_segment("example.org", "example.org"), None);
    }

    #[test]
    fn host_search_csv_parsing() {
        let body = "www.example.org,93.184.216.34\nmail.example.org,93.184.216.35\nbad.other.com,1.2.3.4\n";
        let hosts = SubEnumSource::parse_hosts(body, "example.org");
        assert_eq!(hosts, vec!["www.example.org", "mail.example.org"]);
    }
}
