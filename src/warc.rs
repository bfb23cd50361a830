//! Byte-range fetches into archived WARC corpora.
//!
//! A [`PageRef`] addresses one record inside a WARC file; the exact bytes
//! come back from a Range request as a gzip member. The record splits into
//! WARC envelope headers, HTTP response headers, and the payload, each
//! delimited by `\r\n\r\n`.

use std::io::Read;

use flate2::read::MultiGzDecoder;
use tokio_util::sync::CancellationToken;
use warc::{WarcHeader, WarcReader};

use crate::error::DiscoverError;
use crate::fetch::{rate_limited_get, Fetcher};
use crate::models::PageRef;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

/// A WARC record split into its HTTP parts.
#[derive(Debug, Clone)]
pub struct RecordPayload {
    /// Raw HTTP response headers, when present.
    pub http_headers: Option<String>,
    /// Response body bytes (HTML, PDF, WAT JSON, ...).
    pub body: Vec<u8>,
}

impl RecordPayload {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// Inflate gzip members when the container signals so; pass other bytes
/// through untouched.
pub fn inflate_if_gzip(raw: &[u8]) -> Vec<u8> {
    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = MultiGzDecoder::new(raw);
        let mut inflated = Vec::new();
        if decoder.read_to_end(&mut inflated).is_ok() && !inflated.is_empty() {
            return inflated;
        }
    }
    raw.to_vec()
}

fn find_separator(bytes: &[u8], from: usize) -> Option<usize> {
    bytes[from..]
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + from)
}

/// Split an inflated WARC record into HTTP headers and payload.
///
/// Tries the record parser first; byte-range responses that arrive
/// slightly misaligned fall back to splitting on the `\r\n\r\n`
/// boundaries directly.
pub fn split_record(inflated: &[u8]) -> RecordPayload {
    let reader = WarcReader::new(inflated);
    for record in reader.iter_records() {
        let Ok(record) = record else {
            break;
        };
        // Range fetches land on response or metadata records; skip the
        // request/warcinfo records that sometimes precede them.
        let warc_type = record.header(WarcHeader::WarcType);
        if matches!(warc_type.as_deref(), Some("request") | Some("warcinfo")) {
            continue;
        }
        let body = record.body();
        if body.is_empty() {
            continue;
        }
        // The record body of a response is HTTP headers + payload.
        if let Some(separator) = find_separator(body, 0) {
            let headers = String::from_utf8_lossy(&body[..separator]).to_string();
            if headers.starts_with("HTTP/") {
                return RecordPayload {
                    http_headers: Some(headers),
                    body: body[separator + 4..].to_vec(),
                };
            }
        }
        return RecordPayload {
            http_headers: None,
            body: body.to_vec(),
        };
    }

    // Manual fallback: WARC headers, HTTP headers, payload. Records end
    // with a double CRLF which is not part of the payload.
    let trim_tail = |bytes: &[u8]| {
        let mut end = bytes.len();
        while end >= 2 && &bytes[end - 2..end] == b"\r\n" {
            end -= 2;
        }
        bytes[..end].to_vec()
    };

    match find_separator(inflated, 0) {
        Some(first) => match find_separator(inflated, first + 4) {
            Some(second) => RecordPayload {
                http_headers: Some(
                    String::from_utf8_lossy(&inflated[first + 4..second]).to_string(),
                ),
                body: trim_tail(&inflated[second + 4..]),
            },
            None => RecordPayload {
                http_headers: None,
                body: trim_tail(&inflated[first + 4..]),
            },
        },
        None => RecordPayload {
            http_headers: None,
            body: inflated.to_vec(),
        },
    }
}

/// Range-fetch one archived record and split it.
pub async fn fetch_record(
    fetcher: &dyn Fetcher,
    limiter: &RateLimiter,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    data_base: &str,
    page: &PageRef,
) -> Result<RecordPayload, DiscoverError> {
    let url = format!("{}/{}", data_base.trim_end_matches('/'), page.filename);
    let range = page.range_header();

    let response = retry
        .run(cancel, || {
            let headers = vec![("Range".to_string(), range.clone())];
            let url = url.as_str();
            async move { rate_limited_get(fetcher, limiter, "cc.data", url, &headers).await }
        })
        .await?;

    if !matches!(response.status, 200 | 206) {
        return Err(
            DiscoverError::from_status(response.status, "archive range fetch")
                .unwrap_or_else(|| DiscoverError::Network("archive range fetch".to_string())),
        );
    }

    let inflated = inflate_if_gzip(&response.body);
    Ok(split_record(&inflated))
}

/// Links recorded in a WAT metadata record:
/// `Envelope.Payload-Metadata.HTTP-Response-Metadata.HTML-Metadata.Links`.
/// Returns `(href, anchor_text)` pairs whose href mentions the target.
pub fn wat_links_to_target(wat_body: &str, target_domain: &str) -> Vec<(String, String)> {
    let Some(json_start) = wat_body.find('{') else {
        return Vec::new();
    };
    let json_str = &wat_body[json_start..];
    let Some(json_end) = json_str.rfind('}') else {
        return Vec::new();
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&json_str[..=json_end]) else {
        return Vec::new();
    };

    let links = parsed
        .get("Envelope")
        .and_then(|v| v.get("Payload-Metadata"))
        .and_then(|v| v.get("HTTP-Response-Metadata"))
        .and_then(|v| v.get("HTML-Metadata"))
        .and_then(|v| v.get("Links"))
        .and_then(|v| v.as_array());

    let Some(links) = links else {
        return Vec::new();
    };

    let target_lower = target_domain.to_lowercase();
    let mut found = Vec::new();
    for link in links {
        let href = link
            .get("url")
            .or_else(|| link.get("href"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if href.is_empty() || !href.to_lowercase().contains(&target_lower) {
            continue;
        }
        let text = link
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .chars()
            .take(200)
            .collect::<String>();
        found.push((href.to_string(), text));
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn sample_record(html: &str) -> Vec<u8> {
        let http = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
            html.len(),
            html
        );
        format!(
            "WARC/1.0\r\nWARC-Type: response\r\nWARC-Target-URI: https://example.com/blog/post\r\nWARC-Record-ID: <urn:uuid:00000000-0000-0000-0000-000000000001>\r\nWARC-Date: 2024-01-01T00:00:00Z\r\nContent-Length: {}\r\n\r\n{}\r\n\r\n",
            http.len(),
            http
        )
        .into_bytes()
    }

    #[test]
    fn gzip_roundtrip_and_passthrough() {
        let data = b"plain bytes";
        assert_eq!(inflate_if_gzip(data), data.to_vec());

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"compressed payload").unwrap();
        let gz = encoder.finish().unwrap();
        assert_eq!(inflate_if_gzip(&gz), b"compressed payload".to_vec());
    }

    #[test]
    fn record_splits_into_headers_and_body() {
        let html = "<html><body><a href=\"https://soax.com/pricing\">Pricing</a></body></html>";
        let record = sample_record(html);

        let payload = split_record(&record);
        let headers = payload.http_headers.clone().expect("http headers present");
        assert!(headers.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(payload.body_text(), html);
    }

    #[test]
    fn malformed_record_falls_back_to_manual_split() {
        // Not a valid WARC envelope, but carries the two separators.
        let bytes =
            b"garbage-envelope\r\n\r\nHTTP/1.1 200 OK\r\nX: y\r\n\r\n<html>ok</html>".to_vec();
        let payload = split_record(&bytes);
        assert_eq!(payload.body_text(), "<html>ok</html>");
    }

    #[test]
    fn wat_link_extraction() {
        let wat = r#"WARC/1.0
WARC-Type: metadata

{"Envelope":{"Payload-Metadata":{"HTTP-Response-Metadata":{"HTML-Metadata":{"Links":[
  {"url":"https://soax.com/pricing","text":"Pricing"},
  {"href":"https://other.com/page","text":"Other"},
  {"url":"https://SOAX.com/about","text":"About"}
]}}}}}"#;

        let links = wat_links_to_target(wat, "soax.com");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], ("https://soax.com/pricing".to_string(), "Pricing".to_string()));
        assert_eq!(links[1].0, "https://SOAX.com/about");
    }

    #[test]
    fn wat_extraction_tolerates_bad_json() {
        assert!(wat_links_to_target("no json here", "x.com").is_empty());
        assert!(wat_links_to_target("{broken", "x.com").is_empty());
    }
}
