//! Graph-family sources: the local web-graph index, the out-of-process
//! link-extractor binary, and the paid backlink API.
//!
//! These yield pages that link *to* the target, so they only run when the
//! caller allows external URLs; the backlink pipeline drives the same
//! machinery directly through the capability traits.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{RecordSink, SourceAdapter, SourceContext, SourceTier};
use crate::error::DiscoverError;
use crate::models::{LinkProvider, LinkRecord, PageRef, UrlRecord};

/// One NDJSON line emitted by the link-extractor binary.
#[derive(Debug, Deserialize)]
struct BinaryLink {
    #[serde(default)]
    source_url: String,
    #[serde(default)]
    target_url: String,
    #[serde(default)]
    anchor_text: String,
}

/// Run the out-of-process link extractor: candidates go in through a JSON
/// temp file, verified links come back as NDJSON on stdout. Stderr carries
/// progress chatter and is ignored. The child is killed on cancellation.
pub async fn run_link_binary(
    binary_path: &str,
    target_domain: &str,
    candidates: &[PageRef],
    archive: &str,
    cancel: &CancellationToken,
) -> Result<Vec<LinkRecord>, DiscoverError> {
    let list_file = tempfile::NamedTempFile::new()
        .map_err(|e| DiscoverError::Config(format!("temp file: {e}")))?;
    serde_json::to_writer(list_file.as_file(), candidates)?;

    let list_path = list_file
        .path()
        .to_str()
        .ok_or_else(|| DiscoverError::Config("temp path not utf-8".to_string()))?
        .to_string();

    let mut child = Command::new(binary_path)
        .arg("sniper")
        .arg(format!("--target-domain={target_domain}"))
        .arg(format!("--wat-list={list_path}"))
        .arg(format!("--archive={archive}"))
        .arg("--threads=8")
        .arg("--output=stdout")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DiscoverError::Config(format!("spawn {binary_path}: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DiscoverError::Config("no stdout handle".to_string()))?;
    let mut lines = BufReader::new(stdout).lines();
    let mut records = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(DiscoverError::Cancelled);
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let Ok(parsed) = serde_json::from_str::<BinaryLink>(line) else {
                            continue;
                        };
                        if parsed.source_url.is_empty() || parsed.target_url.is_empty() {
                            continue;
                        }
                        let mut record = LinkRecord::new(
                            parsed.source_url,
                            parsed.target_url,
                            LinkProvider::CcWatOffline,
                        );
                        if !parsed.anchor_text.is_empty() {
                            record = record.with_anchor_text(parsed.anchor_text);
                        }
                        records.push(record);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("link binary stdout error: {e}");
                        break;
                    }
                }
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| DiscoverError::Network(format!("wait: {e}")))?;
    if !status.success() {
        warn!("link binary exited with {status}");
    }
    Ok(records)
}

/// Local web-graph index: hosts with edges into the target.
pub struct HostGraphSource;

impl HostGraphSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HostGraphSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for HostGraphSource {
    fn id(&self) -> &str {
        "host_graph"
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        if !ctx.options.allow_external {
            debug!("[host_graph] Skipping - referring hosts are external URLs");
            return;
        }
        let Some(graph) = &ctx.caps.graph else {
            debug!("[host_graph] Skipping - no graph capability");
            return;
        };

        let edges = match graph.incoming_edges(target, 1000, true).await {
            Ok(edges) => edges,
            Err(e) => {
                ctx.errors.record("host_graph", e.to_string());
                return;
            }
        };

        let count = edges.len();
        for edge in edges {
            if ctx.cancel.is_cancelled() {
                return;
            }
            let record =
                UrlRecord::new(format!("https://{}", edge.source_host), target, "host_graph");
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log("host_graph", "Found referring hosts", count);
    }
}

/// Out-of-process link-extractor source.
pub struct LinkBinarySource;

impl LinkBinarySource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LinkBinarySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for LinkBinarySource {
    fn id(&self) -> &str {
        "linkbin"
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Deep
    }

    fn deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(180)
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        if !ctx.options.allow_external {
            debug!("[linkbin] Skipping - referring pages are external URLs");
            return;
        }
        let Some(binary_path) = &ctx.config.link_binary_path else {
            debug!("[linkbin] Skipping - no extractor binary configured");
            return;
        };
        let Some(offline) = &ctx.caps.offline_index else {
            debug!("[linkbin] Skipping - no offline index capability");
            return;
        };

        let Some(archive) = ctx.config.archives.first().cloned() else {
            return;
        };
        let candidates = match offline.lookup_domain(target, &archive, 50).await {
            Ok(candidates) => candidates,
            Err(e) => {
                ctx.errors.record("linkbin", e.to_string());
                return;
            }
        };
        if candidates.is_empty() {
            ctx.log.log("linkbin", "No candidate pages in offline index", 0);
            return;
        }

        let links =
            match run_link_binary(binary_path, target, &candidates, &archive, &ctx.cancel).await {
                Ok(links) => links,
                Err(DiscoverError::Cancelled) => return,
                Err(e) => {
                    ctx.errors.record("linkbin", e.to_string());
                    return;
                }
            };

        let count = links.len();
        for link in links {
            let record = UrlRecord::new(link.source, target, "linkbin");
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log("linkbin", "Extracted links", count);
    }
}

/// Paid backlink API source.
pub struct MajesticSource;

impl MajesticSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MajesticSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for MajesticSource {
    fn id(&self) -> &str {
        "majestic"
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        if !ctx.options.allow_external {
            debug!("[majestic] Skipping - referring domains are external URLs");
            return;
        }
        let Some(provider) = &ctx.caps.backlink_provider else {
            debug!("[majestic] Skipping - no backlink provider capability");
            return;
        };

        let links = match provider.referring_domains(target, 1000).await {
            Ok(links) => links,
            Err(e) => {
                ctx.errors.record("majestic", e.to_string());
                return;
            }
        };

        let count = links.len();
        for link in links {
            if ctx.cancel.is_cancelled() {
                return;
            }
            let record = UrlRecord::new(format!("https://{}", link.source), target, "majestic");
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log("majestic", "Found referring domains", count);
    }
}
