//! Iterative exclusion search.
//!
//! After the main sweep drains, re-issue the base phrase excluding every
//! domain already seen, to surface long-tail hosts the first pass crowded
//! out. Repeats until an iteration returns nothing new or the iteration
//! budget is spent.

use std::collections::HashSet;

use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::capabilities::SerpClient;
use crate::dedup::Dedup;
use crate::error::DiscoverError;
use crate::fanout::RunCounters;
use crate::models::SearchHit;
use crate::sources::engines::EngineProfile;
use crate::sources::SourceContext;

/// Domains excluded per query, kept under engine query-length limits.
const MAX_DOMAINS_PER_QUERY: usize = 20;

pub struct IterativeExcluder {
    phrase: String,
    profile: &'static EngineProfile,
    max_iterations: u32,
    max_results_per_query: usize,
}

impl IterativeExcluder {
    pub fn new(
        phrase: String,
        profile: &'static EngineProfile,
        max_iterations: u32,
        max_results_per_query: usize,
    ) -> Self {
        Self {
            phrase,
            profile,
            max_iterations,
            max_results_per_query,
        }
    }

    /// Build the exclusion query for one chunk of domains.
    fn exclusion_query(&self, domains: &[String]) -> Option<String> {
        let mut query = format!("\"{}\"", self.phrase);
        for domain in domains {
            let clause = self.profile.exclusion_clause(domain)?;
            query.push(' ');
            query.push_str(&clause);
        }
        Some(query)
    }

    /// Run up to `max_iterations` exclusion passes, streaming new hits
    /// into `out` tagged as exception results.
    pub async fn run(
        &self,
        serp: &dyn SerpClient,
        ctx: &SourceContext,
        dedup: &Dedup,
        out: &mpsc::Sender<SearchHit>,
        counters: &mut RunCounters,
    ) {
        let engine = self.profile.code;

        if !self.profile.supports_minus && !self.profile.supports_not {
            ctx.log.log(
                engine,
                "Engine has no exclusion syntax - skipping exception search",
                0,
            );
            return;
        }

        for pass in 1..=self.max_iterations {
            // The main sweep counts as iteration 1; the first exclusion
            // pass reports as iteration 2.
            let iteration = pass + 1;
            if ctx.cancel.is_cancelled() {
                return;
            }

            // Snapshot at planning time: hits arriving after this moment
            // count toward the next iteration's exclusion set.
            let excluded: HashSet<String> = dedup.domain_snapshot().await;
            if excluded.is_empty() {
                ctx.log.log(engine, "No previous results to exclude", 0);
                return;
            }

            let mut domains: Vec<String> = excluded.iter().cloned().collect();
            domains.sort();
            ctx.log.log(
                engine,
                format!(
                    "Exception search iteration {iteration}: excluding {} domains",
                    domains.len()
                ),
                0,
            );

            let mut new_hits = 0usize;
            for (chunk_idx, chunk) in domains.chunks(MAX_DOMAINS_PER_QUERY).enumerate() {
                if ctx.cancel.is_cancelled() {
                    return;
                }
                let Some(query) = self.exclusion_query(chunk) else {
                    return;
                };
                debug!(
                    "Exception query chunk {}: excluding {} domains",
                    chunk_idx + 1,
                    chunk.len()
                );

                let results = match serp
                    .search(engine, &query, None, self.max_results_per_query)
                    .await
                {
                    Ok(results) => results,
                    Err(DiscoverError::Cancelled) => return,
                    Err(e) => {
                        ctx.errors.record(engine, format!("exception search: {e}"));
                        continue;
                    }
                };

                for result in results {
                    // Engines do not reliably honor the operator; drop
                    // anything from an excluded domain.
                    let Some(host) = host_of(&result.url) else {
                        continue;
                    };
                    if excluded.contains(&host) {
                        debug!("Filtered out result from excluded domain: {host}");
                        continue;
                    }

                    let hit = SearchHit::new(result.url, engine, self.profile.badge)
                        .with_metadata(result.title, result.snippet)
                        .with_query(query.clone(), format!("EX{iteration}-C{}", chunk_idx + 1))
                        .as_exception(iteration);

                    counters.record_found(engine);
                    if let Some(hit) = dedup.add_search_hit(hit).await {
                        counters.record_unique(engine);
                        new_hits += 1;
                        if out.send(hit).await.is_err() {
                            return;
                        }
                    }
                }
            }

            if new_hits == 0 {
                ctx.log.log(
                    engine,
                    format!("Exception search iteration {iteration}: no new results, stopping"),
                    0,
                );
                return;
            }
            ctx.log.log(
                engine,
                format!("Exception search iteration {iteration}: found new results"),
                new_hits,
            );
        }
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{Capabilities, SerpResult};
    use crate::config::{DiscoverOptions, SessionConfig};
    use crate::fetch::{FetchResponse, Fetcher};
    use crate::logstream::LogStream;
    use crate::models::UrlRecord;
    use crate::rate_limit::RateLimiter;
    use crate::retry::RetryPolicy;
    use crate::sources::engines::profile_for;
    use crate::sources::ErrorSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct NullFetcher;

    #[async_trait]
    impl Fetcher for NullFetcher {
        async fn get(
            &self,
            _url: &str,
            _headers: &[(String, String)],
        ) -> Result<FetchResponse, DiscoverError> {
            Ok(FetchResponse {
                status: 404,
                headers: Default::default(),
                body: Vec::new(),
            })
        }

        async fn post_json(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _body: serde_json::Value,
        ) -> Result<FetchResponse, DiscoverError> {
            Ok(FetchResponse {
                status: 404,
                headers: Default::default(),
                body: Vec::new(),
            })
        }
    }

    /// First exclusion call returns d.gov, later calls return nothing.
    struct OneShotSerp {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SerpClient for OneShotSerp {
        async fn search(
            &self,
            _engine: &str,
            query: &str,
            _market: Option<&str>,
            _num: usize,
        ) -> Result<Vec<SerpResult>, DiscoverError> {
            assert!(query.contains("-site:"));
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(vec![
                    SerpResult {
                        url: "https://d.gov/new".to_string(),
                        title: Some("new".to_string()),
                        snippet: None,
                        date: None,
                    },
                    // From an excluded domain - must be post-filtered.
                    SerpResult {
                        url: "https://a.gov/old".to_string(),
                        title: None,
                        snippet: None,
                        date: None,
                    },
                ])
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn ctx() -> SourceContext {
        SourceContext {
            caps: Capabilities::new(Arc::new(NullFetcher)),
            config: SessionConfig::default(),
            limiter: RateLimiter::new(),
            retry: RetryPolicy::new(0, std::time::Duration::from_millis(1)),
            log: Arc::new(LogStream::new()),
            errors: Arc::new(ErrorSink::default()),
            cancel: CancellationToken::new(),
            options: DiscoverOptions::default(),
        }
    }

    #[tokio::test]
    async fn exception_pass_tags_and_post_filters() {
        let dedup = Dedup::new();
        // Seed the dedup with main-sweep results.
        for url in ["https://a.gov/1", "https://b.gov/2", "https://c.gov/3"] {
            dedup
                .add_url_record(UrlRecord::new(url, "gov", "bing"))
                .await;
        }

        let excluder = IterativeExcluder::new(
            "widget foo".to_string(),
            profile_for("bing").unwrap(),
            3,
            50,
        );
        let serp = OneShotSerp {
            calls: AtomicUsize::new(0),
        };
        let ctx = ctx();
        let (tx, mut rx) = mpsc::channel(16);
        let mut counters = RunCounters::default();

        excluder.run(&serp, &ctx, &dedup, &tx, &mut counters).await;
        drop(tx);

        let mut hits = Vec::new();
        while let Some(hit) = rx.recv().await {
            hits.push(hit);
        }

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://d.gov/new");
        assert_eq!(hits[0].exception_iteration, Some(2));
        assert!(hits[0].query_used.contains("-site:a.gov"));
        assert!(hits[0].query_used.contains("-site:b.gov"));
        assert!(hits[0].query_used.contains("-site:c.gov"));
    }

    #[tokio::test]
    async fn later_iterations_exclude_superset() {
        struct RecordingSerp {
            queries: std::sync::Mutex<Vec<String>>,
            calls: AtomicUsize,
        }

        #[async_trait]
        impl SerpClient for RecordingSerp {
            async fn search(
                &self,
                _engine: &str,
                query: &str,
                _market: Option<&str>,
                _num: usize,
            ) -> Result<Vec<SerpResult>, DiscoverError> {
                self.queries.lock().unwrap().push(query.to_string());
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call == 0 {
                    Ok(vec![SerpResult {
                        url: "https://d.gov/new".to_string(),
                        title: None,
                        snippet: None,
                        date: None,
                    }])
                } else {
                    Ok(Vec::new())
                }
            }
        }

        let dedup = Dedup::new();
        dedup
            .add_url_record(UrlRecord::new("https://a.gov/1", "gov", "bing"))
            .await;

        let excluder = IterativeExcluder::new(
            "widget foo".to_string(),
            profile_for("bing").unwrap(),
            3,
            50,
        );
        let serp = RecordingSerp {
            queries: std::sync::Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        };
        let ctx = ctx();
        let (tx, mut rx) = mpsc::channel(16);
        let mut counters = RunCounters::default();

        excluder.run(&serp, &ctx, &dedup, &tx, &mut counters).await;
        drop(tx);
        while rx.recv().await.is_some() {}

        let queries = serp.queries.lock().unwrap().clone();
        // The first pass excludes a.gov; the second excludes a.gov and the
        // newly admitted d.gov; the second found nothing so it stopped.
        assert_eq!(queries.len(), 2);
        assert!(queries[0].contains("-site:a.gov"));
        assert!(!queries[0].contains("d.gov"));
        assert!(queries[1].contains("-site:a.gov"));
        assert!(queries[1].contains("-site:d.gov"));
    }
}
