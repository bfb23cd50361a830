//! Parallel fan-out runtime.
//!
//! Dispatches source adapters (domain mapping) or leaf queries (recall
//! search) across bounded workers, funnels everything through the shared
//! dedup, and streams unique records to the caller as they arrive. Output
//! order is arrival order; exactly-once per URL is the only ordering
//! guarantee. One task's failure never terminates the plan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RecallOptions;
use crate::dedup::Dedup;
use crate::excluder::IterativeExcluder;
use crate::models::{SearchHit, SourceStats, Summary, UrlRecord};
use crate::planner::QueryPlan;
use crate::retry::polite_delay;
use crate::sources::engines::{profile_for, run_leaf};
use crate::sources::{RecordSink, SourceAdapter, SourceContext};

/// Channel depth between producers and the dedup consumer.
const CHANNEL_DEPTH: usize = 256;

/// Per-run counters behind the completion summary.
#[derive(Default)]
pub(crate) struct RunCounters {
    pub found: HashMap<String, usize>,
    pub unique: HashMap<String, usize>,
    pub total: usize,
}

impl RunCounters {
    pub fn record_found(&mut self, source: &str) {
        *self.found.entry(source.to_string()).or_default() += 1;
    }

    pub fn record_unique(&mut self, source: &str) {
        *self.unique.entry(source.to_string()).or_default() += 1;
        self.total += 1;
    }
}

fn build_summary(
    ctx: &SourceContext,
    counters: &RunCounters,
    source_ids: &[String],
) -> Summary {
    let per_source = source_ids
        .iter()
        .map(|id| SourceStats {
            source: id.clone(),
            found: counters.found.get(id).copied().unwrap_or(0),
            unique: counters.unique.get(id).copied().unwrap_or(0),
            errors: ctx.errors.count_for(id),
        })
        .collect();

    Summary {
        total: counters.total,
        per_source,
        errors: ctx.errors.messages(),
        elapsed_ms: ctx.log.elapsed_ms(),
        logs: ctx.log.entries(),
    }
}

/// Run a set of source adapters against a target, streaming unique
/// records. Returns the record receiver and a handle resolving to the
/// completion summary.
///
/// `caller_cancel` is the caller's token; `ctx.cancel` must be a child of
/// it so an internal budget stop is distinguishable from a caller abort.
pub fn execute_map(
    sources: Vec<Arc<dyn SourceAdapter>>,
    target: String,
    ctx: Arc<SourceContext>,
    caller_cancel: CancellationToken,
    dedup: Arc<Dedup>,
) -> (mpsc::Receiver<UrlRecord>, JoinHandle<Summary>) {
    let (raw_tx, mut raw_rx) = mpsc::channel::<UrlRecord>(CHANNEL_DEPTH);
    let (out_tx, out_rx) = mpsc::channel::<UrlRecord>(CHANNEL_DEPTH);

    let source_ids: Vec<String> = sources.iter().map(|s| s.id().to_string()).collect();
    let limit = ctx.options.limit;

    let handle = tokio::spawn(async move {
        let mut workers = JoinSet::new();

        for source in sources {
            let sink = RecordSink::new(raw_tx.clone());
            let ctx = ctx.clone();
            let caller_cancel = caller_cancel.clone();
            let target = target.clone();

            workers.spawn(async move {
                let id = source.id().to_string();
                let deadline = source.deadline();
                let work = source.discover(&target, &ctx, &sink);

                tokio::select! {
                    biased;
                    _ = caller_cancel.cancelled() => {
                        ctx.errors.record(&id, "cancelled while in flight");
                    }
                    outcome = tokio::time::timeout(deadline, work) => {
                        if outcome.is_err() {
                            ctx.errors.record(
                                &id,
                                format!("timed out after {}s", deadline.as_secs()),
                            );
                            ctx.log.log(&id, "Timed out", 0);
                        }
                    }
                }
            });
        }
        // Workers hold the only clones now; the channel closes when the
        // last one finishes.
        drop(raw_tx);

        let mut counters = RunCounters::default();
        while let Some(record) = raw_rx.recv().await {
            let source = record.source.clone();
            counters.record_found(&source);

            if let Some(record) = dedup.add_url_record(record).await {
                counters.record_unique(&source);
                if out_tx.send(record).await.is_err() {
                    // Caller dropped the stream; stop the workers.
                    ctx.cancel.cancel();
                    break;
                }
                if limit > 0 && counters.total >= limit {
                    ctx.log.log("fanout", "Result limit reached", counters.total);
                    ctx.cancel.cancel();
                    break;
                }
            }
        }
        drop(raw_rx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                debug!("worker task failed: {e}");
            }
        }

        build_summary(&ctx, &counters, &source_ids)
    });

    (out_rx, handle)
}

/// Execute a recall plan: bounded parallel leaf queries with polite
/// jittered delays, then the iterative exclusion phase. Streams unique
/// hits in arrival order.
pub fn execute_recall(
    plan: QueryPlan,
    phrase: String,
    options: RecallOptions,
    ctx: Arc<SourceContext>,
    caller_cancel: CancellationToken,
    dedup: Arc<Dedup>,
) -> (mpsc::Receiver<SearchHit>, JoinHandle<Summary>) {
    let (raw_tx, mut raw_rx) = mpsc::channel::<SearchHit>(CHANNEL_DEPTH);
    let (out_tx, out_rx) = mpsc::channel::<SearchHit>(CHANNEL_DEPTH);

    let handle = tokio::spawn(async move {
        let engine = options.engine.clone();
        let source_ids = vec![engine.clone()];
        let mut counters = RunCounters::default();

        let Some(serp) = ctx.caps.serp.clone() else {
            ctx.errors.record(&engine, "no SERP capability configured");
            return build_summary(&ctx, &counters, &source_ids);
        };
        let Some(profile) = profile_for(&engine) else {
            ctx.errors.record(&engine, "unknown engine");
            return build_summary(&ctx, &counters, &source_ids);
        };

        ctx.log.log(
            &engine,
            format!("Prepared {} query permutations", plan.len()),
            plan.len(),
        );

        // Phase 1: the main sweep under a per-engine worker pool.
        let pool = Arc::new(Semaphore::new(20));
        let polite_base = Duration::from_millis(options.polite_delay_ms.max(1));
        let mut workers = JoinSet::new();

        for leaf in plan.leaves {
            let pool = pool.clone();
            let serp = serp.clone();
            let ctx = ctx.clone();
            let raw_tx = raw_tx.clone();
            let max_results = options.max_results_per_query;

            workers.spawn(async move {
                let Ok(_permit) = pool.acquire().await else {
                    return;
                };
                if ctx.cancel.is_cancelled() {
                    return;
                }
                polite_delay(polite_base, &ctx.cancel).await;

                let tag = leaf.tag.clone();
                let serp_ref = serp.clone();
                let leaf_ref = leaf.clone();
                let result = ctx
                    .retry
                    .run(&ctx.cancel, move || {
                        let serp = serp_ref.clone();
                        let leaf = leaf_ref.clone();
                        async move { run_leaf(serp.as_ref(), profile, &leaf, max_results).await }
                    })
                    .await;

                match result {
                    Ok(hits) => {
                        debug!("[{}] Found {} results", tag, hits.len());
                        for hit in hits {
                            if raw_tx.send(hit).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(crate::error::DiscoverError::Cancelled) => {}
                    Err(e) => {
                        ctx.errors.record(profile.code, format!("[{tag}] {e}"));
                    }
                }
            });
        }
        drop(raw_tx);

        let interrupted = loop {
            tokio::select! {
                biased;
                _ = caller_cancel.cancelled() => break true,
                received = raw_rx.recv() => {
                    let Some(hit) = received else { break false };
                    counters.record_found(&hit.engine);
                    let source = hit.engine.clone();
                    if let Some(hit) = dedup.add_search_hit(hit).await {
                        counters.record_unique(&source);
                        if out_tx.send(hit).await.is_err() {
                            ctx.cancel.cancel();
                            break true;
                        }
                    }
                }
            }
        };
        drop(raw_rx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                debug!("recall worker failed: {e}");
            }
        }

        ctx.log.log(
            &engine,
            format!("Main sweep finished with {} unique URLs", counters.total),
            counters.total,
        );

        // Phase 2: iterative exclusion, skipped on cancellation.
        if !interrupted && !ctx.cancel.is_cancelled() {
            let excluder = IterativeExcluder::new(
                phrase,
                profile,
                options.exception_search_iterations,
                options.max_results_per_query,
            );
            excluder
                .run(serp.as_ref(), &ctx, &dedup, &out_tx, &mut counters)
                .await;
        }

        build_summary(&ctx, &counters, &source_ids)
    });

    (out_rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::config::{DiscoverOptions, SessionConfig};
    use crate::fetch::{FetchResponse, Fetcher};
    use crate::logstream::LogStream;
    use crate::rate_limit::RateLimiter;
    use crate::retry::RetryPolicy;
    use crate::sources::ErrorSink;
    use async_trait::async_trait;

    struct NullFetcher;

    #[async_trait]
    impl Fetcher for NullFetcher {
        async fn get(
            &self,
            _url: &str,
            _headers: &[(String, String)],
        ) -> Result<FetchResponse, crate::error::DiscoverError> {
            Ok(FetchResponse {
                status: 404,
                headers: HashMap::new(),
                body: Vec::new(),
            })
        }

        async fn post_json(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _body: serde_json::Value,
        ) -> Result<FetchResponse, crate::error::DiscoverError> {
            Ok(FetchResponse {
                status: 404,
                headers: HashMap::new(),
                body: Vec::new(),
            })
        }
    }

    fn test_ctx_with(cancel: CancellationToken, options: DiscoverOptions) -> Arc<SourceContext> {
        Arc::new(SourceContext {
            caps: Capabilities::new(Arc::new(NullFetcher)),
            config: SessionConfig::default(),
            limiter: RateLimiter::new(),
            retry: RetryPolicy::new(0, Duration::from_millis(1)),
            log: Arc::new(LogStream::new()),
            errors: Arc::new(ErrorSink::default()),
            cancel,
            options,
        })
    }

    fn test_ctx(cancel: CancellationToken) -> Arc<SourceContext> {
        test_ctx_with(cancel, DiscoverOptions::default())
    }

    struct StaticSource {
        id: &'static str,
        urls: Vec<&'static str>,
    }

    #[async_trait]
    impl SourceAdapter for StaticSource {
        fn id(&self) -> &str {
            self.id
        }

        async fn discover(&self, target: &str, _ctx: &SourceContext, sink: &RecordSink) {
            for url in &self.urls {
                sink.send(UrlRecord::new(*url, target, self.id)).await;
            }
        }
    }

    struct HangingSource;

    #[async_trait]
    impl SourceAdapter for HangingSource {
        fn id(&self) -> &str {
            "hang"
        }

        fn deadline(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn discover(&self, _target: &str, _ctx: &SourceContext, _sink: &RecordSink) {
            tokio::time::sleep(Duration::from_secs(300)).await;
        }
    }

    #[tokio::test]
    async fn map_run_dedups_across_sources() {
        let caller = CancellationToken::new();
        let ctx = test_ctx(caller.child_token());
        let dedup = Arc::new(Dedup::new());

        let sources: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(StaticSource {
                id: "a",
                urls: vec!["https://e.org/1", "https://e.org/2"],
            }),
            Arc::new(StaticSource {
                id: "b",
                urls: vec!["https://e.org/2", "https://e.org/3"],
            }),
        ];

        let (mut rx, handle) =
            execute_map(sources, "e.org".to_string(), ctx, caller, dedup);

        let mut urls = Vec::new();
        while let Some(record) = rx.recv().await {
            urls.push(record.url);
        }
        let summary = handle.await.unwrap();

        assert_eq!(urls.len(), 3);
        assert_eq!(summary.total, 3);
        let a = summary.per_source.iter().find(|s| s.source == "a").unwrap();
        let b = summary.per_source.iter().find(|s| s.source == "b").unwrap();
        assert_eq!(a.found, 2);
        assert_eq!(a.unique, 2);
        assert_eq!(b.found, 2);
        assert_eq!(b.unique, 1);
    }

    #[tokio::test]
    async fn cancellation_reports_in_flight_sources() {
        let caller = CancellationToken::new();
        let ctx = test_ctx(caller.child_token());
        let dedup = Arc::new(Dedup::new());

        let sources: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(StaticSource {
                id: "quick",
                urls: vec!["https://e.org/1"],
            }),
            Arc::new(HangingSource),
        ];

        let (mut rx, handle) = execute_map(
            sources,
            "e.org".to_string(),
            ctx,
            caller.clone(),
            dedup,
        );

        // Let the quick source finish, then abort.
        let first = rx.recv().await;
        assert!(first.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        caller.cancel();

        while rx.recv().await.is_some() {}
        let summary = handle.await.unwrap();

        assert_eq!(summary.total, 1);
        let hang = summary
            .per_source
            .iter()
            .find(|s| s.source == "hang")
            .unwrap();
        assert_eq!(hang.errors, 1);
        let quick = summary
            .per_source
            .iter()
            .find(|s| s.source == "quick")
            .unwrap();
        assert_eq!(quick.errors, 0);
    }

    #[tokio::test]
    async fn deadline_counts_as_error_not_failure() {
        struct SlowSource;

        #[async_trait]
        impl SourceAdapter for SlowSource {
            fn id(&self) -> &str {
                "slow"
            }

            fn deadline(&self) -> Duration {
                Duration::from_millis(20)
            }

            async fn discover(&self, _t: &str, _ctx: &SourceContext, _sink: &RecordSink) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }

        let caller = CancellationToken::new();
        let ctx = test_ctx(caller.child_token());
        let dedup = Arc::new(Dedup::new());

        let sources: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(SlowSource),
            Arc::new(StaticSource {
                id: "ok",
                urls: vec!["https://e.org/1"],
            }),
        ];

        let (mut rx, handle) = execute_map(sources, "e.org".to_string(), ctx, caller, dedup);
        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        let summary = handle.await.unwrap();

        assert_eq!(count, 1);
        let slow = summary.per_source.iter().find(|s| s.source == "slow").unwrap();
        assert_eq!(slow.errors, 1);
        assert!(summary.errors.iter().any(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn limit_stops_the_run_cleanly() {
        let caller = CancellationToken::new();
        let options = DiscoverOptions {
            limit: 2,
            ..Default::default()
        };
        let ctx = test_ctx_with(caller.child_token(), options);
        let dedup = Arc::new(Dedup::new());

        let sources: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(StaticSource {
            id: "many",
            urls: vec![
                "https://e.org/1",
                "https://e.org/2",
                "https://e.org/3",
                "https://e.org/4",
            ],
        })];

        let (mut rx, handle) = execute_map(sources, "e.org".to_string(), ctx, caller, dedup);
        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        let summary = handle.await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(summary.total, 2);
    }
}
