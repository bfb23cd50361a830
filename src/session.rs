//! Session API: the four discovery entry points.
//!
//! A session owns the injected capabilities, the per-process rate-limit
//! buckets, and the source registry. Every call gets its own log stream,
//! dedup set, and cancellation scope; nothing persists between sessions
//! beyond the rate-limit buckets.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::backlinks::BacklinkCore;
use crate::capabilities::Capabilities;
use crate::config::{
    validate_target, BacklinkOptions, DiscoverOptions, FiletypeOptions, Mode, RecallOptions,
    SessionConfig,
};
use crate::dedup::{Dedup, TimeSlice};
use crate::error::DiscoverError;
use crate::fanout::{execute_map, execute_recall};
use crate::filetype::FiletypeCascade;
use crate::logstream::LogStream;
use crate::models::{BacklinkResponse, FiletypeResponse, SearchHit, Summary, UrlRecord};
use crate::planner::QueryPlanner;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::sources::{normalize_target, ErrorSink, SourceAdapter, SourceContext, SourceRegistry};

/// A discovery session over a fixed set of capabilities.
pub struct Session {
    caps: Capabilities,
    config: SessionConfig,
    limiter: RateLimiter,
    registry: SourceRegistry,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(caps: Capabilities) -> Self {
        Self::with_config(caps, SessionConfig::default())
    }

    pub fn with_config(caps: Capabilities, config: SessionConfig) -> Self {
        Self {
            caps,
            config,
            limiter: RateLimiter::new(),
            registry: SourceRegistry::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a custom source for domain mapping.
    pub fn register_source(&mut self, source: Arc<dyn SourceAdapter>) {
        self.registry.register(source);
    }

    /// Source ids known to this session.
    pub fn sources(&self) -> Vec<&str> {
        self.registry.list()
    }

    /// Token cancelling every in-flight call of this session.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort all in-flight work.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Build the per-call context. The caller token scopes one call under
    /// the session token; the work token below it lets internal budget
    /// stops stay distinguishable from caller aborts.
    fn call_context(
        &self,
        options: DiscoverOptions,
    ) -> (Arc<SourceContext>, CancellationToken) {
        let caller = self.cancel.child_token();
        let work = caller.child_token();
        let ctx = Arc::new(SourceContext {
            caps: self.caps.clone(),
            config: self.config.clone(),
            limiter: self.limiter.clone(),
            retry: RetryPolicy::default(),
            log: Arc::new(LogStream::new()),
            errors: Arc::new(ErrorSink::default()),
            cancel: work,
            options,
        });
        (ctx, caller)
    }

    /// Enumerate every URL of a target domain, streaming unique records
    /// as they arrive. The summary resolves when all sources finish.
    pub fn discover_domain(
        &self,
        target: &str,
        options: DiscoverOptions,
    ) -> Result<(ReceiverStream<UrlRecord>, JoinHandle<Summary>), DiscoverError> {
        validate_target(target)?;
        let domain = normalize_target(target);

        if let Some(requested) = &options.sources {
            for name in requested {
                if self.registry.get(name).is_none() {
                    return Err(DiscoverError::Config(format!("Unknown source: {name}")));
                }
            }
        }

        let sources = self
            .registry
            .select(options.sources.as_deref(), options.mode == Mode::Deep);
        let (ctx, caller) = self.call_context(options);
        let dedup = Arc::new(Dedup::new());

        let (rx, handle) = execute_map(sources, domain, ctx, caller, dedup);
        Ok((ReceiverStream::new(rx), handle))
    }

    /// Exhaustive exact-phrase recall over one engine family, with the
    /// iterative exclusion phase appended. Streams unique hits.
    pub fn recall_search(
        &self,
        phrase: &str,
        options: RecallOptions,
    ) -> Result<(ReceiverStream<SearchHit>, JoinHandle<Summary>), DiscoverError> {
        let planner = QueryPlanner::new(phrase, &options.engine)?
            .with_site_groups(&options.site_groups)
            .with_locales(&options.locales)
            .with_filetype_categories(&options.filetype_categories)
            .with_extra_extensions(&options.extra_extensions)
            .with_base_selection(options.bases.clone());
        let plan = planner.plan();
        let clean_phrase = planner.phrase().to_string();

        let mut dedup = Dedup::new();
        // A quoted input phrase turns on the exact-phrase post-filter.
        let trimmed = phrase.trim();
        if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() > 1 {
            dedup = dedup.with_exact_phrase(trimmed);
        }
        if let Some(slice) = &options.time_slice {
            dedup = dedup.with_time_slice(TimeSlice {
                after: slice.after.clone(),
                before: slice.before.clone(),
            });
        }

        let (ctx, caller) = self.call_context(DiscoverOptions::default());
        let (rx, handle) = execute_recall(
            plan,
            clean_phrase,
            options,
            ctx,
            caller,
            Arc::new(dedup),
        );
        Ok((ReceiverStream::new(rx), handle))
    }

    /// Find pages and hosts linking to the target.
    pub async fn discover_backlinks(
        &self,
        target: &str,
        options: BacklinkOptions,
    ) -> Result<BacklinkResponse, DiscoverError> {
        validate_target(target)?;

        let discover_options = DiscoverOptions {
            allow_external: true,
            ..Default::default()
        };
        let (ctx, _caller) = self.call_context(discover_options);
        let core = BacklinkCore::new(&ctx);

        let response = if options.pages {
            core.referring_pages(target, &options).await
        } else {
            core.referring_domains(target, &options).await
        };
        Ok(response)
    }

    /// Seven-source filetype sweep with the optional keyword-in-PDF
    /// cascade.
    pub async fn discover_filetypes(
        &self,
        domain: &str,
        filetype_query: &str,
        keyword: Option<&str>,
        options: FiletypeOptions,
    ) -> Result<FiletypeResponse, DiscoverError> {
        validate_target(domain)?;

        let (ctx, _caller) = self.call_context(DiscoverOptions::default());
        let cascade = FiletypeCascade::new(&ctx);
        Ok(cascade.discover(domain, filetype_query, keyword, &options).await)
    }
}
