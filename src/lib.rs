//! Dragnet: parallel multi-source web resource discovery.
//!
//! Plans a large set of source-specific query tasks, runs them
//! concurrently under per-source rate control and budgets, streams results
//! through a shared deduplicator, and optionally enriches or re-queries
//! iteratively. Built for recall: missing a result is worse than producing
//! a duplicate.

pub mod backlinks;
pub mod capabilities;
pub mod config;
pub mod dedup;
pub mod error;
pub mod excluder;
pub mod fanout;
pub mod fetch;
pub mod filetype;
pub mod logstream;
pub mod models;
pub mod planner;
pub mod rate_limit;
pub mod retry;
pub mod session;
pub mod sources;
pub mod warc;

pub use capabilities::Capabilities;
pub use config::{
    BacklinkOptions, DiscoverOptions, FiletypeOptions, Mode, RecallOptions, SessionConfig,
};
pub use error::DiscoverError;
pub use models::{
    BacklinkResponse, ContentMatch, FiletypeResponse, LinkProvider, LinkRecord, PageRef,
    SearchHit, SearchType, SourceStats, Summary, UrlRecord,
};
pub use session::Session;
