//! Search-engine sources and their operator-capability profiles.
//!
//! Each engine carries a profile describing which query operators it
//! honors; the planner consults it to drop unsupported operators, and the
//! excluder to pick the exclusion syntax.

use async_trait::async_trait;
use tracing::debug;

use super::{RecordSink, SourceAdapter, SourceContext};
use crate::capabilities::SerpClient;
use crate::error::DiscoverError;
use crate::models::{SearchHit, UrlRecord};
use crate::planner::LeafQuery;

/// Operator support table for one engine.
#[derive(Debug, Clone)]
pub struct EngineProfile {
    /// Engine code used in options and adapter ids.
    pub code: &'static str,
    /// Short badge shown next to results.
    pub badge: &'static str,
    /// Whether the engine accepts a market/locale parameter.
    pub supports_market: bool,
    /// `-term` exclusion.
    pub supports_minus: bool,
    /// Uppercase `NOT` exclusion.
    pub supports_not: bool,
    pub supports_intitle: bool,
    pub supports_inbody: bool,
    pub supports_inurl: bool,
    /// Maximum terms inside one OR group.
    pub max_or_terms: usize,
    pub notes: &'static str,
}

impl EngineProfile {
    /// Exclusion clause for one domain, in this engine's preferred syntax.
    pub fn exclusion_clause(&self, domain: &str) -> Option<String> {
        if self.supports_minus {
            Some(format!("-site:{domain}"))
        } else if self.supports_not {
            Some(format!("NOT site:{domain}"))
        } else {
            None
        }
    }
}

const PROFILES: &[EngineProfile] = &[
    EngineProfile {
        code: "google",
        badge: "GO",
        supports_market: true,
        supports_minus: true,
        supports_not: false,
        supports_intitle: true,
        supports_inbody: false,
        supports_inurl: true,
        max_or_terms: 20,
        notes: "Only - operator, no NOT",
    },
    EngineProfile {
        code: "bing",
        badge: "BI",
        supports_market: true,
        supports_minus: true,
        supports_not: true,
        supports_intitle: true,
        supports_inbody: true,
        // Dropped by the engine in 2007.
        supports_inurl: false,
        max_or_terms: 20,
        notes: "Both - and NOT (uppercase)",
    },
    EngineProfile {
        code: "duckduckgo",
        badge: "DD",
        supports_market: true,
        supports_minus: true,
        supports_not: false,
        supports_intitle: true,
        supports_inbody: false,
        supports_inurl: false,
        max_or_terms: 20,
        notes: "Only - operator, no NOT",
    },
    EngineProfile {
        code: "yandex",
        badge: "YA",
        supports_market: true,
        supports_minus: true,
        supports_not: false,
        supports_intitle: false,
        supports_inbody: false,
        supports_inurl: false,
        max_or_terms: 20,
        notes: "Only - operator; title: syntax differs",
    },
    EngineProfile {
        code: "brave",
        badge: "BR",
        supports_market: false,
        supports_minus: true,
        supports_not: true,
        supports_intitle: false,
        supports_inbody: false,
        supports_inurl: false,
        max_or_terms: 20,
        notes: "Both - and NOT supported per docs, using - by default",
    },
];

/// All known engine profiles.
pub fn profiles() -> &'static [EngineProfile] {
    PROFILES
}

/// Profile for an engine code, case-insensitive.
pub fn profile_for(code: &str) -> Option<&'static EngineProfile> {
    let code = code.to_lowercase();
    PROFILES.iter().find(|p| p.code == code)
}

/// Market codes accepted as shorthand country names.
pub fn market_code(country: &str) -> Option<&'static str> {
    match country.to_lowercase().as_str() {
        "us" => Some("en-US"),
        "uk" => Some("en-GB"),
        "de" => Some("de-DE"),
        "fr" => Some("fr-FR"),
        "es" => Some("es-ES"),
        "it" => Some("it-IT"),
        "jp" => Some("ja-JP"),
        "cn" => Some("zh-CN"),
        _ => None,
    }
}

/// Execute one leaf query against the SERP backend and tag the hits.
pub async fn run_leaf(
    serp: &dyn SerpClient,
    profile: &EngineProfile,
    leaf: &LeafQuery,
    num: usize,
) -> Result<Vec<SearchHit>, DiscoverError> {
    let market = if profile.supports_market {
        leaf.market.as_deref()
    } else {
        None
    };
    let results = serp.search(profile.code, &leaf.query, market, num).await?;

    Ok(results
        .into_iter()
        .map(|result| {
            let mut hit = SearchHit::new(result.url, profile.code, profile.badge)
                .with_metadata(result.title, result.snippet)
                .with_query(leaf.query.clone(), leaf.tag.clone())
                .with_market(leaf.market.clone());
            hit.date = result.date;
            hit
        })
        .collect())
}

/// Domain-mapping source backed by one engine: `site:{domain}` sweep.
pub struct EngineSource {
    profile: &'static EngineProfile,
}

impl EngineSource {
    pub fn new(code: &str) -> Self {
        let profile = profile_for(code).expect("unknown engine code");
        Self { profile }
    }
}

#[async_trait]
impl SourceAdapter for EngineSource {
    fn id(&self) -> &str {
        self.profile.code
    }

    fn concurrency(&self) -> usize {
        20
    }

    async fn discover(&self, target: &str, ctx: &SourceContext, sink: &RecordSink) {
        let Some(serp) = &ctx.caps.serp else {
            debug!("[{}] Skipping - no SERP capability", self.profile.code);
            return;
        };

        let query = format!("site:{target}");
        ctx.limiter.acquire(self.profile.code).await;

        let results = match serp.search(self.profile.code, &query, None, 100).await {
            Ok(results) => results,
            Err(e) => {
                ctx.errors.record(self.profile.code, e.to_string());
                ctx.log
                    .log(self.profile.code, format!("Failed: {e}"), 0);
                return;
            }
        };

        let mut count = 0;
        for result in results {
            if ctx.cancel.is_cancelled() {
                return;
            }
            if !ctx.admits(&result.url, target) {
                continue;
            }
            count += 1;
            let record = UrlRecord::new(result.url, target, self.profile.code)
                .with_metadata(result.title, result.snippet)
                .with_query(query.clone());
            if !sink.send(record).await {
                return;
            }
        }
        ctx.log.log(self.profile.code, "Found results", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_lookup_is_case_insensitive() {
        assert!(profile_for("BING").is_some());
        assert!(profile_for("bing").is_some());
        assert!(profile_for("altavista").is_none());
    }

    #[test]
    fn bing_profile_drops_inurl() {
        let bing = profile_for("bing").unwrap();
        assert!(bing.supports_intitle);
        assert!(bing.supports_inbody);
        assert!(!bing.supports_inurl);
    }

    #[test]
    fn exclusion_syntax_per_engine() {
        let google = profile_for("google").unwrap();
        assert_eq!(
            google.exclusion_clause("a.gov").as_deref(),
            Some("-site:a.gov")
        );

        // An engine with NOT-only support falls back to NOT syntax.
        let custom = EngineProfile {
            code: "x",
            badge: "X",
            supports_market: false,
            supports_minus: false,
            supports_not: true,
            supports_intitle: false,
            supports_inbody: false,
            supports_inurl: false,
            max_or_terms: 20,
            notes: "",
        };
        assert_eq!(
            custom.exclusion_clause("a.gov").as_deref(),
            Some("NOT site:a.gov")
        );
    }

    #[test]
    fn market_codes() {
        assert_eq!(market_code("de"), Some("de-DE"));
        assert_eq!(market_code("xx"), None);
    }
}
