//! Deterministic expansion of a recall request into leaf queries.
//!
//! A request `(phrase, site groups, locales, filetypes, bases)` expands
//! into the Cartesian product of base queries, site blocks, markets and
//! extension operators. Identical inputs always produce the identical
//! ordered leaf list; the stable tags make individual queries traceable in
//! logs and exclusion bookkeeping.

use crate::error::DiscoverError;
use crate::sources::engines::{profile_for, EngineProfile};

/// Extension operators per filetype category.
const FILETYPE_LIBRARY: &[(&str, &[&str])] = &[
    ("document", &["filetype:pdf", "filetype:doc", "filetype:docx"]),
    ("spreadsheet", &["filetype:xls", "filetype:xlsx"]),
    ("presentation", &["filetype:ppt", "filetype:pptx"]),
    ("text", &["filetype:txt", "filetype:rtf"]),
];

/// One fully materialized query for one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafQuery {
    /// Stable tag: `{base}-S{i|N}-L{i|N}-E{i|N}_{seq}`.
    pub tag: String,
    pub query: String,
    pub engine: String,
    pub market: Option<String>,
}

/// Ordered set of leaves for one fan-out.
#[derive(Debug, Clone, Default)]
pub struct QueryPlan {
    pub leaves: Vec<LeafQuery>,
}

impl QueryPlan {
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

/// Convert site patterns into an OR-grouped site block:
/// `["*.de", "example.com"]` -> `(site:*.de OR site:example.com)`.
pub fn build_site_block(sites: &[String]) -> String {
    if sites.is_empty() {
        return String::new();
    }
    let processed: Vec<String> = sites
        .iter()
        .map(|s| {
            let s = s.trim();
            if s.starts_with("site:") {
                s.to_string()
            } else {
                format!("site:{s}")
            }
        })
        .collect();
    format!("({})", processed.join(" OR "))
}

/// Split a site list into chunks that stay under the engine's OR-term cap.
pub fn chunk_sites(sites: &[String], max_terms: usize) -> Vec<Vec<String>> {
    let max_terms = max_terms.max(1);
    sites
        .chunks(max_terms)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Base queries for a phrase, filtered by the engine's operator support.
/// Returns `(tag, query)` pairs in a fixed order.
pub fn base_queries(
    phrase: &str,
    profile: &EngineProfile,
    selection: Option<&[String]>,
) -> Vec<(String, String)> {
    let clean = phrase.trim().trim_matches(|c| c == '"' || c == '\'');
    let quoted = format!("\"{clean}\"");

    let mut bases: Vec<(&str, &str, String)> = vec![
        ("B1", "plain", quoted.clone()),
        ("B2_pdf", "filetype", format!("{quoted} filetype:pdf")),
        (
            "B2_doc",
            "filetype",
            format!("{quoted} filetype:doc OR filetype:docx"),
        ),
        (
            "B2_xls",
            "filetype",
            format!("{quoted} filetype:xls OR filetype:xlsx"),
        ),
        (
            "B2_ppt",
            "filetype",
            format!("{quoted} filetype:ppt OR filetype:pptx"),
        ),
        (
            "B2_txt",
            "filetype",
            format!("{quoted} filetype:txt OR filetype:rtf"),
        ),
    ];
    if profile.supports_intitle {
        bases.push(("B3", "intitle", format!("intitle:{quoted}")));
    }
    if profile.supports_inurl {
        bases.push(("B4", "inurl", format!("inurl:{quoted}")));
    }
    if profile.supports_inbody {
        bases.push(("B5", "inbody", format!("inbody:{quoted}")));
    }

    bases
        .into_iter()
        .filter(|(_, kind, _)| match selection {
            Some(selected) => selected.iter().any(|s| s == kind),
            None => true,
        })
        .map(|(tag, _, query)| (tag.to_string(), query))
        .collect()
}

/// Expands a recall request into leaf queries.
pub struct QueryPlanner {
    phrase: String,
    profile: &'static EngineProfile,
    site_groups: Vec<Vec<String>>,
    locales: Vec<String>,
    ext_pool: Vec<String>,
    base_selection: Option<Vec<String>>,
}

impl QueryPlanner {
    pub fn new(phrase: &str, engine: &str) -> Result<Self, DiscoverError> {
        let profile = profile_for(engine)
            .ok_or_else(|| DiscoverError::Config(format!("Unknown engine: {engine}")))?;
        let phrase = phrase.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
        if phrase.is_empty() {
            return Err(DiscoverError::Config("empty phrase".to_string()));
        }
        Ok(Self {
            phrase,
            profile,
            site_groups: Vec::new(),
            locales: Vec::new(),
            ext_pool: Vec::new(),
            base_selection: None,
        })
    }

    pub fn profile(&self) -> &'static EngineProfile {
        self.profile
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Add site groups; oversized groups are re-chunked to the engine's
    /// OR-term cap.
    pub fn with_site_groups(mut self, groups: &[Vec<String>]) -> Self {
        for group in groups {
            for chunk in chunk_sites(group, self.profile.max_or_terms) {
                self.site_groups.push(chunk);
            }
        }
        self
    }

    pub fn with_locales(mut self, locales: &[String]) -> Self {
        self.locales = locales.to_vec();
        self
    }

    /// Resolve filetype categories into the extension pool.
    pub fn with_filetype_categories(mut self, categories: &[String]) -> Self {
        for category in categories {
            let category = category.to_lowercase();
            if let Some((_, exts)) = FILETYPE_LIBRARY.iter().find(|(name, _)| *name == category)
            {
                for ext in *exts {
                    self.ext_pool.push(ext.to_string());
                }
            }
        }
        self.normalize_ext_pool();
        self
    }

    /// Add plain extensions ("csv", not "filetype:csv").
    pub fn with_extra_extensions(mut self, extensions: &[String]) -> Self {
        for ext in extensions {
            let clean = ext.trim();
            if clean.is_empty() {
                continue;
            }
            let operator = if clean.starts_with("filetype:") {
                clean.to_string()
            } else {
                format!("filetype:{clean}")
            };
            self.ext_pool.push(operator);
        }
        self.normalize_ext_pool();
        self
    }

    pub fn with_base_selection(mut self, selection: Option<Vec<String>>) -> Self {
        self.base_selection = selection;
        self
    }

    fn normalize_ext_pool(&mut self) {
        self.ext_pool.sort();
        self.ext_pool.dedup();
    }

    /// Materialize the full leaf set. The None element of each axis is
    /// always present, so unfiltered variants are guaranteed.
    pub fn plan(&self) -> QueryPlan {
        let bases = base_queries(&self.phrase, self.profile, self.base_selection.as_deref());

        // Each axis leads with its None element.
        let site_axis: Vec<Option<&Vec<String>>> =
            std::iter::once(None).chain(self.site_groups.iter().map(Some)).collect();
        let locale_axis: Vec<Option<&String>> =
            std::iter::once(None).chain(self.locales.iter().map(Some)).collect();
        let ext_axis: Vec<Option<&String>> =
            std::iter::once(None).chain(self.ext_pool.iter().map(Some)).collect();

        let mut leaves = Vec::new();
        let mut seq = 0usize;

        for (base_tag, base_query) in &bases {
            for (site_idx, sites) in site_axis.iter().enumerate() {
                let site_block = sites.map(|s| build_site_block(s)).unwrap_or_default();
                for (locale_idx, market) in locale_axis.iter().enumerate() {
                    for (ext_idx, ext) in ext_axis.iter().enumerate() {
                        seq += 1;

                        let mut parts = vec![base_query.clone()];
                        if !site_block.is_empty() {
                            parts.push(site_block.clone());
                        }
                        if let Some(ext) = ext {
                            // Don't double an operator the base already has.
                            if !base_query.contains(ext.as_str()) {
                                parts.push((*ext).clone());
                            }
                        }
                        let query = parts.join(" ");
                        let query = query.split_whitespace().collect::<Vec<_>>().join(" ");

                        let site_tag = if sites.is_some() {
                            (site_idx - 1).to_string()
                        } else {
                            "N".to_string()
                        };
                        let locale_tag = if market.is_some() {
                            (locale_idx - 1).to_string()
                        } else {
                            "N".to_string()
                        };
                        let ext_tag = if ext.is_some() {
                            (ext_idx - 1).to_string()
                        } else {
                            "N".to_string()
                        };

                        leaves.push(LeafQuery {
                            tag: format!("{base_tag}-S{site_tag}-L{locale_tag}-E{ext_tag}_{seq}"),
                            query,
                            engine: self.profile.code.to_string(),
                            market: market.map(|m| m.clone()),
                        });
                    }
                }
            }
        }

        QueryPlan { leaves }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_block_formatting() {
        let block = build_site_block(&["*.de".to_string(), "site:example.com".to_string()]);
        assert_eq!(block, "(site:*.de OR site:example.com)");
        assert_eq!(build_site_block(&[]), "");
    }

    #[test]
    fn chunking_respects_cap() {
        let sites: Vec<String> = (0..45).map(|i| format!("s{i}.example")).collect();
        let chunks = chunk_sites(&sites, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 20);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn cardinality_law() {
        let planner = QueryPlanner::new("widget foo", "bing")
            .unwrap()
            .with_site_groups(&[vec!["*.gov".to_string()]])
            .with_locales(&["de-DE".to_string()])
            .with_extra_extensions(&["pdf".to_string()]);

        let plan = planner.plan();
        // Bing supports intitle and inbody but not inurl: 8 bases.
        let bases = 8;
        assert_eq!(plan.len(), bases * 2 * 2 * 2);
    }

    #[test]
    fn identical_inputs_identical_plans() {
        let build = || {
            QueryPlanner::new("widget foo", "bing")
                .unwrap()
                .with_site_groups(&[vec!["*.gov".to_string(), "*.edu".to_string()]])
                .with_extra_extensions(&["csv".to_string(), "pdf".to_string()])
                .plan()
        };
        let a = build();
        let b = build();
        assert_eq!(a.leaves, b.leaves);
    }

    #[test]
    fn unsupported_operators_never_appear() {
        // Bing dropped inurl:.
        let plan = QueryPlanner::new("widget foo", "bing").unwrap().plan();
        assert!(plan.leaves.iter().all(|l| !l.query.contains("inurl:")));

        // Yandex has neither intitle nor inbody.
        let plan = QueryPlanner::new("widget foo", "yandex").unwrap().plan();
        assert!(plan.leaves.iter().all(|l| !l.query.contains("intitle:")));
        assert!(plan.leaves.iter().all(|l| !l.query.contains("inbody:")));

        // Google keeps inurl.
        let plan = QueryPlanner::new("widget foo", "google").unwrap().plan();
        assert!(plan.leaves.iter().any(|l| l.query.contains("inurl:")));
    }

    #[test]
    fn tags_are_stable_and_sequenced() {
        let plan = QueryPlanner::new("widget foo", "bing")
            .unwrap()
            .with_extra_extensions(&["pdf".to_string()])
            .plan();

        assert_eq!(plan.leaves[0].tag, "B1-SN-LN-EN_1");
        assert_eq!(plan.leaves[1].tag, "B1-SN-LN-E0_2");
        // Every tag is unique.
        let mut tags: Vec<&String> = plan.leaves.iter().map(|l| &l.tag).collect();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), plan.len());
    }

    #[test]
    fn base_selection_filters_kinds() {
        let profile = profile_for("bing").unwrap();
        let plain_only = base_queries("w", profile, Some(&["plain".to_string()]));
        assert_eq!(plain_only.len(), 1);
        assert_eq!(plain_only[0].1, "\"w\"");

        let with_title = base_queries(
            "w",
            profile,
            Some(&["plain".to_string(), "intitle".to_string()]),
        );
        assert_eq!(with_title.len(), 2);
        assert!(with_title[1].1.starts_with("intitle:"));
    }

    #[test]
    fn ext_operator_not_doubled() {
        let planner = QueryPlanner::new("w", "bing")
            .unwrap()
            .with_extra_extensions(&["pdf".to_string()]);
        let plan = planner.plan();
        // The B2_pdf base with the pdf extension axis keeps one operator.
        let b2_with_ext = plan
            .leaves
            .iter()
            .find(|l| l.tag.starts_with("B2_pdf-SN-LN-E0"))
            .unwrap();
        assert_eq!(b2_with_ext.query.matches("filetype:pdf").count(), 1);
    }

    #[test]
    fn quoted_phrase_is_normalized() {
        let planner = QueryPlanner::new("\"already quoted\"", "bing").unwrap();
        let plan = planner.plan();
        assert_eq!(plan.leaves[0].query, "\"already quoted\"");
    }
}
