//! Query expansion.
//!
//! A query becomes 4 to 8 deterministic variants. The first variant is
//! always the query exactly as given; the rest come from pluggable
//! strategies driven by a versioned [`ExpansionDictionary`], then from
//! fixed templates when the strategies do not produce enough.

use beacon_core::text::{keywords, normalize_text};
use beacon_core::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use tracing::debug;

pub const MIN_QUERIES: usize = 4;
pub const MAX_QUERIES: usize = 8;

/// Produces the query variants searched by the broad stage.
///
/// Implementations must be deterministic and return between 4 and 8
/// entries with the original query first. The pipeline checks this and
/// falls back to the original query alone when it is violated.
pub trait QueryExpander: Send + Sync {
    fn expand(&self, query: &str) -> Result<Vec<String>>;
}

/// Term tables driving expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionDictionary {
    pub version: String,

    /// Single-word substitutions.
    #[serde(default)]
    pub synonyms: BTreeMap<String, Vec<String>>,

    /// Phrases mapped to related domain concepts. Keys may span words.
    #[serde(default)]
    pub domain_concepts: BTreeMap<String, Vec<String>>,

    /// Terms searched on their own when they appear in a query.
    #[serde(default)]
    pub technical_terms: BTreeSet<String>,
}

impl ExpansionDictionary {
    /// Load a dictionary from a TOML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            DiscoveryError::config(format!(
                "Failed to read expansion dictionary {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut dictionary: Self = toml::from_str(content).map_err(|e| {
            DiscoveryError::config(format!("Failed to parse expansion dictionary: {}", e))
        })?;
        dictionary.normalize_keys();
        Ok(dictionary)
    }

    fn normalize_keys(&mut self) {
        self.synonyms = std::mem::take(&mut self.synonyms)
            .into_iter()
            .map(|(k, v)| (normalize_text(&k), v))
            .collect();
        self.domain_concepts = std::mem::take(&mut self.domain_concepts)
            .into_iter()
            .map(|(k, v)| (normalize_text(&k), v))
            .collect();
        self.technical_terms = std::mem::take(&mut self.technical_terms)
            .into_iter()
            .map(|t| normalize_text(&t))
            .collect();
    }
}

impl Default for ExpansionDictionary {
    fn default() -> Self {
        fn table(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                .collect()
        }

        let synonyms = table(&[
            ("bug", &["issue"]),
            ("class", &["type"]),
            ("config", &["configuration"]),
            ("configure", &["setup"]),
            ("create", &["make"]),
            ("database", &["db", "store"]),
            ("delete", &["remove"]),
            ("deploy", &["deployment"]),
            ("error", &["exception"]),
            ("function", &["method"]),
            ("install", &["setup", "installation"]),
            ("method", &["function"]),
            ("performance", &["latency", "throughput"]),
            ("search", &["query", "retrieval"]),
            ("struct", &["type"]),
            ("update", &["modify"]),
            ("vector", &["embedding"]),
        ]);

        let domain_concepts = table(&[
            ("embedding", &["vector representation"]),
            ("hnsw", &["approximate nearest neighbor index"]),
            ("knowledge graph", &["entity relationships"]),
            ("rag", &["retrieval augmented generation"]),
            ("semantic search", &["similarity search"]),
            ("vector database", &["embedding storage", "similarity search"]),
        ]);

        let technical_terms = [
            "api", "bm25", "cuda", "gpu", "grpc", "hnsw", "mmr", "onnx", "quantization", "rest",
            "sharding", "simd",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            version: "builtin-1".to_string(),
            synonyms,
            domain_concepts,
            technical_terms,
        }
    }
}

/// One source of query variants.
pub trait ExpansionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Variants of `normalized`, the lowercased and whitespace-collapsed query.
    fn variants(&self, normalized: &str, dictionary: &ExpansionDictionary) -> Vec<String>;
}

/// Keyword-only rewrite plus domain concept substitution.
#[derive(Debug, Default, Clone, Copy)]
pub struct DomainTermStrategy;

impl ExpansionStrategy for DomainTermStrategy {
    fn name(&self) -> &'static str {
        "domain_terms"
    }

    fn variants(&self, normalized: &str, dictionary: &ExpansionDictionary) -> Vec<String> {
        let mut variants = Vec::new();

        let terms = keywords(normalized);
        if !terms.is_empty() {
            variants.push(terms.join(" "));
        }

        let padded = format!(" {} ", normalized);
        for (phrase, concepts) in &dictionary.domain_concepts {
            let needle = format!(" {} ", phrase);
            if phrase.is_empty() || !padded.contains(&needle) {
                continue;
            }
            for concept in concepts {
                let replaced = padded.replacen(&needle, &format!(" {} ", concept), 1);
                variants.push(replaced.trim().to_string());
            }
        }

        variants
    }
}

/// Word-for-word synonym substitution.
#[derive(Debug, Default, Clone, Copy)]
pub struct SynonymStrategy;

impl ExpansionStrategy for SynonymStrategy {
    fn name(&self) -> &'static str {
        "synonyms"
    }

    fn variants(&self, normalized: &str, dictionary: &ExpansionDictionary) -> Vec<String> {
        let words: Vec<&str> = normalized.split(' ').collect();
        let mut variants = Vec::new();

        for (index, word) in words.iter().enumerate() {
            let bare = word.trim_matches(|c: char| !c.is_alphanumeric());
            let Some(replacements) = dictionary.synonyms.get(bare) else {
                continue;
            };
            for replacement in replacements {
                let substituted = word.replacen(bare, replacement, 1);
                let rewritten: Vec<&str> = words
                    .iter()
                    .enumerate()
                    .map(|(i, w)| if i == index { substituted.as_str() } else { *w })
                    .collect();
                variants.push(rewritten.join(" "));
            }
        }

        variants
    }
}

/// Isolates technical tokens such as acronyms, identifiers and version
/// strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct TechnicalTermStrategy;

impl TechnicalTermStrategy {
    fn is_technical(token: &str, dictionary: &ExpansionDictionary) -> bool {
        if dictionary.technical_terms.contains(token) {
            return true;
        }
        let has_alpha = token.chars().any(char::is_alphabetic);
        let has_digit = token.chars().any(|c| c.is_ascii_digit());
        let has_joiner = token
            .trim_matches(|c: char| !c.is_alphanumeric())
            .contains(['_', '.', ':']);
        has_alpha && (has_digit || has_joiner)
    }
}

impl ExpansionStrategy for TechnicalTermStrategy {
    fn name(&self) -> &'static str {
        "technical_terms"
    }

    fn variants(&self, normalized: &str, dictionary: &ExpansionDictionary) -> Vec<String> {
        let mut variants = Vec::new();
        let mut seen = HashSet::new();

        for raw in normalized.split(' ') {
            let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
            if token.is_empty() || !seen.insert(token) {
                continue;
            }
            if Self::is_technical(token, dictionary) {
                variants.push(format!("{} documentation", token));
                variants.push(format!("{} configuration", token));
            }
        }

        variants
    }
}

const TEMPLATES: &[&str] = &[
    "{q} overview",
    "{q} documentation",
    "{q} example",
    "how to {q}",
    "{q} guide",
    "what is {q}",
];

/// Dictionary-driven [`QueryExpander`].
pub struct DictionaryExpander {
    dictionary: ExpansionDictionary,
    strategies: Vec<Box<dyn ExpansionStrategy>>,
    min_queries: usize,
    max_queries: usize,
}

impl DictionaryExpander {
    pub fn new(dictionary: ExpansionDictionary) -> Self {
        Self {
            dictionary,
            strategies: vec![
                Box::new(DomainTermStrategy),
                Box::new(SynonymStrategy),
                Box::new(TechnicalTermStrategy),
            ],
            min_queries: MIN_QUERIES,
            max_queries: MAX_QUERIES,
        }
    }

    /// Replace the strategy list. Strategies run in the given order.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ExpansionStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Narrow the output size, clamped to `[4, 8]`.
    pub fn with_bounds(mut self, min_queries: usize, max_queries: usize) -> Self {
        self.max_queries = max_queries.clamp(MIN_QUERIES, MAX_QUERIES);
        self.min_queries = min_queries.clamp(MIN_QUERIES, self.max_queries);
        self
    }
}

impl Default for DictionaryExpander {
    fn default() -> Self {
        Self::new(ExpansionDictionary::default())
    }
}

impl QueryExpander for DictionaryExpander {
    fn expand(&self, query: &str) -> Result<Vec<String>> {
        let normalized = normalize_text(query);
        if normalized.is_empty() {
            return Err(DiscoveryError::ExpansionFailure(
                "cannot expand an empty query".to_string(),
            ));
        }

        let mut expansions = vec![query.to_string()];
        let mut seen: HashSet<String> = HashSet::from([normalized.clone()]);

        let mut push = |candidate: String, expansions: &mut Vec<String>| {
            let key = normalize_text(&candidate);
            if !key.is_empty() && seen.insert(key) {
                expansions.push(candidate);
            }
        };

        'strategies: for strategy in &self.strategies {
            let variants = strategy.variants(&normalized, &self.dictionary);
            debug!(
                strategy = strategy.name(),
                variants = variants.len(),
                "Expansion strategy applied"
            );
            for variant in variants {
                if expansions.len() >= self.max_queries {
                    break 'strategies;
                }
                push(variant, &mut expansions);
            }
        }

        for template in TEMPLATES {
            if expansions.len() >= self.min_queries {
                break;
            }
            push(template.replace("{q}", &normalized), &mut expansions);
        }

        expansions.truncate(self.max_queries);
        Ok(expansions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_is_original() {
        let expander = DictionaryExpander::default();
        let expanded = expander.expand("Vector Database  Install").unwrap();
        assert_eq!(expanded[0], "Vector Database  Install");
    }

    #[test]
    fn test_vector_database_install() {
        let expander = DictionaryExpander::default();
        let expanded = expander.expand("vector database install").unwrap();

        assert_eq!(expanded.len(), 8);
        assert_eq!(expanded[0], "vector database install");
        assert!(expanded.contains(&"embedding storage install".to_string()));
        assert!(expanded.contains(&"similarity search install".to_string()));
        assert!(expanded.contains(&"embedding database install".to_string()));
        assert!(expanded.contains(&"vector db install".to_string()));
    }

    #[test]
    fn test_padding_with_templates() {
        let expander = DictionaryExpander::default();
        let expanded = expander.expand("zebra").unwrap();

        assert_eq!(expanded.len(), 4);
        assert_eq!(expanded[0], "zebra");
        assert_eq!(expanded[1], "zebra overview");
        assert_eq!(expanded[2], "zebra documentation");
        assert_eq!(expanded[3], "zebra example");
    }

    #[test]
    fn test_deterministic() {
        let expander = DictionaryExpander::default();
        let a = expander.expand("configure hnsw search performance").unwrap();
        let b = expander.expand("configure hnsw search performance").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_duplicates() {
        let expander = DictionaryExpander::default();
        let expanded = expander.expand("search search search").unwrap();
        let unique: HashSet<String> = expanded.iter().map(|q| normalize_text(q)).collect();
        assert_eq!(unique.len(), expanded.len());
    }

    #[test]
    fn test_empty_query_fails() {
        let expander = DictionaryExpander::default();
        assert!(matches!(
            expander.expand("   "),
            Err(DiscoveryError::ExpansionFailure(_))
        ));
    }

    #[test]
    fn test_technical_terms() {
        let variants = TechnicalTermStrategy
            .variants("tune hnsw ef_search for v2.1", &ExpansionDictionary::default());
        assert!(variants.contains(&"hnsw documentation".to_string()));
        assert!(variants.contains(&"ef_search documentation".to_string()));
        assert!(variants.contains(&"v2.1 documentation".to_string()));
        assert!(!variants.iter().any(|v| v.starts_with("tune ")));
    }

    #[test]
    fn test_synonym_keeps_punctuation() {
        let variants = SynonymStrategy.variants("fix error?", &ExpansionDictionary::default());
        assert_eq!(variants, vec!["fix exception?".to_string()]);
    }

    #[test]
    fn test_bounds() {
        let expander = DictionaryExpander::default().with_bounds(5, 6);
        let expanded = expander.expand("vector database install").unwrap();
        assert_eq!(expanded.len(), 6);

        let expanded = expander.expand("zebra").unwrap();
        assert_eq!(expanded.len(), 5);
    }

    #[test]
    fn test_dictionary_from_toml() {
        let dictionary = ExpansionDictionary::from_toml_str(
            r#"
            version = "custom-2"
            technical_terms = ["Raft"]

            [synonyms]
            Cluster = ["fleet"]
            "#,
        )
        .unwrap();

        assert_eq!(dictionary.version, "custom-2");
        assert!(dictionary.technical_terms.contains("raft"));
        assert_eq!(dictionary.synonyms["cluster"], vec!["fleet".to_string()]);

        let expander = DictionaryExpander::new(dictionary);
        let expanded = expander.expand("raft cluster").unwrap();
        assert!(expanded.contains(&"raft fleet".to_string()));
        assert!(expanded.contains(&"raft documentation".to_string()));
    }

    #[test]
    fn test_custom_strategies() {
        struct Reverse;
        impl ExpansionStrategy for Reverse {
            fn name(&self) -> &'static str {
                "reverse"
            }
            fn variants(&self, normalized: &str, _: &ExpansionDictionary) -> Vec<String> {
                vec![normalized.split(' ').rev().collect::<Vec<_>>().join(" ")]
            }
        }

        let expander = DictionaryExpander::default().with_strategies(vec![Box::new(Reverse)]);
        let expanded = expander.expand("alpha beta").unwrap();
        assert_eq!(expanded[1], "beta alpha");
        assert_eq!(expanded.len(), 4);
    }

    proptest! {
        #[test]
        fn prop_bounds_and_first_query(query in "[A-Za-z]{1,10}( [A-Za-z0-9]{1,10}){0,5}") {
            let expanded = DictionaryExpander::default().expand(&query).unwrap();
            prop_assert!((MIN_QUERIES..=MAX_QUERIES).contains(&expanded.len()));
            prop_assert_eq!(&expanded[0], &query);

            let unique: HashSet<String> = expanded.iter().map(|q| normalize_text(q)).collect();
            prop_assert_eq!(unique.len(), expanded.len());
        }

        #[test]
        fn prop_deterministic(query in "[a-z]{1,8}( [a-z]{1,8}){0,4}") {
            let expander = DictionaryExpander::default();
            prop_assert_eq!(expander.expand(&query).unwrap(), expander.expand(&query).unwrap());
        }
    }
}
