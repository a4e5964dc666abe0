//! Configuration for the discovery pipeline.
//!
//! Every section has working defaults, so an empty TOML file is a valid
//! configuration. Values can be overridden from `BEACON_*` environment
//! variables after loading.

use beacon_core::types::{
    DEFAULT_BROAD_K, DEFAULT_FOCUS_K, DEFAULT_MAX_BULLETS, DEFAULT_MAX_HOPS,
};
use beacon_core::{DiscoveryError, DiscoveryRequest, RelationshipType, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ENV_BROAD_K: &str = "BEACON_BROAD_K";
pub const ENV_FOCUS_K: &str = "BEACON_FOCUS_K";
pub const ENV_MAX_BULLETS: &str = "BEACON_MAX_BULLETS";
pub const ENV_MAX_HOPS: &str = "BEACON_MAX_HOPS";
pub const ENV_MAX_IN_FLIGHT: &str = "BEACON_MAX_IN_FLIGHT";
pub const ENV_SEARCH_TIMEOUT_MS: &str = "BEACON_SEARCH_TIMEOUT_MS";
pub const ENV_MMR_LAMBDA: &str = "BEACON_MMR_LAMBDA";
pub const ENV_GRAPH_ENABLED: &str = "BEACON_GRAPH_ENABLED";

/// Main configuration for the discovery pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub defaults: RequestDefaults,
    pub scoring: ScoringConfig,
    pub search: SearchConfig,
    pub dedup: DedupConfig,
    pub rerank: RerankConfig,
    pub diversity: DiversityConfig,
    pub graph: GraphConfig,
    pub assembly: AssemblyConfig,
    pub cache: CacheConfig,
    pub expansion: ExpansionConfig,
}

/// Request parameters used when a caller leaves them out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestDefaults {
    pub broad_k: usize,
    pub focus_k: usize,
    pub max_bullets: usize,
    pub max_hops: usize,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            broad_k: DEFAULT_BROAD_K,
            focus_k: DEFAULT_FOCUS_K,
            max_bullets: DEFAULT_MAX_BULLETS,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

impl RequestDefaults {
    /// Build a request for `query` carrying these defaults.
    pub fn request(&self, query: impl Into<String>) -> DiscoveryRequest {
        DiscoveryRequest::new(query)
            .broad_k(self.broad_k)
            .focus_k(self.focus_k)
            .max_bullets(self.max_bullets)
            .max_hops(self.max_hops)
    }
}

/// Collection pre-scoring weights and focus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub name_match_weight: f32,
    pub term_boost_weight: f32,
    pub signal_boost_weight: f32,

    /// Search only the best N scored collections; 0 searches all.
    pub focus_top_n: usize,

    /// Domain terms per collection name, matched against query keywords.
    pub terms: BTreeMap<String, Vec<String>>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            name_match_weight: 0.4,
            term_boost_weight: 0.3,
            signal_boost_weight: 0.3,
            focus_top_n: 0,
            terms: BTreeMap::new(),
        }
    }
}

/// Broad search fan-out configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Upper bound on concurrent similarity calls.
    pub max_in_flight: usize,

    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,

    /// Hits scoring below this are dropped before merging.
    pub min_score: f32,

    /// Timeout for embedding a single query, in milliseconds.
    pub embed_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            timeout_ms: 2000,
            min_score: 0.0,
            embed_timeout_ms: 2000,
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Pairs more similar than this collapse to the higher-scoring item.
    pub near_duplicate_threshold: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            near_duplicate_threshold: 0.95,
        }
    }
}

/// Factor weights for the reranker. Must sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankWeights {
    pub semantic: f32,
    pub lexical: f32,
    pub freshness: f32,
    pub collection_priority: f32,
    pub metadata_boost: f32,
    pub graph_centrality: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            semantic: 0.45,
            lexical: 0.20,
            freshness: 0.10,
            collection_priority: 0.10,
            metadata_boost: 0.05,
            graph_centrality: 0.10,
        }
    }
}

impl RerankWeights {
    pub fn sum(&self) -> f32 {
        self.semantic
            + self.lexical
            + self.freshness
            + self.collection_priority
            + self.metadata_boost
            + self.graph_centrality
    }

    fn as_array(&self) -> [(&'static str, f32); 6] {
        [
            ("semantic", self.semantic),
            ("lexical", self.lexical),
            ("freshness", self.freshness),
            ("collection_priority", self.collection_priority),
            ("metadata_boost", self.metadata_boost),
            ("graph_centrality", self.graph_centrality),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub weights: RerankWeights,

    /// Relative priority per collection name. Unlisted collections get 1.0.
    pub collection_priority: BTreeMap<String, f32>,

    /// Items younger than this many days get full freshness.
    pub freshness_full_days: f32,

    /// Exponential decay constant applied past `freshness_full_days`.
    pub freshness_decay_days: f32,

    /// Lowest freshness an old item can reach.
    pub freshness_floor: f32,

    /// Freshness assigned when an item carries no timestamp.
    pub freshness_neutral: f32,

    /// Metadata field holding an explicit boost in `[0, 1]`.
    pub boost_field: String,

    /// Minimum boost for README files.
    pub readme_boost: f32,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            weights: RerankWeights::default(),
            collection_priority: BTreeMap::new(),
            freshness_full_days: 7.0,
            freshness_decay_days: 30.0,
            freshness_floor: 0.1,
            freshness_neutral: 0.5,
            boost_field: "boost".to_string(),
            readme_boost: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityConfig {
    /// MMR trade-off: 1.0 is pure relevance, 0.0 pure novelty.
    pub lambda: f32,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self { lambda: 0.7 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Run graph augmentation when a graph is attached.
    pub enabled: bool,

    /// Feed graph centrality into the reranker.
    pub centrality: bool,

    /// Paths whose cumulative weight falls below this are pruned.
    pub min_path_weight: f32,

    /// Upper bound on concurrent graph calls.
    pub max_in_flight: usize,

    /// Per-seed traversal timeout in milliseconds.
    pub timeout_ms: u64,

    /// Relationship types to follow; all when unset.
    pub relationships: Option<Vec<RelationshipType>>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            centrality: true,
            min_path_weight: 0.2,
            max_in_flight: 8,
            timeout_ms: 1000,
            relationships: None,
        }
    }
}

impl GraphConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub max_snippet_chars: usize,

    /// Bullets allowed from one source document; 0 disables the cap.
    pub max_per_doc: usize,

    /// Rendered prompt budget in characters.
    pub max_prompt_chars: usize,

    /// Reduce snippets to their key sentences.
    pub compress: bool,

    /// Sentences kept per snippet when compressing.
    pub max_sentences: usize,

    /// Group evidence into answer-plan sections in the prompt.
    pub sectioned: bool,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            max_snippet_chars: 400,
            max_per_doc: 3,
            max_prompt_chars: 16_000,
            compress: true,
            max_sentences: 2,
            sectioned: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enable_embedding_cache: bool,
    pub embedding_cache_size: u64,
    pub embedding_cache_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_embedding_cache: true,
            embedding_cache_size: 10_000,
            embedding_cache_ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub enabled: bool,
    pub min_queries: usize,
    pub max_queries: usize,

    /// Optional TOML dictionary replacing the built-in one.
    pub dictionary_path: Option<PathBuf>,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_queries: 4,
            max_queries: 8,
            dictionary_path: None,
        }
    }
}

impl DiscoveryConfig {
    /// Parse a TOML document without applying environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| DiscoveryError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DiscoveryError::config(format!("Failed to serialize config: {}", e)))
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DiscoveryError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: Self = toml::from_str(&content)
            .map_err(|e| DiscoveryError::config(format!("Failed to parse config file: {}", e)))?;

        config.merge_env_vars()?;
        config.validate()?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a specific path atomically
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or cannot be written
    pub async fn save_to_path(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        self.validate()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    DiscoveryError::config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = self.to_toml_string()?;

        // Write to a sibling temp file, then rename over the target
        let temp_path = path.with_extension("toml.tmp");

        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| DiscoveryError::config(format!("Failed to write config file: {}", e)))?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| DiscoveryError::config(format!("Failed to rename config file: {}", e)))?;

        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` to resolve variable names.
    pub fn merge_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        debug!("Merging environment variable overrides");

        if let Some(value) = lookup(ENV_BROAD_K) {
            self.defaults.broad_k = parse_env(ENV_BROAD_K, &value)?;
        }
        if let Some(value) = lookup(ENV_FOCUS_K) {
            self.defaults.focus_k = parse_env(ENV_FOCUS_K, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_BULLETS) {
            self.defaults.max_bullets = parse_env(ENV_MAX_BULLETS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_HOPS) {
            self.defaults.max_hops = parse_env(ENV_MAX_HOPS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_IN_FLIGHT) {
            self.search.max_in_flight = parse_env(ENV_MAX_IN_FLIGHT, &value)?;
        }
        if let Some(value) = lookup(ENV_SEARCH_TIMEOUT_MS) {
            self.search.timeout_ms = parse_env(ENV_SEARCH_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_MMR_LAMBDA) {
            self.diversity.lambda = parse_env(ENV_MMR_LAMBDA, &value)?;
        }
        if let Some(value) = lookup(ENV_GRAPH_ENABLED) {
            self.graph.enabled = parse_env(ENV_GRAPH_ENABLED, &value)?;
        }

        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<()> {
        let d = &self.defaults;
        if d.broad_k == 0 || d.focus_k == 0 || d.max_bullets == 0 {
            return Err(DiscoveryError::config(
                "broad_k, focus_k and max_bullets defaults must be greater than 0",
            ));
        }
        if d.focus_k > d.broad_k {
            return Err(DiscoveryError::config(format!(
                "default focus_k ({}) cannot exceed broad_k ({})",
                d.focus_k, d.broad_k
            )));
        }

        let s = &self.scoring;
        for (name, weight) in [
            ("name_match_weight", s.name_match_weight),
            ("term_boost_weight", s.term_boost_weight),
            ("signal_boost_weight", s.signal_boost_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(DiscoveryError::config(format!(
                    "scoring.{} must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }

        if self.search.max_in_flight == 0 {
            return Err(DiscoveryError::config("search.max_in_flight must be greater than 0"));
        }
        if self.search.timeout_ms == 0 || self.search.embed_timeout_ms == 0 {
            return Err(DiscoveryError::config("search timeouts must be greater than 0"));
        }
        if !self.search.min_score.is_finite() {
            return Err(DiscoveryError::config("search.min_score must be finite"));
        }

        check_unit("dedup.near_duplicate_threshold", self.dedup.near_duplicate_threshold)?;

        for (name, weight) in self.rerank.weights.as_array() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(DiscoveryError::config(format!(
                    "rerank weight '{}' must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }
        let sum = self.rerank.weights.sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(DiscoveryError::config(format!(
                "rerank weights must sum to 1.0, got {:.4}",
                sum
            )));
        }
        for (collection, priority) in &self.rerank.collection_priority {
            if !priority.is_finite() || *priority < 0.0 {
                return Err(DiscoveryError::config(format!(
                    "priority for collection '{}' must be non-negative",
                    collection
                )));
            }
        }
        if self.rerank.freshness_full_days < 0.0 || self.rerank.freshness_decay_days <= 0.0 {
            return Err(DiscoveryError::config(
                "freshness_full_days must be >= 0 and freshness_decay_days > 0",
            ));
        }
        check_unit("rerank.freshness_floor", self.rerank.freshness_floor)?;
        check_unit("rerank.freshness_neutral", self.rerank.freshness_neutral)?;
        check_unit("rerank.readme_boost", self.rerank.readme_boost)?;

        check_unit("diversity.lambda", self.diversity.lambda)?;

        check_unit("graph.min_path_weight", self.graph.min_path_weight)?;
        if self.graph.max_in_flight == 0 || self.graph.timeout_ms == 0 {
            return Err(DiscoveryError::config(
                "graph.max_in_flight and graph.timeout_ms must be greater than 0",
            ));
        }

        if self.assembly.max_snippet_chars == 0 || self.assembly.max_prompt_chars == 0 {
            return Err(DiscoveryError::config(
                "assembly.max_snippet_chars and assembly.max_prompt_chars must be greater than 0",
            ));
        }
        if self.assembly.compress && self.assembly.max_sentences == 0 {
            return Err(DiscoveryError::config(
                "assembly.max_sentences must be greater than 0 when compression is on",
            ));
        }

        let e = &self.expansion;
        if e.min_queries < 4 || e.max_queries > 8 || e.min_queries > e.max_queries {
            return Err(DiscoveryError::config(format!(
                "expansion bounds must satisfy 4 <= min_queries <= max_queries <= 8, got {}..{}",
                e.min_queries, e.max_queries
            )));
        }

        if self.cache.enable_embedding_cache && self.cache.embedding_cache_size == 0 {
            warn!("Embedding cache enabled with size 0, caching will be ineffective");
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    debug!("Overriding {} from environment: {}", key, value);
    value
        .trim()
        .parse::<T>()
        .map_err(|e| DiscoveryError::config(format!("Invalid value for {}: {}", key, e)))
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DiscoveryError::config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = DiscoveryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search.max_in_flight, 8);
        assert_eq!(config.dedup.near_duplicate_threshold, 0.95);
        assert_eq!(config.diversity.lambda, 0.7);
        assert!((config.rerank.weights.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = DiscoveryConfig::from_toml_str("").unwrap();
        assert_eq!(config, DiscoveryConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = DiscoveryConfig::from_toml_str(
            r#"
            [search]
            max_in_flight = 2

            [rerank.collection_priority]
            docs = 2.0
            "#,
        )
        .unwrap();

        assert_eq!(config.search.max_in_flight, 2);
        assert_eq!(config.search.timeout_ms, 2000);
        assert_eq!(config.rerank.collection_priority.get("docs"), Some(&2.0));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = DiscoveryConfig::default();
        config.rerank.weights.semantic = 0.9;
        assert!(matches!(config.validate(), Err(DiscoveryError::Config(_))));
    }

    #[test]
    fn test_scoring_section() {
        let config = DiscoveryConfig::from_toml_str(
            r#"
            [scoring]
            focus_top_n = 2

            [scoring.terms]
            ops = ["deploy", "install"]
            "#,
        )
        .unwrap();

        assert_eq!(config.scoring.focus_top_n, 2);
        assert_eq!(config.scoring.name_match_weight, 0.4);
        assert_eq!(config.scoring.terms["ops"], vec!["deploy", "install"]);

        let mut bad = DiscoveryConfig::default();
        bad.scoring.term_boost_weight = -0.1;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_lambda_out_of_range() {
        let mut config = DiscoveryConfig::default();
        config.diversity.lambda = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expansion_bounds() {
        let mut config = DiscoveryConfig::default();
        config.expansion.max_queries = 9;
        assert!(config.validate().is_err());

        config.expansion.max_queries = 6;
        config.expansion.min_queries = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_BROAD_K, "80"),
            (ENV_MAX_IN_FLIGHT, "3"),
            (ENV_MMR_LAMBDA, "0.5"),
            (ENV_GRAPH_ENABLED, "false"),
        ]
        .into_iter()
        .collect();

        let mut config = DiscoveryConfig::default();
        config
            .merge_env_with(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.defaults.broad_k, 80);
        assert_eq!(config.search.max_in_flight, 3);
        assert_eq!(config.diversity.lambda, 0.5);
        assert!(!config.graph.enabled);
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = DiscoveryConfig::default();
        let result = config.merge_env_with(|key| {
            (key == ENV_FOCUS_K).then(|| "many".to_string())
        });
        assert!(matches!(result, Err(DiscoveryError::Config(_))));
    }

    #[test]
    fn test_request_defaults() {
        let defaults = RequestDefaults {
            broad_k: 30,
            focus_k: 5,
            max_bullets: 8,
            max_hops: 1,
        };
        let request = defaults.request("hnsw tuning");
        assert_eq!(request.broad_k, 30);
        assert_eq!(request.focus_k, 5);
        assert_eq!(request.max_bullets, 8);
        assert_eq!(request.max_hops, 1);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("beacon.toml");

        let mut config = DiscoveryConfig::default();
        config.search.timeout_ms = 500;
        config.graph.relationships = Some(vec![RelationshipType::References]);
        config.save_to_path(&path).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("toml.tmp").exists());

        let loaded = DiscoveryConfig::load_from_path(&path).await.unwrap();
        assert_eq!(loaded.search.timeout_ms, 500);
        assert_eq!(
            loaded.graph.relationships,
            Some(vec![RelationshipType::References])
        );
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = DiscoveryConfig::load_from_path(&dir.path().join("absent.toml")).await;
        assert!(matches!(result, Err(DiscoveryError::Config(_))));
    }
}
