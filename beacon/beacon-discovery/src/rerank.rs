//! Multi-factor reranking.
//!
//! Every candidate gets a weighted sum of six factor scores, each in
//! `[0, 1]`:
//! - semantic: raw similarity, min-max normalized over the pool
//! - lexical: fraction of query keywords present in the snippet
//! - freshness: full score for recent items, exponential decay after
//! - collection priority: configured per-collection weight
//! - metadata boost: explicit boost field, README files raised to a floor
//! - graph centrality: outgoing edge weight, normalized over the pool
//!
//! Weights sum to one, so the combined score stays in `[0, 1]`.

use crate::config::RerankConfig;
use beacon_core::text::{keywords, tokenize};
use beacon_core::types::sort_candidates;
use beacon_core::{Candidate, CandidateKey, DiscoveryError, Metadata, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Per-request inputs shared by all factors.
#[derive(Debug, Clone)]
pub struct RerankContext {
    pub query: String,
    pub keywords: Vec<String>,
    /// Lowest and highest raw score in the pool.
    pub score_range: (f32, f32),
    /// Normalized centrality per candidate; absent means no graph presence.
    pub centrality: HashMap<CandidateKey, f32>,
    pub now: DateTime<Utc>,
}

impl RerankContext {
    pub fn new(query: &str, candidates: &[Candidate]) -> Self {
        let (min, max) = candidates
            .iter()
            .map(|c| c.score)
            .filter(|s| s.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| {
                (lo.min(s), hi.max(s))
            });

        Self {
            query: query.to_string(),
            keywords: keywords(query),
            score_range: if min <= max { (min, max) } else { (0.0, 0.0) },
            centrality: HashMap::new(),
            now: Utc::now(),
        }
    }

    pub fn with_centrality(mut self, centrality: HashMap<CandidateKey, f32>) -> Self {
        self.centrality = centrality;
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// One scoring dimension.
pub trait ScoreFactor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score in `[0, 1]`. Out-of-range values are clamped by the reranker.
    fn score_factor(&self, candidate: &Candidate, ctx: &RerankContext) -> f32;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SemanticFactor;

impl ScoreFactor for SemanticFactor {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn score_factor(&self, candidate: &Candidate, ctx: &RerankContext) -> f32 {
        let (min, max) = ctx.score_range;
        let spread = max - min;
        if spread > f32::EPSILON {
            (candidate.score - min) / spread
        } else {
            // Single candidate or a flat pool
            candidate.score.clamp(0.0, 1.0)
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalFactor;

impl ScoreFactor for LexicalFactor {
    fn name(&self) -> &'static str {
        "lexical"
    }

    fn score_factor(&self, candidate: &Candidate, ctx: &RerankContext) -> f32 {
        if ctx.keywords.is_empty() {
            return 0.0;
        }
        let words: HashSet<String> = tokenize(&candidate.snippet).into_iter().collect();
        let matched = ctx.keywords.iter().filter(|k| words.contains(*k)).count();
        matched as f32 / ctx.keywords.len() as f32
    }
}

#[derive(Debug, Clone)]
pub struct FreshnessFactor {
    pub full_days: f32,
    pub decay_days: f32,
    pub floor: f32,
    pub neutral: f32,
}

impl Default for FreshnessFactor {
    fn default() -> Self {
        Self {
            full_days: 7.0,
            decay_days: 30.0,
            floor: 0.1,
            neutral: 0.5,
        }
    }
}

impl FreshnessFactor {
    fn timestamp(metadata: &Metadata) -> Option<DateTime<Utc>> {
        ["updated_at", "modified_at", "created_at", "timestamp"]
            .iter()
            .filter_map(|key| metadata.get(*key))
            .find_map(|value| match value {
                serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|ts| ts.with_timezone(&Utc)),
                serde_json::Value::Number(n) => {
                    n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0))
                }
                _ => None,
            })
    }
}

impl ScoreFactor for FreshnessFactor {
    fn name(&self) -> &'static str {
        "freshness"
    }

    fn score_factor(&self, candidate: &Candidate, ctx: &RerankContext) -> f32 {
        let Some(timestamp) = Self::timestamp(&candidate.metadata) else {
            return self.neutral;
        };

        let days = ctx.now.signed_duration_since(timestamp).num_seconds() as f32 / 86_400.0;
        if days < self.full_days {
            1.0
        } else {
            (-(days - self.full_days) / self.decay_days)
                .exp()
                .max(self.floor)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectionPriorityFactor {
    priorities: BTreeMap<String, f32>,
    max: f32,
}

impl CollectionPriorityFactor {
    /// Unlisted collections have priority 1.0.
    pub fn new(priorities: BTreeMap<String, f32>) -> Self {
        let max = priorities.values().copied().fold(1.0f32, f32::max);
        Self { priorities, max }
    }
}

impl ScoreFactor for CollectionPriorityFactor {
    fn name(&self) -> &'static str {
        "collection_priority"
    }

    fn score_factor(&self, candidate: &Candidate, _ctx: &RerankContext) -> f32 {
        let priority = self
            .priorities
            .get(&candidate.collection)
            .copied()
            .unwrap_or(1.0);
        if self.max > 0.0 {
            priority / self.max
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataBoostFactor {
    pub field: String,
    pub readme_boost: f32,
}

impl Default for MetadataBoostFactor {
    fn default() -> Self {
        Self {
            field: "boost".to_string(),
            readme_boost: 0.5,
        }
    }
}

impl MetadataBoostFactor {
    fn is_readme(metadata: &Metadata) -> bool {
        ["file_path", "path"]
            .iter()
            .filter_map(|key| metadata.get(*key).and_then(|v| v.as_str()))
            .any(|path| {
                path.rsplit(['/', '\\'])
                    .next()
                    .and_then(|name| name.split('.').next())
                    .is_some_and(|stem| stem.eq_ignore_ascii_case("readme"))
            })
    }
}

impl ScoreFactor for MetadataBoostFactor {
    fn name(&self) -> &'static str {
        "metadata_boost"
    }

    fn score_factor(&self, candidate: &Candidate, _ctx: &RerankContext) -> f32 {
        let explicit = match candidate.metadata.get(&self.field) {
            Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0) as f32,
            Some(serde_json::Value::String(s)) => s.trim().parse::<f32>().unwrap_or(0.0),
            Some(serde_json::Value::Bool(true)) => 1.0,
            _ => 0.0,
        };
        let explicit = if explicit.is_finite() {
            explicit.clamp(0.0, 1.0)
        } else {
            0.0
        };

        if Self::is_readme(&candidate.metadata) {
            explicit.max(self.readme_boost)
        } else {
            explicit
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CentralityFactor;

impl ScoreFactor for CentralityFactor {
    fn name(&self) -> &'static str {
        "graph_centrality"
    }

    fn score_factor(&self, candidate: &Candidate, ctx: &RerankContext) -> f32 {
        ctx.centrality
            .get(&candidate.key())
            .copied()
            .unwrap_or(0.0)
    }
}

/// One factor's contribution to a candidate's score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactorScore {
    pub name: &'static str,
    pub value: f32,
    pub weight: f32,
}

struct WeightedFactor {
    factor: Box<dyn ScoreFactor>,
    weight: f32,
}

/// Weighted combination of [`ScoreFactor`]s.
pub struct Reranker {
    factors: Vec<WeightedFactor>,
}

impl Reranker {
    /// Reranker with no factors; add them with [`Reranker::with_factor`].
    pub fn empty() -> Self {
        Self {
            factors: Vec::new(),
        }
    }

    /// The six standard factors weighted per `config`.
    pub fn from_config(config: &RerankConfig) -> Self {
        let w = &config.weights;
        Self::empty()
            .with_factor(SemanticFactor, w.semantic)
            .with_factor(LexicalFactor, w.lexical)
            .with_factor(
                FreshnessFactor {
                    full_days: config.freshness_full_days,
                    decay_days: config.freshness_decay_days,
                    floor: config.freshness_floor,
                    neutral: config.freshness_neutral,
                },
                w.freshness,
            )
            .with_factor(
                CollectionPriorityFactor::new(config.collection_priority.clone()),
                w.collection_priority,
            )
            .with_factor(
                MetadataBoostFactor {
                    field: config.boost_field.clone(),
                    readme_boost: config.readme_boost,
                },
                w.metadata_boost,
            )
            .with_factor(CentralityFactor, w.graph_centrality)
    }

    pub fn with_factor(mut self, factor: impl ScoreFactor + 'static, weight: f32) -> Self {
        self.factors.push(WeightedFactor {
            factor: Box::new(factor),
            weight,
        });
        self
    }

    /// Check that weights are non-negative and sum to one.
    pub fn validate(&self) -> Result<()> {
        if self.factors.is_empty() {
            return Err(DiscoveryError::config("reranker has no factors"));
        }
        if let Some(bad) = self
            .factors
            .iter()
            .find(|f| !f.weight.is_finite() || f.weight < 0.0)
        {
            return Err(DiscoveryError::config(format!(
                "factor '{}' has invalid weight {}",
                bad.factor.name(),
                bad.weight
            )));
        }
        let sum: f32 = self.factors.iter().map(|f| f.weight).sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(DiscoveryError::config(format!(
                "factor weights must sum to 1.0, got {:.4}",
                sum
            )));
        }
        Ok(())
    }

    pub fn factor_names(&self) -> Vec<&'static str> {
        self.factors.iter().map(|f| f.factor.name()).collect()
    }

    /// Per-factor breakdown for one candidate.
    pub fn explain(&self, candidate: &Candidate, ctx: &RerankContext) -> Vec<FactorScore> {
        self.factors
            .iter()
            .map(|f| FactorScore {
                name: f.factor.name(),
                value: clamp_unit(f.factor.score_factor(candidate, ctx)),
                weight: f.weight,
            })
            .collect()
    }

    pub fn score(&self, candidate: &Candidate, ctx: &RerankContext) -> f32 {
        let total: f32 = self
            .factors
            .iter()
            .map(|f| f.weight * clamp_unit(f.factor.score_factor(candidate, ctx)))
            .sum();
        clamp_unit(total)
    }

    /// Attach a rerank score to every candidate and sort by it, ties broken
    /// by item id.
    pub fn rerank(&self, mut candidates: Vec<Candidate>, ctx: &RerankContext) -> Vec<Candidate> {
        for candidate in &mut candidates {
            candidate.rerank_score = Some(self.score(candidate, ctx));
        }
        sort_candidates(&mut candidates);

        debug!(
            candidates = candidates.len(),
            top = candidates.first().map(|c| c.final_score()),
            "Reranking complete"
        );

        candidates
    }
}

impl Default for Reranker {
    fn default() -> Self {
        Self::from_config(&RerankConfig::default())
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
