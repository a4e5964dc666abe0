//! Core types for discovery.

use crate::error::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A vector embedding.
pub type Vector = Vec<f32>;

/// Free-form item metadata as returned by the similarity collaborator.
pub type Metadata = HashMap<String, serde_json::Value>;

pub const DEFAULT_BROAD_K: usize = 50;
pub const DEFAULT_FOCUS_K: usize = 15;
pub const DEFAULT_MAX_BULLETS: usize = 20;
pub const DEFAULT_MAX_HOPS: usize = 2;

/// Identity of a retrieved item: unique by `(collection, item id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateKey {
    pub collection: String,
    pub item_id: String,
}

impl CandidateKey {
    pub fn new(collection: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            item_id: item_id.into(),
        }
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.item_id)
    }
}

/// One hit returned by the similarity-search collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub item_id: String,
    pub score: f32,
    pub snippet: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Stored embedding, when the collaborator exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vector>,
}

/// A retrieved item flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub collection: String,
    pub item_id: String,
    /// Raw similarity score reported by the collaborator.
    pub score: f32,
    pub snippet: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vector>,
    /// Attached by the reranker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl Candidate {
    pub fn new(
        collection: impl Into<String>,
        item_id: impl Into<String>,
        score: f32,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            item_id: item_id.into(),
            score,
            snippet: snippet.into(),
            metadata: Metadata::new(),
            embedding: None,
            rerank_score: None,
        }
    }

    pub fn from_hit(collection: impl Into<String>, hit: SearchHit) -> Self {
        Self {
            collection: collection.into(),
            item_id: hit.item_id,
            score: hit.score,
            snippet: hit.snippet,
            metadata: hit.metadata,
            embedding: hit.embedding,
            rerank_score: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_embedding(mut self, embedding: Vector) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn key(&self) -> CandidateKey {
        CandidateKey::new(self.collection.clone(), self.item_id.clone())
    }

    /// Rerank score when present, raw similarity otherwise.
    pub fn final_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.score)
    }
}

/// Descending score, then ascending item id, then ascending collection.
///
/// Total over all inputs, NaN included, so sorts are deterministic.
pub fn rank_order(a_score: f32, a_id: &str, a_col: &str, b_score: f32, b_id: &str, b_col: &str) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| a_id.cmp(b_id))
        .then_with(|| a_col.cmp(b_col))
}

/// Sort candidates by [`rank_order`] on their final score.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        rank_order(
            a.final_score(),
            &a.item_id,
            &a.collection,
            b.final_score(),
            &b.item_id,
            &b.collection,
        )
    });
}

/// How a piece of evidence entered the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    /// Selected by the diversifier.
    Direct,
    /// Reached through the relationship graph.
    Related,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Related => write!(f, "related"),
        }
    }
}

/// One entry of the final evidence list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub collection: String,
    pub item_id: String,
    pub score: f32,
    pub relation: Relation,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    /// Hops from the seed, for related evidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hop_distance: Option<usize>,
    /// Seed item the related evidence was reached from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
}

impl Evidence {
    pub fn direct(candidate: &Candidate) -> Self {
        Self {
            collection: candidate.collection.clone(),
            item_id: candidate.item_id.clone(),
            score: candidate.final_score(),
            relation: Relation::Direct,
            snippet: candidate.snippet.clone(),
            metadata: candidate.metadata.clone(),
            hop_distance: None,
            via: None,
        }
    }

    pub fn key(&self) -> CandidateKey {
        CandidateKey::new(self.collection.clone(), self.item_id.clone())
    }
}

/// Typed relationship between two graph nodes.
///
/// The named variants form the closed base set; `Custom` extends it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Items are semantically similar.
    SimilarTo,
    /// Source references target.
    References,
    /// Source contains target.
    Contains,
    /// Source is derived from target.
    DerivedFrom,
    Custom(String),
}

impl RelationshipType {
    pub fn all() -> Vec<RelationshipType> {
        vec![
            Self::SimilarTo,
            Self::References,
            Self::Contains,
            Self::DerivedFrom,
        ]
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::SimilarTo => "SIMILAR_TO",
            Self::References => "REFERENCES",
            Self::Contains => "CONTAINS",
            Self::DerivedFrom => "DERIVED_FROM",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DiscoveryError::invalid("empty relationship type"));
        }

        let normalized = trimmed.to_ascii_uppercase().replace(['-', ' '], "_");
        Ok(match normalized.as_str() {
            "SIMILAR_TO" | "SIMILARTO" => Self::SimilarTo,
            "REFERENCES" => Self::References,
            "CONTAINS" => Self::Contains,
            "DERIVED_FROM" | "DERIVEDFROM" => Self::DerivedFrom,
            _ => Self::Custom(trimmed.to_string()),
        })
    }
}

/// Addressable unit in the relationship graph, one per stored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub node_type: String,
    /// Owning collection.
    pub collection: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl GraphNode {
    pub fn new(
        id: impl Into<String>,
        node_type: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            collection: collection.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Text shown for this node when it surfaces as related evidence.
    pub fn snippet(&self) -> String {
        ["snippet", "content", "text", "title"]
            .iter()
            .find_map(|key| self.metadata.get(*key).and_then(|v| v.as_str()))
            .unwrap_or_default()
            .to_string()
    }
}

/// Directed, typed, weighted relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub relationship: RelationshipType,
    /// Always within `[0, 1]`.
    pub weight: f32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl GraphEdge {
    /// Create an edge, rejecting weights outside `[0, 1]`.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relationship: RelationshipType,
        weight: f32,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(DiscoveryError::invalid(format!(
                "edge weight {} outside [0, 1]",
                weight
            )));
        }

        let source = source.into();
        let target = target.into();
        Ok(Self {
            id: format!("{}->{}:{}", source, target, relationship),
            source,
            target,
            relationship,
            weight,
            created_at: chrono::Utc::now(),
        })
    }
}

/// Node reached by a bounded traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedNode {
    pub node: GraphNode,
    /// Product of edge weights along the best path.
    pub cumulative_weight: f32,
    pub hop_distance: usize,
}

/// Bounds for a relationship traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalOptions {
    pub max_hops: usize,
    /// Paths whose cumulative weight drops below this are pruned.
    pub min_weight: f32,
    /// Only follow these relationship types; all when `None`.
    pub relationships: Option<Vec<RelationshipType>>,
}

impl TraversalOptions {
    pub fn new(max_hops: usize) -> Self {
        Self {
            max_hops,
            min_weight: 0.0,
            relationships: None,
        }
    }

    pub fn with_min_weight(mut self, min_weight: f32) -> Self {
        self.min_weight = min_weight;
        self
    }

    pub fn with_relationships(mut self, relationships: Vec<RelationshipType>) -> Self {
        self.relationships = Some(relationships);
        self
    }

    pub fn follows(&self, relationship: &RelationshipType) -> bool {
        self.relationships
            .as_ref()
            .is_none_or(|allowed| allowed.contains(relationship))
    }
}

fn default_broad_k() -> usize {
    DEFAULT_BROAD_K
}

fn default_focus_k() -> usize {
    DEFAULT_FOCUS_K
}

fn default_max_bullets() -> usize {
    DEFAULT_MAX_BULLETS
}

fn default_max_hops() -> usize {
    DEFAULT_MAX_HOPS
}

/// One discovery call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub query: String,
    /// Glob patterns; empty means every collection.
    #[serde(default)]
    pub include_collections: Vec<String>,
    #[serde(default)]
    pub exclude_collections: Vec<String>,
    #[serde(default = "default_broad_k")]
    pub broad_k: usize,
    #[serde(default = "default_focus_k")]
    pub focus_k: usize,
    #[serde(default = "default_max_bullets")]
    pub max_bullets: usize,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
}

impl DiscoveryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            include_collections: Vec::new(),
            exclude_collections: Vec::new(),
            broad_k: DEFAULT_BROAD_K,
            focus_k: DEFAULT_FOCUS_K,
            max_bullets: DEFAULT_MAX_BULLETS,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    pub fn include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_collections = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_collections = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn broad_k(mut self, broad_k: usize) -> Self {
        self.broad_k = broad_k;
        self
    }

    pub fn focus_k(mut self, focus_k: usize) -> Self {
        self.focus_k = focus_k;
        self
    }

    pub fn max_bullets(mut self, max_bullets: usize) -> Self {
        self.max_bullets = max_bullets;
        self
    }

    pub fn max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Field-level validation, performed before any collaborator call.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(DiscoveryError::invalid("query must not be empty"));
        }
        if self.broad_k == 0 {
            return Err(DiscoveryError::invalid("broad_k must be at least 1"));
        }
        if self.focus_k == 0 {
            return Err(DiscoveryError::invalid("focus_k must be at least 1"));
        }
        if self.focus_k > self.broad_k {
            return Err(DiscoveryError::invalid(format!(
                "focus_k ({}) must not exceed broad_k ({})",
                self.focus_k, self.broad_k
            )));
        }
        if self.max_bullets == 0 {
            return Err(DiscoveryError::invalid("max_bullets must be at least 1"));
        }
        Ok(())
    }
}

/// Category of a non-fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    CollectionUnavailable,
    ExpansionFailure,
    EmbeddingFailure,
    GraphUnavailable,
    Cancelled,
    Truncated,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CollectionUnavailable => "collection_unavailable",
            Self::ExpansionFailure => "expansion_failure",
            Self::EmbeddingFailure => "embedding_failure",
            Self::GraphUnavailable => "graph_unavailable",
            Self::Cancelled => "cancelled",
            Self::Truncated => "truncated",
        })
    }
}

/// Non-fatal condition attached to a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Counters collected while a request runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryMetrics {
    pub collections_searched: usize,
    pub queries_generated: usize,
    pub search_calls: usize,
    pub failed_calls: usize,
    pub candidates_found: usize,
    pub candidates_after_dedup: usize,
    pub candidates_reranked: usize,
    pub selected: usize,
    pub related_added: usize,
    pub evidence_count: usize,
    pub prompt_tokens_estimate: usize,
    pub total_time_ms: u64,
}

/// Pipeline output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub query: String,
    /// Ordered by descending score, ties by item id.
    pub evidence: Vec<Evidence>,
    pub prompt: String,
    pub warnings: Vec<Warning>,
    pub metrics: DiscoveryMetrics,
}

impl DiscoveryResult {
    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }

    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = DiscoveryRequest::new("vector database install");
        assert_eq!(request.broad_k, 50);
        assert_eq!(request.focus_k, 15);
        assert_eq!(request.max_bullets, 20);
        assert_eq!(request.max_hops, 2);
        assert!(request.include_collections.is_empty());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: DiscoveryRequest = serde_json::from_str(r#"{"query": "hnsw"}"#).unwrap();
        assert_eq!(request, DiscoveryRequest::new("hnsw"));
    }

    #[test]
    fn test_focus_k_above_broad_k_rejected() {
        let err = DiscoveryRequest::new("q")
            .broad_k(10)
            .focus_k(11)
            .validate()
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidRequest(_)));

        assert!(DiscoveryRequest::new("q").broad_k(10).focus_k(10).validate().is_ok());
    }

    #[test]
    fn test_blank_query_rejected() {
        assert!(DiscoveryRequest::new("   ").validate().is_err());
    }

    #[test]
    fn test_edge_weight_bounds() {
        assert!(GraphEdge::new("a", "b", RelationshipType::SimilarTo, 0.0).is_ok());
        assert!(GraphEdge::new("a", "b", RelationshipType::SimilarTo, 1.0).is_ok());
        assert!(GraphEdge::new("a", "b", RelationshipType::SimilarTo, 1.01).is_err());
        assert!(GraphEdge::new("a", "b", RelationshipType::SimilarTo, -0.1).is_err());
        assert!(GraphEdge::new("a", "b", RelationshipType::SimilarTo, f32::NAN).is_err());
    }

    #[test]
    fn test_relationship_type_parsing() {
        assert_eq!("SIMILAR_TO".parse::<RelationshipType>().unwrap(), RelationshipType::SimilarTo);
        assert_eq!("references".parse::<RelationshipType>().unwrap(), RelationshipType::References);
        assert_eq!("derived-from".parse::<RelationshipType>().unwrap(), RelationshipType::DerivedFrom);
        assert_eq!(
            "IMPLEMENTS".parse::<RelationshipType>().unwrap(),
            RelationshipType::Custom("IMPLEMENTS".to_string())
        );
        assert!("".parse::<RelationshipType>().is_err());
    }

    #[test]
    fn test_relationship_type_serde() {
        let json = serde_json::to_string(&RelationshipType::SimilarTo).unwrap();
        assert_eq!(json, "\"SIMILAR_TO\"");
        let parsed: RelationshipType = serde_json::from_str("\"DERIVED_FROM\"").unwrap();
        assert_eq!(parsed, RelationshipType::DerivedFrom);
    }

    #[test]
    fn test_sort_candidates_tie_break() {
        let mut candidates = vec![
            Candidate::new("docs", "b", 0.5, ""),
            Candidate::new("docs", "a", 0.5, ""),
            Candidate::new("docs", "c", 0.9, ""),
        ];
        sort_candidates(&mut candidates);

        let ids: Vec<_> = candidates.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_final_score_prefers_rerank() {
        let mut candidate = Candidate::new("docs", "a", 0.4, "");
        assert_eq!(candidate.final_score(), 0.4);
        candidate.rerank_score = Some(0.8);
        assert_eq!(candidate.final_score(), 0.8);
    }

    #[test]
    fn test_node_snippet_lookup() {
        let node = GraphNode::new("n1", "document", "docs")
            .with_metadata("title", serde_json::json!("Install guide"));
        assert_eq!(node.snippet(), "Install guide");

        let bare = GraphNode::new("n2", "document", "docs");
        assert_eq!(bare.snippet(), "");
    }

    #[test]
    fn test_traversal_filter() {
        let options = TraversalOptions::new(2);
        assert!(options.follows(&RelationshipType::Contains));

        let options = options.with_relationships(vec![RelationshipType::SimilarTo]);
        assert!(options.follows(&RelationshipType::SimilarTo));
        assert!(!options.follows(&RelationshipType::References));
    }
}
