//! Contracts for the external services discovery depends on.
//!
//! Discovery never owns an index, a model or a graph. It talks to them
//! through these traits, so transport shells and tests can plug in any
//! implementation.

use crate::error::Result;
use crate::types::{GraphEdge, GraphNode, RelatedNode, SearchHit, TraversalOptions, Vector};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Nearest-neighbour search over named collections.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Names of every known collection.
    async fn collections(&self) -> Result<Vec<String>>;

    /// Top `k` items of `collection` by cosine similarity, best first.
    ///
    /// Returns fewer than `k` hits when the collection is smaller; never
    /// errors for that reason.
    async fn search(&self, collection: &str, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>>;
}

/// Read-only view of the relationship graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn node(&self, node_id: &str) -> Result<Option<GraphNode>>;

    /// Outgoing edges of `node_id` with their target nodes.
    async fn neighbors(&self, node_id: &str) -> Result<Vec<(GraphEdge, GraphNode)>>;

    /// Nodes reachable from `node_id` within the traversal bounds.
    ///
    /// Never returns the start node or anything beyond `options.max_hops`.
    async fn related(&self, node_id: &str, options: &TraversalOptions) -> Result<Vec<RelatedNode>>;
}

/// Embedding model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub provider: String,
    pub model_name: String,
    pub dimension: usize,
}

impl EmbeddingModel {
    pub fn new(provider: impl Into<String>, model_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: provider.into(),
            model_name: model_name.into(),
            dimension,
        }
    }
}

/// Turns query text into the vector space of the collections.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vector>;

    fn model(&self) -> &EmbeddingModel;

    fn dimension(&self) -> usize {
        self.model().dimension
    }
}
