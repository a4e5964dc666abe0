//! Core types for Beacon semantic discovery.
//!
//! This crate holds everything the discovery pipeline and its collaborators
//! agree on:
//! - The data model: requests, candidates, evidence, graph nodes and edges
//! - The error enum and the warning values non-fatal failures degrade into
//! - Async contracts for similarity search, graph reads and embeddings
//! - Small vector and text helpers used by several stages

pub mod collaborators;
pub mod embedding;
pub mod error;
pub mod similarity;
pub mod text;
pub mod types;

pub use collaborators::{EmbeddingModel, EmbeddingProvider, GraphStore, SimilaritySearch};
pub use embedding::HashingEmbedder;
pub use error::{DiscoveryError, Result};
pub use types::{
    Candidate, CandidateKey, DiscoveryMetrics, DiscoveryRequest, DiscoveryResult, Evidence,
    GraphEdge, GraphNode, Metadata, RelatedNode, Relation, RelationshipType, SearchHit,
    TraversalOptions, Vector, Warning, WarningKind,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::collaborators::{EmbeddingProvider, GraphStore, SimilaritySearch};
    pub use crate::error::{DiscoveryError, Result};
    pub use crate::types::{
        Candidate, DiscoveryRequest, DiscoveryResult, Evidence, GraphEdge, GraphNode, Relation,
        RelationshipType,
    };
}
