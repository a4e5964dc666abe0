//! Semantic discovery over vector collections.
//!
//! Turns a natural-language question into a ranked, deduplicated,
//! diversity-aware evidence list and an LLM-ready prompt:
//! - Collection selection by glob patterns, then pre-scoring against the query
//! - Deterministic query expansion into 4 to 8 variants
//! - Concurrent, bounded, timeout-guarded search across collections
//! - Exact and near-duplicate removal
//! - Six-factor reranking and MMR diversification
//! - Optional relationship-graph augmentation
//! - Key-sentence compression and a sectioned answer plan in the prompt
//!
//! # Example
//!
//! ```no_run
//! use beacon_core::{DiscoveryRequest, HashingEmbedder};
//! use beacon_discovery::{DiscoveryEngine, InMemoryCollections, StoredItem};
//! use std::sync::Arc;
//!
//! # async fn example() -> beacon_core::Result<()> {
//! let embedder = HashingEmbedder::default();
//! let store = InMemoryCollections::new();
//! store.insert(
//!     "docs",
//!     StoredItem::new("install", "Install the server", embedder.embed_text("Install the server")),
//! );
//!
//! let engine = DiscoveryEngine::builder(Arc::new(store), Arc::new(embedder)).build()?;
//! let result = engine.discover(DiscoveryRequest::new("how to install")).await?;
//! println!("{}", result.prompt);
//! # Ok(())
//! # }
//! ```

pub mod assemble;
pub mod broad;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod diversity;
pub mod expansion;
pub mod filter;
pub mod graph_expand;
pub mod pipeline;
pub mod rerank;
pub mod scoring;
pub mod store;

pub use assemble::{AnswerPlan, Assembled, EvidenceAssembler, PlanSection, SectionKind};
pub use broad::{BroadOutcome, BroadSearch, QueryEmbedding};
pub use cache::{CacheStats, CachedEmbedder};
pub use config::DiscoveryConfig;
pub use dedup::Deduplicator;
pub use diversity::Diversifier;
pub use expansion::{DictionaryExpander, ExpansionDictionary, ExpansionStrategy, QueryExpander};
pub use filter::PatternFilter;
pub use graph_expand::{CentralityOutcome, GraphExpander, GraphOutcome};
pub use pipeline::{DiscoveryEngine, DiscoveryEngineBuilder, PipelineStage};
pub use rerank::{RerankContext, Reranker, ScoreFactor};
pub use scoring::{CollectionScore, CollectionScorer};
pub use store::{InMemoryCollections, StoredItem};

// Re-export commonly used types
pub use beacon_core::{
    DiscoveryError, DiscoveryRequest, DiscoveryResult, Evidence, Relation, Result, Warning,
    WarningKind,
};
