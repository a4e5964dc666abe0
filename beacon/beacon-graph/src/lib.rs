//! Relationship graph for Beacon.
//!
//! Provides the typed, weighted, directed graph discovery reads related
//! evidence from:
//! - Node and edge maintenance (the write path; discovery never calls it)
//! - Bounded breadth-first traversal with cumulative-weight pruning
//! - Shortest paths and connected components for inspection
//! - JSON snapshots for persistence
//!
//! [`RelationshipGraph`] implements [`beacon_core::GraphStore`], so it can
//! be handed to the discovery engine directly.

pub mod graph;
pub mod store;

pub use graph::{GraphSnapshot, GraphStats, RelationshipGraph};
