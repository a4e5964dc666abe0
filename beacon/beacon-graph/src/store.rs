//! Graph collaborator implementation over [`RelationshipGraph`].

use crate::graph::RelationshipGraph;
use async_trait::async_trait;
use beacon_core::collaborators::GraphStore;
use beacon_core::error::Result;
use beacon_core::types::{GraphEdge, GraphNode, RelatedNode, TraversalOptions};

#[async_trait]
impl GraphStore for RelationshipGraph {
    async fn node(&self, node_id: &str) -> Result<Option<GraphNode>> {
        Ok(self.get_node(node_id))
    }

    async fn neighbors(&self, node_id: &str) -> Result<Vec<(GraphEdge, GraphNode)>> {
        self.get_neighbors(node_id, None)
    }

    async fn related(&self, node_id: &str, options: &TraversalOptions) -> Result<Vec<RelatedNode>> {
        self.find_related(node_id, options)
    }
}
