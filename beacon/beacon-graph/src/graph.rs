//! In-process relationship graph.
//!
//! Nodes live in a table keyed by their stable string id; edges are stored
//! once and referenced from an outgoing adjacency list keyed by source id
//! and an incoming list keyed by target id. Edges may form cycles, so every
//! traversal tracks a visited set.

use beacon_core::error::{DiscoveryError, Result};
use beacon_core::types::{GraphEdge, GraphNode, RelatedNode, RelationshipType, TraversalOptions};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<String, GraphNode>,
    edges: HashMap<String, GraphEdge>,
    /// node id -> outgoing edge ids, in insertion order
    adjacency: HashMap<String, Vec<String>>,
    /// node id -> incoming edge ids
    reverse_adjacency: HashMap<String, Vec<String>>,
}

impl GraphState {
    fn outgoing(&self, node_id: &str) -> impl Iterator<Item = &GraphEdge> {
        self.adjacency
            .get(node_id)
            .into_iter()
            .flatten()
            .filter_map(|edge_id| self.edges.get(edge_id))
    }

    fn incoming(&self, node_id: &str) -> impl Iterator<Item = &GraphEdge> {
        self.reverse_adjacency
            .get(node_id)
            .into_iter()
            .flatten()
            .filter_map(|edge_id| self.edges.get(edge_id))
    }

    fn detach_edge(&mut self, edge_id: &str) -> Option<GraphEdge> {
        let edge = self.edges.remove(edge_id)?;
        if let Some(ids) = self.adjacency.get_mut(&edge.source) {
            ids.retain(|id| id != edge_id);
        }
        if let Some(ids) = self.reverse_adjacency.get_mut(&edge.target) {
            ids.retain(|id| id != edge_id);
        }
        Some(edge)
    }
}

/// Serializable snapshot of a graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Size summary of a graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub edges_by_relationship: BTreeMap<String, usize>,
}

/// Relationship graph shared behind an `Arc` by the write path and readers.
#[derive(Debug, Default)]
pub struct RelationshipGraph {
    state: RwLock<GraphState>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a snapshot, validating every edge.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        let graph = Self::new();
        for node in snapshot.nodes {
            graph.add_node(node);
        }
        for edge in snapshot.edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let state = self.state.read();
        let mut nodes: Vec<_> = state.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut edges: Vec<_> = state.edges.values().cloned().collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        GraphSnapshot { nodes, edges }
    }

    /// Insert or replace a node.
    pub fn add_node(&self, node: GraphNode) {
        let mut state = self.state.write();
        if state.nodes.contains_key(&node.id) {
            debug!("Updating existing node '{}'", node.id);
        } else {
            debug!("Adding node '{}' ({}) in collection '{}'", node.id, node.node_type, node.collection);
        }
        state.nodes.insert(node.id.clone(), node);
    }

    /// Insert or replace an edge. Both endpoints must already exist.
    pub fn add_edge(&self, edge: GraphEdge) -> Result<()> {
        if !(0.0..=1.0).contains(&edge.weight) {
            return Err(DiscoveryError::invalid(format!(
                "edge '{}' weight {} outside [0, 1]",
                edge.id, edge.weight
            )));
        }

        let mut state = self.state.write();
        if !state.nodes.contains_key(&edge.source) {
            return Err(DiscoveryError::NotFound(format!(
                "source node '{}'",
                edge.source
            )));
        }
        if !state.nodes.contains_key(&edge.target) {
            return Err(DiscoveryError::NotFound(format!(
                "target node '{}'",
                edge.target
            )));
        }

        if state.detach_edge(&edge.id).is_some() {
            debug!("Updating existing edge '{}'", edge.id);
        } else {
            debug!(
                "Adding edge '{}' ({}) from '{}' to '{}'",
                edge.id, edge.relationship, edge.source, edge.target
            );
        }

        state
            .adjacency
            .entry(edge.source.clone())
            .or_default()
            .push(edge.id.clone());
        state
            .reverse_adjacency
            .entry(edge.target.clone())
            .or_default()
            .push(edge.id.clone());
        state.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&self, node_id: &str) -> Result<GraphNode> {
        let mut state = self.state.write();
        if !state.nodes.contains_key(node_id) {
            return Err(DiscoveryError::NotFound(format!("node '{}'", node_id)));
        }

        let edge_ids: Vec<String> = state
            .adjacency
            .get(node_id)
            .into_iter()
            .chain(state.reverse_adjacency.get(node_id))
            .flatten()
            .cloned()
            .collect();

        for edge_id in &edge_ids {
            state.detach_edge(edge_id);
        }
        state.adjacency.remove(node_id);
        state.reverse_adjacency.remove(node_id);

        let node = state
            .nodes
            .remove(node_id)
            .ok_or_else(|| DiscoveryError::NotFound(format!("node '{}'", node_id)))?;

        info!("Removed node '{}' and {} edges", node_id, edge_ids.len());
        Ok(node)
    }

    pub fn remove_edge(&self, edge_id: &str) -> Result<GraphEdge> {
        self.state
            .write()
            .detach_edge(edge_id)
            .ok_or_else(|| DiscoveryError::NotFound(format!("edge '{}'", edge_id)))
    }

    pub fn get_node(&self, node_id: &str) -> Option<GraphNode> {
        self.state.read().nodes.get(node_id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.state.read().edges.len()
    }

    pub fn stats(&self) -> GraphStats {
        let state = self.state.read();
        let mut edges_by_relationship = BTreeMap::new();
        for edge in state.edges.values() {
            *edges_by_relationship
                .entry(edge.relationship.to_string())
                .or_insert(0) += 1;
        }
        GraphStats {
            node_count: state.nodes.len(),
            edge_count: state.edges.len(),
            edges_by_relationship,
        }
    }

    /// Outgoing edges of a node with their targets, optionally filtered by type.
    pub fn get_neighbors(
        &self,
        node_id: &str,
        relationship: Option<&RelationshipType>,
    ) -> Result<Vec<(GraphEdge, GraphNode)>> {
        let state = self.state.read();
        if !state.nodes.contains_key(node_id) {
            return Err(DiscoveryError::NotFound(format!("node '{}'", node_id)));
        }

        Ok(state
            .outgoing(node_id)
            .filter(|edge| relationship.is_none_or(|rel| &edge.relationship == rel))
            .filter_map(|edge| {
                state
                    .nodes
                    .get(&edge.target)
                    .map(|target| (edge.clone(), target.clone()))
            })
            .collect())
    }

    /// Nodes reachable from `node_id` within the traversal bounds.
    ///
    /// Breadth-first by hop count. A node is reported at its shortest hop
    /// distance with the best cumulative weight (product of edge weights)
    /// among paths of that length. Any extension whose cumulative weight
    /// falls below `options.min_weight` is pruned. Results are ordered by
    /// weight descending, then hop distance, then id.
    pub fn find_related(&self, node_id: &str, options: &TraversalOptions) -> Result<Vec<RelatedNode>> {
        let state = self.state.read();
        if !state.nodes.contains_key(node_id) {
            return Err(DiscoveryError::NotFound(format!("node '{}'", node_id)));
        }

        let mut visited: HashSet<String> = HashSet::from([node_id.to_string()]);
        let mut frontier: BTreeMap<String, f32> = BTreeMap::from([(node_id.to_string(), 1.0)]);
        let mut results = Vec::new();

        for hop in 1..=options.max_hops {
            let mut next: BTreeMap<String, f32> = BTreeMap::new();

            for (current, weight) in &frontier {
                for edge in state.outgoing(current) {
                    if !options.follows(&edge.relationship) || visited.contains(&edge.target) {
                        continue;
                    }
                    let cumulative = weight * edge.weight;
                    if cumulative < options.min_weight {
                        continue;
                    }
                    next.entry(edge.target.clone())
                        .and_modify(|best| *best = best.max(cumulative))
                        .or_insert(cumulative);
                }
            }

            if next.is_empty() {
                break;
            }

            for (id, weight) in &next {
                visited.insert(id.clone());
                if let Some(node) = state.nodes.get(id) {
                    results.push(RelatedNode {
                        node: node.clone(),
                        cumulative_weight: *weight,
                        hop_distance: hop,
                    });
                }
            }
            frontier = next;
        }

        results.sort_by(|a, b| {
            b.cumulative_weight
                .total_cmp(&a.cumulative_weight)
                .then(a.hop_distance.cmp(&b.hop_distance))
                .then_with(|| a.node.id.cmp(&b.node.id))
        });

        Ok(results)
    }

    /// Shortest path (by hops) following outgoing edges.
    pub fn find_path(&self, source: &str, target: &str) -> Result<Vec<GraphNode>> {
        let state = self.state.read();
        for id in [source, target] {
            if !state.nodes.contains_key(id) {
                return Err(DiscoveryError::NotFound(format!("node '{}'", id)));
            }
        }

        let mut visited: HashSet<&str> = HashSet::from([source]);
        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut queue = VecDeque::from([source]);

        while let Some(current) = queue.pop_front() {
            if current == target {
                let mut path = Vec::new();
                let mut cursor = Some(target);
                while let Some(id) = cursor {
                    if let Some(node) = state.nodes.get(id) {
                        path.push(node.clone());
                    }
                    cursor = parent.get(id).copied();
                }
                path.reverse();
                return Ok(path);
            }

            for edge in state.outgoing(current) {
                if visited.insert(edge.target.as_str()) {
                    parent.insert(edge.target.as_str(), current);
                    queue.push_back(edge.target.as_str());
                }
            }
        }

        Err(DiscoveryError::NotFound(format!(
            "path from '{}' to '{}'",
            source, target
        )))
    }

    /// Weakly connected components, each sorted, largest first.
    pub fn connected_components(&self) -> Vec<Vec<String>> {
        let state = self.state.read();
        let mut ids: Vec<&String> = state.nodes.keys().collect();
        ids.sort();

        let mut visited: HashSet<&str> = HashSet::new();
        let mut components = Vec::new();

        for start in ids {
            if !visited.insert(start.as_str()) {
                continue;
            }

            let mut component = Vec::new();
            let mut queue = VecDeque::from([start.as_str()]);
            while let Some(current) = queue.pop_front() {
                component.push(current.to_string());
                let neighbours = state
                    .outgoing(current)
                    .map(|edge| edge.target.as_str())
                    .chain(state.incoming(current).map(|edge| edge.source.as_str()));
                for next in neighbours {
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }

            component.sort();
            components.push(component);
        }

        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        components
    }

    /// Persist the graph as JSON using write-to-temp then rename.
    pub async fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        debug!("Saving graph to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_vec_pretty(&self.snapshot())?;
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, path).await?;

        info!(
            "Graph saved to {} ({} nodes, {} edges)",
            path.display(),
            self.node_count(),
            self.edge_count()
        );
        Ok(())
    }

    pub async fn load_from_file(path: &std::path::Path) -> Result<Self> {
        debug!("Loading graph from: {}", path.display());
        let content = tokio::fs::read(path).await?;
        let snapshot: GraphSnapshot = serde_json::from_slice(&content)?;
        let graph = Self::from_snapshot(snapshot)?;
        info!(
            "Graph loaded from {} ({} nodes, {} edges)",
            path.display(),
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn node(id: &str) -> GraphNode {
        GraphNode::new(id, "document", "docs")
    }

    fn edge(source: &str, target: &str, rel: RelationshipType, weight: f32) -> GraphEdge {
        GraphEdge::new(source, target, rel, weight).unwrap()
    }

    fn graph_with(nodes: &[&str]) -> RelationshipGraph {
        let graph = RelationshipGraph::new();
        for id in nodes {
            graph.add_node(node(id));
        }
        graph
    }

    #[test]
    fn test_add_edge_requires_endpoints() {
        let graph = graph_with(&["a"]);
        let err = graph
            .add_edge(edge("a", "missing", RelationshipType::References, 0.5))
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound(_)));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_add_edge_rejects_bad_weight() {
        let graph = graph_with(&["a", "b"]);
        let mut bad = edge("a", "b", RelationshipType::References, 0.5);
        bad.weight = 1.5;
        assert!(graph.add_edge(bad).is_err());
    }

    #[test]
    fn test_replacing_edge_keeps_single_adjacency_entry() {
        let graph = graph_with(&["a", "b"]);
        graph.add_edge(edge("a", "b", RelationshipType::SimilarTo, 0.5)).unwrap();
        graph.add_edge(edge("a", "b", RelationshipType::SimilarTo, 0.9)).unwrap();

        let neighbors = graph.get_neighbors("a", None).unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_relative_eq!(neighbors[0].0.weight, 0.9);
    }

    #[test]
    fn test_neighbors_filtered_by_relationship() {
        let graph = graph_with(&["a", "b", "c"]);
        graph.add_edge(edge("a", "b", RelationshipType::SimilarTo, 0.8)).unwrap();
        graph.add_edge(edge("a", "c", RelationshipType::References, 0.3)).unwrap();

        assert_eq!(graph.get_neighbors("a", None).unwrap().len(), 2);
        let similar = graph
            .get_neighbors("a", Some(&RelationshipType::SimilarTo))
            .unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].1.id, "b");
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let graph = graph_with(&["a", "b", "c"]);
        graph.add_edge(edge("a", "b", RelationshipType::SimilarTo, 0.8)).unwrap();
        graph.add_edge(edge("b", "c", RelationshipType::SimilarTo, 0.8)).unwrap();

        graph.remove_node("b").unwrap();
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.get_neighbors("a", None).unwrap().is_empty());
        assert!(graph.remove_node("b").is_err());
    }

    #[test]
    fn test_remove_edge() {
        let graph = graph_with(&["a", "b"]);
        let e = edge("a", "b", RelationshipType::Contains, 1.0);
        let id = e.id.clone();
        graph.add_edge(e).unwrap();

        graph.remove_edge(&id).unwrap();
        assert!(graph.get_neighbors("a", None).unwrap().is_empty());
        assert!(graph.remove_edge(&id).is_err());
    }

    #[test]
    fn test_related_handles_cycles() {
        let graph = graph_with(&["a", "b", "c"]);
        graph.add_edge(edge("a", "b", RelationshipType::SimilarTo, 0.9)).unwrap();
        graph.add_edge(edge("b", "c", RelationshipType::SimilarTo, 0.9)).unwrap();
        graph.add_edge(edge("c", "a", RelationshipType::SimilarTo, 0.9)).unwrap();

        let related = graph.find_related("a", &TraversalOptions::new(10)).unwrap();
        let ids: Vec<_> = related.iter().map(|r| r.node.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(related[1].hop_distance, 2);
        assert_relative_eq!(related[1].cumulative_weight, 0.81, epsilon = 1e-6);
    }

    #[test]
    fn test_related_respects_max_hops() {
        let graph = graph_with(&["a", "b", "c", "d"]);
        graph.add_edge(edge("a", "b", RelationshipType::References, 1.0)).unwrap();
        graph.add_edge(edge("b", "c", RelationshipType::References, 1.0)).unwrap();
        graph.add_edge(edge("c", "d", RelationshipType::References, 1.0)).unwrap();

        let related = graph.find_related("a", &TraversalOptions::new(2)).unwrap();
        assert_eq!(related.len(), 2);
        assert!(related.iter().all(|r| r.hop_distance <= 2));

        assert!(graph.find_related("a", &TraversalOptions::new(0)).unwrap().is_empty());
    }

    #[test]
    fn test_related_prunes_below_floor() {
        let graph = graph_with(&["a", "b", "c"]);
        graph.add_edge(edge("a", "b", RelationshipType::SimilarTo, 0.5)).unwrap();
        graph.add_edge(edge("b", "c", RelationshipType::SimilarTo, 0.3)).unwrap();

        let options = TraversalOptions::new(2).with_min_weight(0.2);
        let related = graph.find_related("a", &options).unwrap();
        let ids: Vec<_> = related.iter().map(|r| r.node.id.as_str()).collect();
        // 0.5 * 0.3 = 0.15 < 0.2
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn test_related_prefers_best_weight_at_same_hop() {
        let graph = graph_with(&["a", "b", "c", "d"]);
        graph.add_edge(edge("a", "b", RelationshipType::SimilarTo, 0.9)).unwrap();
        graph.add_edge(edge("a", "c", RelationshipType::SimilarTo, 0.4)).unwrap();
        graph.add_edge(edge("b", "d", RelationshipType::SimilarTo, 0.5)).unwrap();
        graph.add_edge(edge("c", "d", RelationshipType::SimilarTo, 1.0)).unwrap();

        let related = graph.find_related("a", &TraversalOptions::new(2)).unwrap();
        let d = related.iter().find(|r| r.node.id == "d").unwrap();
        assert_eq!(d.hop_distance, 2);
        assert_relative_eq!(d.cumulative_weight, 0.45, epsilon = 1e-6);
    }

    #[test]
    fn test_related_unknown_node() {
        let graph = RelationshipGraph::new();
        assert!(matches!(
            graph.find_related("ghost", &TraversalOptions::new(2)),
            Err(DiscoveryError::NotFound(_))
        ));
    }

    #[test]
    fn test_find_path() {
        let graph = graph_with(&["a", "b", "c", "d"]);
        graph.add_edge(edge("a", "b", RelationshipType::References, 0.5)).unwrap();
        graph.add_edge(edge("b", "c", RelationshipType::References, 0.5)).unwrap();

        let path = graph.find_path("a", "c").unwrap();
        let ids: Vec<_> = path.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        assert!(graph.find_path("a", "d").is_err());
    }

    #[test]
    fn test_connected_components() {
        let graph = graph_with(&["a", "b", "c", "x", "y"]);
        graph.add_edge(edge("a", "b", RelationshipType::References, 0.5)).unwrap();
        graph.add_edge(edge("c", "b", RelationshipType::References, 0.5)).unwrap();
        graph.add_edge(edge("x", "y", RelationshipType::Contains, 0.5)).unwrap();

        let components = graph.connected_components();
        assert_eq!(components, vec![vec!["a", "b", "c"], vec!["x", "y"]]);
    }

    #[test]
    fn test_stats() {
        let graph = graph_with(&["a", "b", "c"]);
        graph.add_edge(edge("a", "b", RelationshipType::SimilarTo, 0.8)).unwrap();
        graph.add_edge(edge("a", "c", RelationshipType::References, 0.3)).unwrap();

        let stats = graph.stats();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.edge_count, 2);
        assert_eq!(stats.edges_by_relationship.get("SIMILAR_TO"), Some(&1));
    }
}
