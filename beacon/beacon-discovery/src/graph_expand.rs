//! Graph augmentation of the selected set.
//!
//! Each selected item seeds a bounded traversal of the relationship graph.
//! Reached nodes become related evidence scored `seed score × path weight`.
//! A seed is only traversed when its graph node belongs to the seed's own
//! collection, and reached nodes outside the searched collections are
//! dropped.
//! A graph that reports itself unavailable skips the stage with a warning;
//! it never fails the request.

use beacon_core::{
    Candidate, CandidateKey, DiscoveryError, Evidence, GraphStore, RelatedNode, Relation,
    RelationshipType, Result, TraversalOptions, Warning, WarningKind,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Related evidence gathered from the graph.
#[derive(Debug, Clone, Default)]
pub struct GraphOutcome {
    /// Sorted by derived score, ties by item id.
    pub related: Vec<Evidence>,
    pub warnings: Vec<Warning>,
    /// The graph reported itself unavailable.
    pub unavailable: bool,
}

/// Normalized centrality per candidate.
#[derive(Debug, Clone, Default)]
pub struct CentralityOutcome {
    pub scores: HashMap<CandidateKey, f32>,
    pub warnings: Vec<Warning>,
    pub unavailable: bool,
}

pub struct GraphExpander {
    graph: Arc<dyn GraphStore>,
    min_path_weight: f32,
    max_in_flight: usize,
    timeout: Duration,
    relationships: Option<Vec<RelationshipType>>,
}

impl GraphExpander {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            graph,
            min_path_weight: 0.2,
            max_in_flight: 8,
            timeout: Duration::from_millis(1000),
            relationships: None,
        }
    }

    pub fn with_min_path_weight(mut self, min_path_weight: f32) -> Self {
        self.min_path_weight = min_path_weight;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_relationships(mut self, relationships: Option<Vec<RelationshipType>>) -> Self {
        self.relationships = relationships;
        self
    }

    fn traversal_options(&self, max_hops: usize) -> TraversalOptions {
        let options = TraversalOptions::new(max_hops).with_min_weight(self.min_path_weight);
        match &self.relationships {
            Some(allowed) => options.with_relationships(allowed.clone()),
            None => options,
        }
    }

    /// Run one graph call per item concurrently, bounded and with timeouts.
    ///
    /// Stops early on cancellation; completed calls are kept.
    async fn fan_out<T, F, Fut>(
        &self,
        items: &[Candidate],
        cancel: &CancellationToken,
        call: F,
    ) -> (Vec<(usize, Result<T>)>, bool)
    where
        F: Fn(Arc<dyn GraphStore>, CandidateKey) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut pending = FuturesUnordered::new();

        for (index, item) in items.iter().enumerate() {
            let semaphore = semaphore.clone();
            let fut = call(self.graph.clone(), item.key());
            let timeout = self.timeout;
            pending.push(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => match tokio::time::timeout(timeout, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(DiscoveryError::Timeout(format!(
                            "graph call exceeded {}ms",
                            timeout.as_millis()
                        ))),
                    },
                    Err(_) => Err(DiscoveryError::graph_unavailable("graph pool closed")),
                };
                (index, result)
            });
        }

        let mut results = Vec::with_capacity(items.len());
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = pending.next() => match next {
                    Some(entry) => results.push(entry),
                    None => break,
                }
            }
        }
        (results, cancelled)
    }

    /// Expand from `seeds` up to `max_hops` hops.
    ///
    /// Only nodes owned by one of `collections` become related evidence.
    /// Nodes that are themselves seeds are left out. A node reached from
    /// several seeds keeps its highest derived score, then its shortest hop.
    pub async fn expand(
        &self,
        seeds: &[Candidate],
        collections: &[String],
        max_hops: usize,
        cancel: &CancellationToken,
    ) -> GraphOutcome {
        let mut outcome = GraphOutcome::default();
        if max_hops == 0 || seeds.is_empty() {
            return outcome;
        }

        let options = Arc::new(self.traversal_options(max_hops));
        let (results, cancelled) = self
            .fan_out(seeds, cancel, |graph, key| {
                let options = options.clone();
                async move { owned_related(graph, key, &options).await }
            })
            .await;

        let allowed: HashSet<&str> = collections.iter().map(String::as_str).collect();
        let seed_keys: HashSet<CandidateKey> = seeds.iter().map(Candidate::key).collect();
        let mut merged: HashMap<CandidateKey, Evidence> = HashMap::new();
        let mut timeouts = 0usize;
        let mut errors = Vec::new();

        for (index, result) in results {
            let seed = &seeds[index];
            match result {
                Ok(nodes) => {
                    for related in nodes {
                        if related.hop_distance == 0 || related.hop_distance > max_hops {
                            continue;
                        }
                        if !allowed.contains(related.node.collection.as_str()) {
                            debug!(
                                node = %related.node.id,
                                collection = %related.node.collection,
                                "Related node outside searched collections"
                            );
                            continue;
                        }
                        self.merge(&mut merged, &seed_keys, seed, related);
                    }
                }
                Err(DiscoveryError::NotFound(_)) => {
                    debug!(seed = %seed.item_id, "Seed has no graph node");
                }
                Err(DiscoveryError::GraphUnavailable(reason)) => {
                    outcome.unavailable = true;
                    errors.push(reason);
                }
                Err(DiscoveryError::Timeout(reason)) => {
                    warn!("Graph traversal timed out for seed {}: {}", seed.item_id, reason);
                    timeouts += 1;
                }
                Err(e) => {
                    warn!("Graph traversal failed for seed {}: {}", seed.item_id, e);
                    errors.push(e.to_string());
                }
            }
        }

        if outcome.unavailable {
            let reason = errors.first().cloned().unwrap_or_default();
            warn!("Graph unavailable, skipping augmentation: {}", reason);
            outcome.warnings.push(Warning::new(
                WarningKind::GraphUnavailable,
                format!("graph unavailable, related evidence skipped: {}", reason),
            ));
            return outcome;
        }

        if timeouts > 0 {
            outcome.warnings.push(Warning::new(
                WarningKind::GraphUnavailable,
                format!("graph traversal timed out for {} of {} seeds", timeouts, seeds.len()),
            ));
        }
        if !errors.is_empty() {
            outcome.warnings.push(Warning::new(
                WarningKind::GraphUnavailable,
                format!(
                    "graph traversal failed for {} of {} seeds: {}",
                    errors.len(),
                    seeds.len(),
                    errors[0]
                ),
            ));
        }
        if cancelled {
            outcome.warnings.push(Warning::new(
                WarningKind::Cancelled,
                "graph augmentation cancelled; partial related evidence kept",
            ));
        }

        let mut related: Vec<Evidence> = merged.into_values().collect();
        related.sort_by(|a, b| {
            beacon_core::types::rank_order(
                a.score,
                &a.item_id,
                &a.collection,
                b.score,
                &b.item_id,
                &b.collection,
            )
        });

        info!(
            "Graph augmentation added {} related items from {} seeds",
            related.len(),
            seeds.len()
        );

        outcome.related = related;
        outcome
    }

    fn merge(
        &self,
        merged: &mut HashMap<CandidateKey, Evidence>,
        seed_keys: &HashSet<CandidateKey>,
        seed: &Candidate,
        related: RelatedNode,
    ) {
        let key = CandidateKey::new(related.node.collection.clone(), related.node.id.clone());
        if seed_keys.contains(&key) {
            return;
        }

        let score = (seed.final_score() * related.cumulative_weight).clamp(0.0, 1.0);
        let better = match merged.get(&key) {
            Some(existing) => {
                let existing_hop = existing.hop_distance.unwrap_or(usize::MAX);
                score > existing.score
                    || (score == existing.score && related.hop_distance < existing_hop)
                    || (score == existing.score
                        && related.hop_distance == existing_hop
                        && Some(&seed.item_id) < existing.via.as_ref())
            }
            None => true,
        };

        if better {
            let snippet = related.node.snippet();
            merged.insert(
                key,
                Evidence {
                    collection: related.node.collection,
                    item_id: related.node.id,
                    score,
                    relation: Relation::Related,
                    snippet,
                    metadata: related.node.metadata,
                    hop_distance: Some(related.hop_distance),
                    via: Some(seed.item_id.clone()),
                },
            );
        }
    }

    /// Centrality of each candidate: the summed weight of its outgoing
    /// edges divided by the largest sum in the pool.
    ///
    /// Candidates without a node in the graph, or whose node belongs to
    /// another collection, score 0.
    pub async fn centrality(
        &self,
        candidates: &[Candidate],
        cancel: &CancellationToken,
    ) -> CentralityOutcome {
        let mut outcome = CentralityOutcome::default();
        if candidates.is_empty() {
            return outcome;
        }

        let (results, cancelled) = self
            .fan_out(candidates, cancel, outgoing_weight)
            .await;

        let mut raw: HashMap<CandidateKey, f32> = HashMap::new();
        let mut failures = 0usize;
        for (index, result) in results {
            let candidate = &candidates[index];
            match result {
                Ok(Some(weight)) => {
                    raw.insert(candidate.key(), weight);
                }
                Ok(_) | Err(DiscoveryError::NotFound(_)) => {}
                Err(DiscoveryError::GraphUnavailable(reason)) => {
                    warn!("Graph unavailable during centrality lookup: {}", reason);
                    outcome.unavailable = true;
                    outcome.warnings.push(Warning::new(
                        WarningKind::GraphUnavailable,
                        format!("graph unavailable, centrality skipped: {}", reason),
                    ));
                    outcome.scores.clear();
                    return outcome;
                }
                Err(e) => {
                    debug!("Centrality lookup failed for {}: {}", candidate.item_id, e);
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            outcome.warnings.push(Warning::new(
                WarningKind::GraphUnavailable,
                format!("centrality lookup failed for {} of {} candidates", failures, candidates.len()),
            ));
        }
        if cancelled {
            outcome.warnings.push(Warning::new(
                WarningKind::Cancelled,
                "centrality lookup cancelled",
            ));
        }

        let max = raw.values().copied().fold(0.0f32, f32::max);
        if max > 0.0 {
            outcome.scores = raw.into_iter().map(|(k, w)| (k, w / max)).collect();
        }

        outcome
    }
}

/// Whether the graph holds a node for `key` owned by the key's collection.
async fn owns(graph: &dyn GraphStore, key: &CandidateKey) -> Result<bool> {
    match graph.node(&key.item_id).await? {
        Some(node) if node.collection == key.collection => Ok(true),
        Some(node) => {
            debug!(
                seed = %key,
                owner = %node.collection,
                "Graph node belongs to another collection"
            );
            Ok(false)
        }
        None => Ok(false),
    }
}

/// Nodes related to the seed's own graph node; none when the node is
/// missing or owned by another collection.
async fn owned_related(
    graph: Arc<dyn GraphStore>,
    key: CandidateKey,
    options: &TraversalOptions,
) -> Result<Vec<RelatedNode>> {
    if !owns(graph.as_ref(), &key).await? {
        return Err(DiscoveryError::NotFound(key.to_string()));
    }
    graph.related(&key.item_id, options).await
}

/// Summed outgoing edge weight of the candidate's own graph node.
async fn outgoing_weight(graph: Arc<dyn GraphStore>, key: CandidateKey) -> Result<Option<f32>> {
    if !owns(graph.as_ref(), &key).await? {
        return Ok(None);
    }
    let weight = graph
        .neighbors(&key.item_id)
        .await?
        .iter()
        .map(|(edge, _)| edge.weight)
        .sum();
    Ok(Some(weight))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use beacon_core::{GraphEdge, GraphNode};

    struct DownGraph;

    #[async_trait]
    impl GraphStore for DownGraph {
        async fn node(&self, _: &str) -> Result<Option<GraphNode>> {
            Err(DiscoveryError::graph_unavailable("connection refused"))
        }
        async fn neighbors(&self, _: &str) -> Result<Vec<(GraphEdge, GraphNode)>> {
            Err(DiscoveryError::graph_unavailable("connection refused"))
        }
        async fn related(&self, _: &str, _: &TraversalOptions) -> Result<Vec<RelatedNode>> {
            Err(DiscoveryError::graph_unavailable("connection refused"))
        }
    }

    /// Fixed adjacency: related() returns pre-baked results per seed.
    struct FixedGraph {
        related: HashMap<String, Vec<RelatedNode>>,
    }

    #[async_trait]
    impl GraphStore for FixedGraph {
        async fn node(&self, id: &str) -> Result<Option<GraphNode>> {
            Ok(self
                .related
                .contains_key(id)
                .then(|| GraphNode::new(id, "document", "docs")))
        }
        async fn neighbors(&self, id: &str) -> Result<Vec<(GraphEdge, GraphNode)>> {
            Ok(self
                .related
                .get(id)
                .map(|nodes| {
                    nodes
                        .iter()
                        .filter(|r| r.hop_distance == 1)
                        .filter_map(|r| {
                            GraphEdge::new(id, &r.node.id, RelationshipType::References, r.cumulative_weight)
                                .ok()
                                .map(|e| (e, r.node.clone()))
                        })
                        .collect()
                })
                .unwrap_or_default())
        }
        async fn related(&self, id: &str, _: &TraversalOptions) -> Result<Vec<RelatedNode>> {
            self.related
                .get(id)
                .cloned()
                .ok_or_else(|| DiscoveryError::NotFound(id.to_string()))
        }
    }

    fn related(id: &str, weight: f32, hop: usize) -> RelatedNode {
        related_in("docs", id, weight, hop)
    }

    fn related_in(collection: &str, id: &str, weight: f32, hop: usize) -> RelatedNode {
        RelatedNode {
            node: GraphNode::new(id, "document", collection)
                .with_metadata("snippet", serde_json::json!(format!("about {}", id))),
            cumulative_weight: weight,
            hop_distance: hop,
        }
    }

    fn seed(id: &str, score: f32) -> Candidate {
        let mut c = Candidate::new("docs", id, score, id);
        c.rerank_score = Some(score);
        c
    }

    fn docs() -> Vec<String> {
        vec!["docs".to_string()]
    }

    #[tokio::test]
    async fn test_unavailable_graph_skips() {
        let expander = GraphExpander::new(Arc::new(DownGraph));
        let outcome = expander
            .expand(&[seed("a", 0.9)], &docs(), 2, &CancellationToken::new())
            .await;

        assert!(outcome.unavailable);
        assert!(outcome.related.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, WarningKind::GraphUnavailable);

        let centrality = expander
            .centrality(&[seed("a", 0.9)], &CancellationToken::new())
            .await;
        assert!(centrality.unavailable);
        assert!(centrality.scores.is_empty());
    }

    #[tokio::test]
    async fn test_derived_scores_and_merge() {
        let mut table = HashMap::new();
        table.insert("s1".to_string(), vec![related("x", 0.5, 1), related("y", 0.25, 2)]);
        table.insert("s2".to_string(), vec![related("x", 0.8, 2), related("s1", 0.9, 1)]);
        let expander = GraphExpander::new(Arc::new(FixedGraph { related: table }));

        let outcome = expander
            .expand(&[seed("s1", 0.8), seed("s2", 0.6)], &docs(), 2, &CancellationToken::new())
            .await;

        assert!(outcome.warnings.is_empty());
        // s1 is a seed, so it is not related evidence
        let ids: Vec<_> = outcome.related.iter().map(|e| e.item_id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);

        let x = &outcome.related[0];
        // max(0.8 * 0.5, 0.6 * 0.8) = 0.48 via s2
        assert!((x.score - 0.48).abs() < 1e-6);
        assert_eq!(x.via.as_deref(), Some("s2"));
        assert_eq!(x.hop_distance, Some(2));
        assert_eq!(x.relation, Relation::Related);
        assert_eq!(x.snippet, "about x");

        let y = &outcome.related[1];
        assert!((y.score - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_seed_ignored() {
        let expander = GraphExpander::new(Arc::new(FixedGraph {
            related: HashMap::new(),
        }));
        let outcome = expander
            .expand(&[seed("ghost", 0.9)], &docs(), 2, &CancellationToken::new())
            .await;

        assert!(outcome.related.is_empty());
        assert!(outcome.warnings.is_empty());
        assert!(!outcome.unavailable);
    }

    #[tokio::test]
    async fn test_zero_hops_does_nothing() {
        let expander = GraphExpander::new(Arc::new(DownGraph));
        let outcome = expander
            .expand(&[seed("a", 0.9)], &docs(), 0, &CancellationToken::new())
            .await;
        assert!(outcome.related.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_centrality_normalized() {
        let mut table = HashMap::new();
        table.insert("hub".to_string(), vec![related("x", 0.8, 1), related("y", 0.8, 1)]);
        table.insert("leaf".to_string(), vec![related("x", 0.4, 1)]);
        let expander = GraphExpander::new(Arc::new(FixedGraph { related: table }));

        let candidates = vec![seed("hub", 0.5), seed("leaf", 0.5), seed("orphan", 0.5)];
        let outcome = expander
            .centrality(&candidates, &CancellationToken::new())
            .await;

        assert!(outcome.warnings.is_empty());
        assert!((outcome.scores[&candidates[0].key()] - 1.0).abs() < 1e-6);
        assert!((outcome.scores[&candidates[1].key()] - 0.25).abs() < 1e-6);
        assert!(!outcome.scores.contains_key(&candidates[2].key()));
    }

    #[tokio::test]
    async fn test_related_outside_collections_dropped() {
        let mut table = HashMap::new();
        table.insert(
            "s1".to_string(),
            vec![
                related("kept", 0.9, 1),
                related_in("docs-test", "leak", 0.9, 1),
                related_in("archive", "old", 0.8, 2),
            ],
        );
        let expander = GraphExpander::new(Arc::new(FixedGraph { related: table }));

        let outcome = expander
            .expand(&[seed("s1", 0.8)], &docs(), 2, &CancellationToken::new())
            .await;
        let keys: Vec<_> = outcome.related.iter().map(|e| e.key().to_string()).collect();
        assert_eq!(keys, vec!["docs/kept"]);

        let both = vec!["archive".to_string(), "docs".to_string()];
        let outcome = expander
            .expand(&[seed("s1", 0.8)], &both, 2, &CancellationToken::new())
            .await;
        let keys: Vec<_> = outcome.related.iter().map(|e| e.key().to_string()).collect();
        assert_eq!(keys, vec!["docs/kept", "archive/old"]);
    }

    #[tokio::test]
    async fn test_seed_owned_by_other_collection_skipped() {
        // every FixedGraph node is owned by "docs"
        let mut table = HashMap::new();
        table.insert("shared".to_string(), vec![related("x", 0.9, 1)]);
        let expander = GraphExpander::new(Arc::new(FixedGraph { related: table }));

        let mut foreign = Candidate::new("wiki", "shared", 0.9, "shared");
        foreign.rerank_score = Some(0.9);
        let collections = vec!["docs".to_string(), "wiki".to_string()];

        let outcome = expander
            .expand(&[foreign.clone()], &collections, 2, &CancellationToken::new())
            .await;
        assert!(outcome.related.is_empty());
        assert!(outcome.warnings.is_empty());

        let outcome = expander
            .expand(&[seed("shared", 0.9)], &collections, 2, &CancellationToken::new())
            .await;
        assert_eq!(outcome.related.len(), 1);

        let centrality = expander
            .centrality(&[foreign.clone()], &CancellationToken::new())
            .await;
        assert!(!centrality.scores.contains_key(&foreign.key()));
    }
}
