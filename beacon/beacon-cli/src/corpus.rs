//! JSON corpus files: collections of items plus an optional relationship graph.
//!
//! ```json
//! {
//!   "collections": {
//!     "docs": [
//!       { "id": "install", "text": "Install the server", "metadata": { "file_path": "README.md" } }
//!     ]
//!   },
//!   "graph": {
//!     "edges": [
//!       { "source": "install", "target": "config", "relationship": "REFERENCES", "weight": 0.8 }
//!     ]
//!   }
//! }
//! ```
//!
//! Items without an `embedding` are embedded with the hashing embedder. When a
//! `graph` section is present every item becomes a node keyed by its id and
//! owned by its collection, so item ids must then be unique across
//! collections.

use anyhow::{bail, Context, Result};
use beacon_core::{GraphEdge, GraphNode, HashingEmbedder, Metadata, RelationshipType, Vector};
use beacon_discovery::{InMemoryCollections, StoredItem};
use beacon_graph::RelationshipGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<CorpusItem>>,
    #[serde(default)]
    pub graph: Option<CorpusGraph>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub embedding: Option<Vector>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusGraph {
    /// Extra nodes, or overrides for the nodes derived from items.
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<CorpusEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusEdge {
    pub source: String,
    pub target: String,
    #[serde(default = "default_relationship")]
    pub relationship: String,
    pub weight: f32,
}

fn default_relationship() -> String {
    RelationshipType::SimilarTo.to_string()
}

impl Corpus {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read corpus {}", path.display()))?;
        let corpus: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse corpus {}", path.display()))?;

        info!(
            "Loaded corpus {} ({} collections, {} items)",
            path.display(),
            corpus.collections.len(),
            corpus.item_count()
        );
        Ok(corpus)
    }

    pub fn item_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Build the searchable store, embedding items that carry no vector.
    pub fn to_store(&self, embedder: &HashingEmbedder) -> Result<InMemoryCollections> {
        let dimension = beacon_core::EmbeddingProvider::model(embedder).dimension;
        let store = InMemoryCollections::new();

        for (collection, items) in &self.collections {
            store.create_collection(collection.as_str());
            for item in items {
                let embedding = match &item.embedding {
                    Some(vector) if vector.len() == dimension => vector.clone(),
                    Some(vector) => bail!(
                        "Item {}/{} has a {}-dimensional embedding, expected {}",
                        collection,
                        item.id,
                        vector.len(),
                        dimension
                    ),
                    None => embedder.embed_text(&item.text),
                };
                let mut stored = StoredItem::new(item.id.as_str(), item.text.as_str(), embedding);
                stored.metadata = item.metadata.clone();
                store.insert(collection, stored);
            }
            debug!(collection = %collection, items = items.len(), "Collection loaded");
        }

        Ok(store)
    }

    /// Build the relationship graph, or `None` when the corpus has no graph.
    pub fn to_graph(&self) -> Result<Option<RelationshipGraph>> {
        let Some(section) = &self.graph else {
            return Ok(None);
        };

        let mut owners: HashMap<&str, &str> = HashMap::new();
        for (collection, items) in &self.collections {
            for item in items {
                if let Some(first) = owners.insert(item.id.as_str(), collection.as_str()) {
                    if first != collection.as_str() {
                        bail!(
                            "Item id '{}' appears in collections '{}' and '{}'; graph node ids must be unique",
                            item.id,
                            first,
                            collection
                        );
                    }
                }
            }
        }

        let graph = RelationshipGraph::new();
        for (collection, items) in &self.collections {
            for item in items {
                let mut node = GraphNode::new(item.id.as_str(), "document", collection.as_str())
                    .with_metadata("snippet", serde_json::Value::String(item.text.clone()));
                node.metadata.extend(item.metadata.clone());
                graph.add_node(node);
            }
        }
        for node in &section.nodes {
            graph.add_node(node.clone());
        }

        for edge in &section.edges {
            let relationship: RelationshipType = edge.relationship.parse()?;
            let built = GraphEdge::new(edge.source.as_str(), edge.target.as_str(), relationship, edge.weight)
                .with_context(|| format!("Invalid edge {} -> {}", edge.source, edge.target))?;
            graph
                .add_edge(built)
                .with_context(|| format!("Failed to add edge {} -> {}", edge.source, edge.target))?;
        }

        info!(
            "Built relationship graph ({} nodes, {} edges)",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(Some(graph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Corpus {
        serde_json::from_value(json!({
            "collections": {
                "docs": [
                    { "id": "a", "text": "install the server", "metadata": { "file_path": "README.md" } },
                    { "id": "b", "text": "configure the server" }
                ],
                "code": [
                    { "id": "c", "text": "fn main() {}" }
                ]
            },
            "graph": {
                "edges": [
                    { "source": "a", "target": "b", "relationship": "references", "weight": 0.7 },
                    { "source": "b", "target": "c", "weight": 0.5 }
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_store_from_corpus() {
        let corpus = sample();
        assert_eq!(corpus.item_count(), 3);

        let store = corpus.to_store(&HashingEmbedder::default()).unwrap();
        assert_eq!(store.len("docs"), 2);
        assert_eq!(store.len("code"), 1);
        assert_eq!(store.collection_names(), vec!["code", "docs"]);
    }

    #[test]
    fn test_embedding_dimension_checked() {
        let mut corpus = sample();
        corpus.collections.get_mut("docs").unwrap()[0].embedding = Some(vec![1.0, 0.0]);
        let err = corpus.to_store(&HashingEmbedder::default()).unwrap_err();
        assert!(err.to_string().contains("2-dimensional"));
    }

    #[test]
    fn test_graph_from_corpus() {
        let graph = sample().to_graph().unwrap().unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);

        let node = graph.get_node("a").unwrap();
        assert_eq!(node.collection, "docs");
        assert_eq!(node.snippet(), "install the server");
        assert_eq!(node.metadata["file_path"], json!("README.md"));
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut corpus = sample();
        corpus.graph.as_mut().unwrap().edges.push(CorpusEdge {
            source: "a".to_string(),
            target: "missing".to_string(),
            relationship: default_relationship(),
            weight: 0.5,
        });
        assert!(corpus.to_graph().is_err());
    }

    #[test]
    fn test_colliding_ids_rejected() {
        let mut corpus = sample();
        corpus.collections.insert(
            "docs-test".to_string(),
            vec![CorpusItem {
                id: "a".to_string(),
                text: "install fixture".to_string(),
                metadata: Metadata::new(),
                embedding: None,
            }],
        );

        let err = corpus.to_graph().unwrap_err();
        assert!(err.to_string().contains("'docs' and 'docs-test'"));

        // the store keys items per collection, so it still loads
        let store = corpus.to_store(&HashingEmbedder::default()).unwrap();
        assert_eq!(store.len("docs-test"), 1);

        corpus.graph = None;
        assert!(corpus.to_graph().unwrap().is_none());
    }

    #[test]
    fn test_explicit_node_keeps_owner() {
        let mut corpus = sample();
        corpus
            .graph
            .as_mut()
            .unwrap()
            .nodes
            .push(GraphNode::new("extra", "concept", "glossary"));

        let graph = corpus.to_graph().unwrap().unwrap();
        assert_eq!(graph.get_node("extra").unwrap().collection, "glossary");
        assert_eq!(graph.get_node("c").unwrap().collection, "code");
    }

    #[test]
    fn test_no_graph_section() {
        let mut corpus = sample();
        corpus.graph = None;
        assert!(corpus.to_graph().unwrap().is_none());
    }
}
