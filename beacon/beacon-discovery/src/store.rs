//! In-memory similarity search over named collections.

use async_trait::async_trait;
use beacon_core::similarity::cosine_similarity;
use beacon_core::types::rank_order;
use beacon_core::{DiscoveryError, Metadata, Result, SearchHit, SimilaritySearch, Vector};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A document stored in a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: String,
    pub text: String,
    pub embedding: Vector,
    #[serde(default)]
    pub metadata: Metadata,
}

impl StoredItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>, embedding: Vector) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Brute-force cosine search over items held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCollections {
    collections: DashMap<String, Vec<StoredItem>>,
}

impl InMemoryCollections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_collection(&self, name: impl Into<String>) {
        self.collections.entry(name.into()).or_default();
    }

    /// Insert or replace an item by id, creating the collection on demand.
    pub fn insert(&self, collection: &str, item: StoredItem) {
        let mut items = self.collections.entry(collection.to_string()).or_default();
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    pub fn remove(&self, collection: &str, item_id: &str) -> bool {
        self.collections
            .get_mut(collection)
            .map(|mut items| {
                let before = items.len();
                items.retain(|item| item.id != item_id);
                items.len() != before
            })
            .unwrap_or(false)
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.collections.iter().all(|entry| entry.value().is_empty())
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl SimilaritySearch for InMemoryCollections {
    async fn collections(&self) -> Result<Vec<String>> {
        Ok(self.collection_names())
    }

    async fn search(&self, collection: &str, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let items = self
            .collections
            .get(collection)
            .ok_or_else(|| DiscoveryError::NotFound(format!("collection '{}'", collection)))?;

        let mut scored = Vec::with_capacity(items.len());
        for item in items.iter() {
            if item.embedding.len() != query_embedding.len() {
                return Err(DiscoveryError::Embedding(format!(
                    "dimension mismatch in '{}': query {} vs item '{}' {}",
                    collection,
                    query_embedding.len(),
                    item.id,
                    item.embedding.len()
                )));
            }
            scored.push((cosine_similarity(query_embedding, &item.embedding), item));
        }

        scored.sort_by(|(sa, a), (sb, b)| rank_order(*sa, &a.id, "", *sb, &b.id, ""));
        scored.truncate(k);

        debug!(collection, k, hits = scored.len(), "In-memory search complete");

        Ok(scored
            .into_iter()
            .map(|(score, item)| SearchHit {
                item_id: item.id.clone(),
                score,
                snippet: item.text.clone(),
                metadata: item.metadata.clone(),
                embedding: Some(item.embedding.clone()),
            })
            .collect())
    }
}
