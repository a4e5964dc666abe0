//! Deterministic feature-hashing embedder.
//!
//! Maps every token to a signed bucket so texts sharing vocabulary land
//! close together under cosine similarity. Useful wherever a real model is
//! unavailable: tests, demos, the CLI's offline corpora.

use crate::collaborators::{EmbeddingModel, EmbeddingProvider};
use crate::error::Result;
use crate::similarity::normalize;
use crate::text::{is_stop_word, tokenize};
use crate::types::Vector;
use async_trait::async_trait;

pub const DEFAULT_HASHING_DIMENSION: usize = 256;

pub struct HashingEmbedder {
    model: EmbeddingModel,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            model: EmbeddingModel::new("hashing", "feature-hash-v1", dimension.max(1)),
        }
    }

    /// Synchronous embedding, shared by the async trait impl and loaders.
    pub fn embed_text(&self, text: &str) -> Vector {
        let dimension = self.model.dimension;
        let mut embedding = vec![0.0; dimension];

        for token in tokenize(text) {
            let weight = if is_stop_word(&token) { 0.25 } else { 1.0 };
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % dimension as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign * weight;
        }

        normalize(&mut embedding);
        embedding
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vector> {
        Ok(self.embed_text(text))
    }

    fn model(&self) -> &EmbeddingModel {
        &self.model
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
        (acc ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}
