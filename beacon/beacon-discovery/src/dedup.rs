//! Exact and near-duplicate removal.

use beacon_core::similarity::cosine_similarity;
use beacon_core::text::{jaccard_similarity, normalize_text};
use beacon_core::types::sort_candidates;
use beacon_core::{Candidate, CandidateKey};
use std::collections::HashSet;
use tracing::debug;

/// Hex blake3 digest of the normalized text.
pub fn content_hash(text: &str) -> String {
    blake3::hash(normalize_text(text).as_bytes()).to_hex().to_string()
}

/// Similarity of two candidates in `[-1, 1]`.
///
/// Cosine over embeddings when both carry one of equal dimension, Jaccard
/// over snippet words otherwise.
pub fn candidate_similarity(a: &Candidate, b: &Candidate) -> f32 {
    match (&a.embedding, &b.embedding) {
        (Some(x), Some(y)) if x.len() == y.len() && !x.is_empty() => cosine_similarity(x, y),
        _ => jaccard_similarity(&a.snippet, &b.snippet),
    }
}

/// Removes duplicate keys, identical content and near-duplicates.
///
/// The higher-scoring item of every duplicate pair survives. Running the
/// output through again changes nothing.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    near_threshold: f32,
}

impl Deduplicator {
    pub fn new(near_threshold: f32) -> Self {
        Self { near_threshold }
    }

    pub fn dedup(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        let before = candidates.len();
        sort_candidates(&mut candidates);

        let mut keys: HashSet<CandidateKey> = HashSet::new();
        let mut hashes: HashSet<String> = HashSet::new();
        let mut exact = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !keys.insert(candidate.key()) {
                continue;
            }
            if !hashes.insert(content_hash(&candidate.snippet)) {
                continue;
            }
            exact.push(candidate);
        }
        let after_exact = exact.len();

        let mut kept: Vec<Candidate> = Vec::with_capacity(exact.len());
        for candidate in exact {
            let duplicate = kept
                .iter()
                .any(|existing| candidate_similarity(existing, &candidate) > self.near_threshold);
            if !duplicate {
                kept.push(candidate);
            }
        }

        debug!(
            before,
            after_exact,
            after_near = kept.len(),
            "Deduplication complete"
        );

        kept
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(0.95)
    }
}
