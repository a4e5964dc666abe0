//! MMR (Maximal Marginal Relevance) selection.
//!
//! Balances relevance against redundancy by iteratively picking the
//! candidate maximizing
//!
//! `λ · relevance − (1 − λ) · max similarity to already selected`
//!
//! Reference: "The Use of MMR, Diversity-Based Reranking for Reordering
//! Documents and Producing Summaries" (Carbonell & Goldstein, 1998)

use crate::dedup::candidate_similarity;
use beacon_core::types::sort_candidates;
use beacon_core::Candidate;
use std::collections::HashSet;
use tracing::debug;

pub struct Diversifier {
    /// Balance between relevance (1.0) and diversity (0.0)
    lambda: f32,
}

impl Diversifier {
    pub fn new(lambda: f32) -> Self {
        Self {
            lambda: lambda.clamp(0.0, 1.0),
        }
    }

    /// Select `min(focus_k, candidates.len())` unique candidates.
    ///
    /// Relevance is the rerank score. When `focus_k` covers the whole pool
    /// the candidates come back in rank order.
    pub fn select(&self, mut candidates: Vec<Candidate>, focus_k: usize) -> Vec<Candidate> {
        sort_candidates(&mut candidates);

        let mut keys = HashSet::new();
        candidates.retain(|c| keys.insert(c.key()));

        if focus_k >= candidates.len() {
            return candidates;
        }

        let mut selected: Vec<Candidate> = Vec::with_capacity(focus_k);
        let mut remaining = candidates;
        // Highest similarity of each remaining candidate to the selected set
        let mut max_similarity = vec![f32::NEG_INFINITY; remaining.len()];

        while selected.len() < focus_k && !remaining.is_empty() {
            let mut best_idx = 0;
            let mut best_mmr = f32::NEG_INFINITY;

            for (idx, candidate) in remaining.iter().enumerate() {
                let redundancy = if selected.is_empty() {
                    0.0
                } else {
                    max_similarity[idx]
                };
                let mmr = self.lambda * candidate.final_score() - (1.0 - self.lambda) * redundancy;

                // Strict comparison keeps the earlier, higher-ranked candidate on ties
                if mmr > best_mmr {
                    best_mmr = mmr;
                    best_idx = idx;
                }
            }

            let chosen = remaining.remove(best_idx);
            max_similarity.remove(best_idx);

            for (idx, candidate) in remaining.iter().enumerate() {
                let sim = candidate_similarity(candidate, &chosen);
                if sim > max_similarity[idx] {
                    max_similarity[idx] = sim;
                }
            }

            selected.push(chosen);
        }

        debug!(
            selected = selected.len(),
            lambda = self.lambda,
            "Diversification complete"
        );

        selected
    }
}

impl Default for Diversifier {
    fn default() -> Self {
        Self::new(0.7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ranked(id: &str, score: f32, embedding: Vec<f32>) -> Candidate {
        let mut c = Candidate::new("docs", id, score, id).with_embedding(embedding);
        c.rerank_score = Some(score);
        c
    }

    #[test]
    fn test_prefers_diverse_item() {
        // b is nearly identical to a; c is orthogonal but slightly less relevant
        let candidates = vec![
            ranked("a", 0.90, vec![1.0, 0.0]),
            ranked("b", 0.88, vec![0.99, 0.14]),
            ranked("c", 0.80, vec![0.0, 1.0]),
        ];

        let selected = Diversifier::default().select(candidates, 2);
        let ids: Vec<_> = selected.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_lambda_one_is_relevance_order() {
        let candidates = vec![
            ranked("a", 0.90, vec![1.0, 0.0]),
            ranked("b", 0.88, vec![0.99, 0.14]),
            ranked("c", 0.80, vec![0.0, 1.0]),
        ];

        let selected = Diversifier::new(1.0).select(candidates, 2);
        let ids: Vec<_> = selected.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_focus_k_covers_pool() {
        let candidates = vec![
            ranked("b", 0.5, vec![1.0, 0.0]),
            ranked("a", 0.9, vec![1.0, 0.0]),
        ];

        let selected = Diversifier::default().select(candidates, 10);
        let ids: Vec<_> = selected.iter().map(|c| c.item_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_text_fallback() {
        let mut a = Candidate::new("docs", "a", 0.9, "install the vector database server");
        a.rerank_score = Some(0.9);
        let mut b = Candidate::new("docs", "b", 0.85, "install the vector database server today");
        b.rerank_score = Some(0.85);
        let mut c = Candidate::new("docs", "c", 0.7, "query planner internals");
        c.rerank_score = Some(0.7);

        let selected = Diversifier::default().select(vec![a, b, c], 2);
        assert_eq!(selected[1].item_id, "c");
    }

    #[test]
    fn test_empty() {
        assert!(Diversifier::default().select(Vec::new(), 5).is_empty());
    }

    proptest! {
        #[test]
        fn prop_selection_size_and_uniqueness(
            scores in prop::collection::vec((0.0f32..1.0, prop::collection::vec(-1.0f32..1.0, 4)), 0..40),
            focus_k in 1usize..20,
            lambda in 0.0f32..=1.0,
        ) {
            let candidates: Vec<Candidate> = scores
                .into_iter()
                .enumerate()
                .map(|(i, (score, embedding))| ranked(&format!("item-{}", i), score, embedding))
                .collect();
            let n = candidates.len();

            let selected = Diversifier::new(lambda).select(candidates, focus_k);
            prop_assert_eq!(selected.len(), focus_k.min(n));

            let keys: HashSet<_> = selected.iter().map(Candidate::key).collect();
            prop_assert_eq!(keys.len(), selected.len());
        }
    }
}
