//! Collection pre-scoring.
//!
//! Ranks the resolved collections against the query before any search runs.
//! A collection's score blends three signals:
//!
//! - name match: share of query keywords found in the collection name
//! - term boost: share of query keywords among the terms configured for it
//! - signal boost: its configured priority relative to the highest one
//!
//! When `focus_top_n` is set only the best collections are searched.

use crate::config::ScoringConfig;
use beacon_core::text::keywords;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// A collection and its pre-search relevance in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionScore {
    pub name: String,
    pub score: f32,
}

pub struct CollectionScorer {
    name_match_weight: f32,
    term_boost_weight: f32,
    signal_boost_weight: f32,
    terms: BTreeMap<String, Vec<String>>,
    priority: BTreeMap<String, f32>,
    focus_top_n: usize,
}

impl CollectionScorer {
    pub fn new(config: &ScoringConfig, priority: BTreeMap<String, f32>) -> Self {
        let terms = config
            .terms
            .iter()
            .map(|(collection, terms)| {
                (
                    collection.clone(),
                    terms.iter().map(|t| t.to_lowercase()).collect(),
                )
            })
            .collect();

        Self {
            name_match_weight: config.name_match_weight,
            term_boost_weight: config.term_boost_weight,
            signal_boost_weight: config.signal_boost_weight,
            terms,
            priority,
            focus_top_n: config.focus_top_n,
        }
    }

    /// Score every collection, best first, ties by name.
    pub fn score(&self, query: &str, collections: &[String]) -> Vec<CollectionScore> {
        let query_terms = keywords(query);
        let max_priority = collections
            .iter()
            .map(|c| self.priority_of(c))
            .fold(0.0f32, f32::max);
        let total_weight = self.name_match_weight + self.term_boost_weight + self.signal_boost_weight;

        let mut scored: Vec<CollectionScore> = collections
            .iter()
            .map(|name| {
                let name_match = name_match(&query_terms, name);
                let term_boost = self
                    .terms
                    .get(name)
                    .map(|terms| term_overlap(&query_terms, terms))
                    .unwrap_or(0.0);
                let signal = if max_priority > 0.0 {
                    self.priority_of(name) / max_priority
                } else {
                    0.0
                };

                let blended = self.name_match_weight * name_match
                    + self.term_boost_weight * term_boost
                    + self.signal_boost_weight * signal;
                let score = if total_weight > 0.0 {
                    (blended / total_weight).clamp(0.0, 1.0)
                } else {
                    0.0
                };

                debug!(collection = %name, name_match, term_boost, signal, score, "Collection scored");
                CollectionScore {
                    name: name.clone(),
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        scored
    }

    /// Collections to search: all of them in score order, or the top
    /// `focus_top_n` when focusing is on.
    pub fn focus(&self, scored: &[CollectionScore]) -> Vec<String> {
        let take = match self.focus_top_n {
            0 => scored.len(),
            n => n.min(scored.len()),
        };
        scored.iter().take(take).map(|s| s.name.clone()).collect()
    }

    fn priority_of(&self, collection: &str) -> f32 {
        self.priority.get(collection).copied().unwrap_or(1.0)
    }
}

/// Share of `terms` appearing in the name's segments.
fn name_match(terms: &[String], name: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let segments: Vec<String> = name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect();

    let hits = terms
        .iter()
        .filter(|term| {
            segments.iter().any(|segment| {
                segment == *term
                    || (segment.len() >= 3 && term.starts_with(segment.as_str()))
                    || (term.len() >= 3 && segment.starts_with(term.as_str()))
            })
        })
        .count();
    hits as f32 / terms.len() as f32
}

fn term_overlap(terms: &[String], configured: &[String]) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms.iter().filter(|t| configured.contains(t)).count();
    hits as f32 / terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_name_match_ranks_first() {
        let scorer = CollectionScorer::new(&ScoringConfig::default(), BTreeMap::new());
        let scored = scorer.score("vector database install", &names(&["recipes", "vector-docs", "api"]));

        assert_eq!(scored[0].name, "vector-docs");
        // equal scores fall back to name order
        assert_eq!(scored[1].name, "api");
        assert_eq!(scored[2].name, "recipes");
        assert!(scored[0].score > scored[1].score);
    }

    #[test]
    fn test_configured_terms_boost() {
        let mut config = ScoringConfig::default();
        config
            .terms
            .insert("ops".to_string(), vec!["Install".to_string(), "deploy".to_string()]);
        let scorer = CollectionScorer::new(&config, BTreeMap::new());

        let scored = scorer.score("install guide", &names(&["ops", "misc"]));
        assert_eq!(scored[0].name, "ops");
        // term boost 0.3 * 0.5 plus full signal 0.3
        assert!((scored[0].score - 0.45).abs() < 1e-6);
        assert!((scored[1].score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_priority_signal() {
        let priority: BTreeMap<String, f32> = [("docs".to_string(), 2.0)].into_iter().collect();
        let scorer = CollectionScorer::new(&ScoringConfig::default(), priority);

        let scored = scorer.score("anything", &names(&["code", "docs"]));
        assert_eq!(scored[0].name, "docs");
        assert!((scored[0].score - 0.3).abs() < 1e-6);
        assert!((scored[1].score - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_focus_top_n() {
        let mut config = ScoringConfig::default();
        let all = names(&["alpha-docs", "beta", "gamma"]);

        let scorer = CollectionScorer::new(&config, BTreeMap::new());
        let scored = scorer.score("alpha", &all);
        assert_eq!(scorer.focus(&scored).len(), 3);

        config.focus_top_n = 1;
        let scorer = CollectionScorer::new(&config, BTreeMap::new());
        assert_eq!(scorer.focus(&scored), vec!["alpha-docs"]);

        config.focus_top_n = 10;
        let scorer = CollectionScorer::new(&config, BTreeMap::new());
        assert_eq!(scorer.focus(&scored).len(), 3);
    }

    #[test]
    fn test_stop_word_query_scores_signal_only() {
        let scorer = CollectionScorer::new(&ScoringConfig::default(), BTreeMap::new());
        let scored = scorer.score("how is the", &names(&["the-docs"]));
        assert!((scored[0].score - 0.3).abs() < 1e-6);
    }
}
