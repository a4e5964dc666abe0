//! Broad search across every (query, collection) pair.

use beacon_core::{
    Candidate, CandidateKey, DiscoveryError, SimilaritySearch, Vector, Warning, WarningKind,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A query variant with its embedding.
#[derive(Debug, Clone)]
pub struct QueryEmbedding {
    pub text: String,
    pub embedding: Arc<Vector>,
}

impl QueryEmbedding {
    pub fn new(text: impl Into<String>, embedding: Vector) -> Self {
        Self {
            text: text.into(),
            embedding: Arc::new(embedding),
        }
    }
}

/// Merged result of the broad stage.
#[derive(Debug, Clone, Default)]
pub struct BroadOutcome {
    /// Unique by `(collection, item id)`, in rank order.
    pub candidates: Vec<Candidate>,
    pub warnings: Vec<Warning>,
    /// Calls that were issued.
    pub calls: usize,
    /// Calls that failed or timed out.
    pub failed: usize,
    pub cancelled: bool,
}

/// Fans similarity calls out with bounded concurrency and merges the hits.
pub struct BroadSearch {
    store: Arc<dyn SimilaritySearch>,
    max_in_flight: usize,
    call_timeout: Duration,
    min_score: f32,
}

impl BroadSearch {
    pub fn new(store: Arc<dyn SimilaritySearch>, max_in_flight: usize, call_timeout: Duration) -> Self {
        Self {
            store,
            max_in_flight: max_in_flight.max(1),
            call_timeout,
            min_score: f32::NEG_INFINITY,
        }
    }

    /// Drop hits scoring below `min_score`.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Search every collection with every query.
    ///
    /// Individual failures and timeouts become warnings. Cancellation keeps
    /// whatever completed before the token fired.
    pub async fn search(
        &self,
        queries: &[QueryEmbedding],
        collections: &[String],
        broad_k: usize,
        cancel: &CancellationToken,
    ) -> BroadOutcome {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut pending = FuturesUnordered::new();

        for (query_index, query) in queries.iter().enumerate() {
            for collection in collections {
                let store = self.store.clone();
                let semaphore = semaphore.clone();
                let embedding = query.embedding.clone();
                let collection = collection.clone();
                let call_timeout = self.call_timeout;

                pending.push(async move {
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            match tokio::time::timeout(
                                call_timeout,
                                store.search(&collection, &embedding, broad_k),
                            )
                            .await
                            {
                                Ok(result) => result,
                                Err(_) => Err(DiscoveryError::Timeout(format!(
                                    "search exceeded {}ms",
                                    call_timeout.as_millis()
                                ))),
                            }
                        }
                        Err(_) => Err(DiscoveryError::collection_unavailable(
                            &collection,
                            "search pool closed",
                        )),
                    };
                    (query_index, collection, result)
                });
            }
        }

        let mut outcome = BroadOutcome {
            calls: pending.len(),
            ..Default::default()
        };
        let mut pool = CandidatePool::default();
        // collection -> (failed calls, lowest failing query index, its reason)
        let mut failures: BTreeMap<String, (usize, usize, String)> = BTreeMap::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let remaining = pending.len();
                    warn!("Broad search cancelled with {} calls outstanding", remaining);
                    outcome.cancelled = true;
                    outcome.warnings.push(Warning::new(
                        WarningKind::Cancelled,
                        format!("broad search cancelled; {} of {} calls did not complete", remaining, outcome.calls),
                    ));
                    break;
                }
                next = pending.next() => {
                    let Some((query_index, collection, result)) = next else {
                        break;
                    };
                    match result {
                        Ok(hits) => {
                            debug!(collection = %collection, query_index, hits = hits.len(), "Search call complete");
                            for hit in hits.into_iter().take(broad_k) {
                                if hit.score.is_nan() || hit.score < self.min_score {
                                    continue;
                                }
                                pool.offer(query_index, Candidate::from_hit(collection.as_str(), hit));
                            }
                        }
                        Err(e) => {
                            warn!("Search failed for collection {}: {}", collection, e);
                            outcome.failed += 1;
                            let entry = failures
                                .entry(collection)
                                .or_insert((0, query_index, e.to_string()));
                            entry.0 += 1;
                            if query_index < entry.1 {
                                entry.1 = query_index;
                                entry.2 = e.to_string();
                            }
                        }
                    }
                }
            }
        }

        for (collection, (count, _, reason)) in failures {
            outcome.warnings.push(Warning::new(
                WarningKind::CollectionUnavailable,
                format!(
                    "collection '{}' unavailable for {} of {} queries: {}",
                    collection,
                    count,
                    queries.len(),
                    reason
                ),
            ));
        }

        outcome.candidates = pool.into_candidates();

        info!(
            "Broad search completed: {} candidates from {} calls ({} failed) in {}ms",
            outcome.candidates.len(),
            outcome.calls,
            outcome.failed,
            start.elapsed().as_millis()
        );

        outcome
    }
}

/// Keeps one candidate per key: the highest score, then the earliest query.
///
/// Arrival order does not affect the result.
#[derive(Default)]
struct CandidatePool {
    entries: HashMap<CandidateKey, (usize, Candidate)>,
}

impl CandidatePool {
    fn offer(&mut self, query_index: usize, candidate: Candidate) {
        let key = candidate.key();
        let replace = match self.entries.get(&key) {
            Some((existing_index, existing)) => {
                candidate.score > existing.score
                    || (candidate.score == existing.score && query_index < *existing_index)
            }
            None => true,
        };
        if replace {
            self.entries.insert(key, (query_index, candidate));
        }
    }

    fn into_candidates(self) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self.entries.into_values().map(|(_, c)| c).collect();
        beacon_core::types::sort_candidates(&mut candidates);
        candidates
    }
}
