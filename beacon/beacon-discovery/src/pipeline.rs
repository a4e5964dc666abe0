//! The discovery pipeline.
//!
//! One request flows through these stages in order:
//!
//! ```text
//! filter → score collections → expand → embed → broad search → dedup
//!        → rerank → MMR → graph augmentation → assemble
//! ```
//!
//! Only an invalid request or an empty candidate pool ends a request with
//! an error. Every other failure is degraded into a [`Warning`] on the
//! result.

use crate::assemble::EvidenceAssembler;
use crate::broad::{BroadSearch, QueryEmbedding};
use crate::cache::{CacheStats, CachedEmbedder};
use crate::config::DiscoveryConfig;
use crate::dedup::Deduplicator;
use crate::diversity::Diversifier;
use crate::expansion::{DictionaryExpander, MAX_QUERIES, MIN_QUERIES, QueryExpander};
use crate::filter::PatternFilter;
use crate::graph_expand::GraphExpander;
use crate::rerank::{RerankContext, Reranker};
use crate::scoring::CollectionScorer;
use beacon_core::{
    DiscoveryError, DiscoveryMetrics, DiscoveryRequest, DiscoveryResult, EmbeddingProvider,
    GraphStore, Result, SimilaritySearch, Warning, WarningKind,
};
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Lifecycle of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Expanded,
    Searched,
    Deduplicated,
    Reranked,
    Diversified,
    GraphAugmented,
    Assembled,
    Returned,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Expanded => "expanded",
            Self::Searched => "searched",
            Self::Deduplicated => "deduplicated",
            Self::Reranked => "reranked",
            Self::Diversified => "diversified",
            Self::GraphAugmented => "graph_augmented",
            Self::Assembled => "assembled",
            Self::Returned => "returned",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn enter(stage: PipelineStage) {
    debug!(stage = %stage, "Pipeline stage");
}

fn fail(err: DiscoveryError) -> DiscoveryError {
    enter(PipelineStage::Failed);
    warn!("Discovery failed: {}", err);
    err
}

/// Builder for [`DiscoveryEngine`].
pub struct DiscoveryEngineBuilder {
    config: DiscoveryConfig,
    store: Arc<dyn SimilaritySearch>,
    embedder: Arc<dyn EmbeddingProvider>,
    expander: Option<Arc<dyn QueryExpander>>,
    graph: Option<Arc<dyn GraphStore>>,
    reranker: Option<Reranker>,
}

impl DiscoveryEngineBuilder {
    pub fn new(store: Arc<dyn SimilaritySearch>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            config: DiscoveryConfig::default(),
            store,
            embedder,
            expander: None,
            graph: None,
            reranker: None,
        }
    }

    pub fn with_config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    pub fn with_graph(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Replace the reranker built from the configured weights.
    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn build(self) -> Result<DiscoveryEngine> {
        let config = self.config;
        config.validate()?;

        let reranker = self
            .reranker
            .unwrap_or_else(|| Reranker::from_config(&config.rerank));
        reranker.validate()?;

        let cache = config.cache.enable_embedding_cache.then(|| {
            Arc::new(CachedEmbedder::new(
                self.embedder.clone(),
                config.cache.embedding_cache_size,
                Duration::from_secs(config.cache.embedding_cache_ttl_seconds),
            ))
        });
        let embedder: Arc<dyn EmbeddingProvider> = match &cache {
            Some(cache) => cache.clone(),
            None => self.embedder,
        };

        let expander = self.expander.unwrap_or_else(|| {
            Arc::new(
                DictionaryExpander::default()
                    .with_bounds(config.expansion.min_queries, config.expansion.max_queries),
            )
        });

        let graph = self.graph.map(|graph| {
            GraphExpander::new(graph)
                .with_min_path_weight(config.graph.min_path_weight)
                .with_max_in_flight(config.graph.max_in_flight)
                .with_timeout(config.graph.timeout())
                .with_relationships(config.graph.relationships.clone())
        });

        info!(
            "Discovery engine ready (model: {}, graph: {}, cache: {})",
            embedder.model().model_name,
            graph.is_some(),
            config.cache.enable_embedding_cache
        );

        Ok(DiscoveryEngine {
            scorer: CollectionScorer::new(&config.scoring, config.rerank.collection_priority.clone()),
            broad: BroadSearch::new(self.store.clone(), config.search.max_in_flight, config.search.timeout())
                .with_min_score(config.search.min_score),
            deduplicator: Deduplicator::new(config.dedup.near_duplicate_threshold),
            diversifier: Diversifier::new(config.diversity.lambda),
            assembler: EvidenceAssembler::new(
                config.assembly.max_snippet_chars,
                config.assembly.max_per_doc,
                config.assembly.max_prompt_chars,
            )
            .with_compression(if config.assembly.compress {
                config.assembly.max_sentences
            } else {
                0
            })
            .with_sections(config.assembly.sectioned),
            store: self.store,
            embedder,
            cache,
            expander,
            graph,
            reranker,
            config,
        })
    }
}

/// Runs discovery requests against a similarity collaborator and,
/// optionally, a relationship graph.
pub struct DiscoveryEngine {
    config: DiscoveryConfig,
    store: Arc<dyn SimilaritySearch>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Option<Arc<CachedEmbedder>>,
    expander: Arc<dyn QueryExpander>,
    graph: Option<GraphExpander>,
    scorer: CollectionScorer,
    broad: BroadSearch,
    deduplicator: Deduplicator,
    reranker: Reranker,
    diversifier: Diversifier,
    assembler: EvidenceAssembler,
}

impl DiscoveryEngine {
    pub fn builder(
        store: Arc<dyn SimilaritySearch>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> DiscoveryEngineBuilder {
        DiscoveryEngineBuilder::new(store, embedder)
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn reranker(&self) -> &Reranker {
        &self.reranker
    }

    /// Embedding cache counters, when the cache is enabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Discover with the configured request defaults.
    pub async fn discover_query(&self, query: &str) -> Result<DiscoveryResult> {
        self.discover(self.config.defaults.request(query)).await
    }

    pub async fn discover(&self, request: DiscoveryRequest) -> Result<DiscoveryResult> {
        self.discover_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Run a request until completion or until `cancel` fires.
    ///
    /// On cancellation the evidence gathered so far is assembled and
    /// returned with a warning.
    pub async fn discover_with_cancel(
        &self,
        request: DiscoveryRequest,
        cancel: CancellationToken,
    ) -> Result<DiscoveryResult> {
        let span = info_span!("discover", request_id = %Uuid::new_v4());
        self.run(request, cancel).instrument(span).await
    }

    async fn run(&self, request: DiscoveryRequest, cancel: CancellationToken) -> Result<DiscoveryResult> {
        let start = Instant::now();
        enter(PipelineStage::Received);
        info!("Starting discovery for query: {}", request.query);

        // Step 1: validate before touching any collaborator
        request.validate().map_err(fail)?;
        let filter = PatternFilter::new(&request.include_collections, &request.exclude_collections)
            .map_err(fail)?;

        let available = match self.store.collections().await {
            Ok(names) => names,
            Err(e) => {
                warn!("Failed to list collections: {}", e);
                return Err(fail(DiscoveryError::EmptyResult {
                    query: request.query.clone(),
                }));
            }
        };
        let resolved = filter.resolve(&available).map_err(fail)?;

        let scored = self.scorer.score(&request.query, &resolved);
        let collections = self.scorer.focus(&scored);
        if collections.len() < resolved.len() {
            info!(
                "Step 1: Focused on top {} of {} collections",
                collections.len(),
                resolved.len()
            );
        }
        info!("Step 1: Searching {} collections: {:?}", collections.len(), collections);

        let mut metrics = DiscoveryMetrics {
            collections_searched: collections.len(),
            ..Default::default()
        };
        let mut warnings: Vec<Warning> = Vec::new();

        // Step 2: query expansion
        let queries = self.expand_query(&request.query, &mut warnings);
        metrics.queries_generated = queries.len();
        enter(PipelineStage::Expanded);
        info!("Step 2: Expanded into {} queries", queries.len());

        // Step 3: embed and search every (query, collection) pair
        let embedded = self.embed_queries(&queries, &mut warnings).await;
        if let Some(stats) = self.cache_stats() {
            debug!(hits = stats.hits, misses = stats.misses, "Embedding cache");
        }
        if embedded.is_empty() {
            return Err(fail(DiscoveryError::EmptyResult {
                query: request.query.clone(),
            }));
        }

        let broad = self
            .broad
            .search(&embedded, &collections, request.broad_k, &cancel)
            .await;
        metrics.search_calls = broad.calls;
        metrics.failed_calls = broad.failed;
        metrics.candidates_found = broad.candidates.len();
        warnings.extend(broad.warnings);
        enter(PipelineStage::Searched);
        info!(
            "Step 3: Found {} candidates ({} of {} calls failed)",
            broad.candidates.len(),
            broad.failed,
            broad.calls
        );

        if broad.candidates.is_empty() {
            return Err(fail(DiscoveryError::EmptyResult {
                query: request.query.clone(),
            }));
        }

        // Step 4: deduplicate
        let candidates = self.deduplicator.dedup(broad.candidates);
        metrics.candidates_after_dedup = candidates.len();
        enter(PipelineStage::Deduplicated);
        info!("Step 4: {} candidates after deduplication", candidates.len());

        // Step 5: rerank
        let mut graph_down = false;
        let mut context = RerankContext::new(&request.query, &candidates);
        if let Some(graph) = &self.graph {
            if self.config.graph.centrality && !cancel.is_cancelled() {
                let centrality = graph.centrality(&candidates, &cancel).await;
                graph_down = centrality.unavailable;
                warnings.extend(centrality.warnings);
                context = context.with_centrality(centrality.scores);
            }
        }
        let ranked = self.reranker.rerank(candidates, &context);
        if let Some(top) = ranked.first() {
            debug!(
                candidate = %top.key(),
                factors = ?self.reranker.explain(top, &context),
                "Top reranked candidate"
            );
        }
        metrics.candidates_reranked = ranked.len();
        enter(PipelineStage::Reranked);
        info!("Step 5: Reranked {} candidates", ranked.len());

        // Step 6: diversify
        let selected = self.diversifier.select(ranked, request.focus_k);
        metrics.selected = selected.len();
        enter(PipelineStage::Diversified);
        info!("Step 6: Selected {} diverse candidates", selected.len());

        // Step 7: graph augmentation
        let mut related = Vec::new();
        match &self.graph {
            Some(_) if !self.config.graph.enabled => debug!("Graph augmentation disabled"),
            Some(_) if graph_down => debug!("Graph unavailable, augmentation skipped"),
            Some(_) if cancel.is_cancelled() => debug!("Cancelled, augmentation skipped"),
            Some(graph) => {
                let outcome = graph.expand(&selected, &collections, request.max_hops, &cancel).await;
                warnings.extend(outcome.warnings);
                related = outcome.related;
                enter(PipelineStage::GraphAugmented);
                info!("Step 7: Graph added {} related items", related.len());
            }
            None => debug!("No graph attached"),
        }
        metrics.related_added = related.len();

        // Step 8: assemble
        let assembled = self
            .assembler
            .assemble(&request.query, &selected, related, request.max_bullets);
        warnings.extend(assembled.warnings.iter().cloned());
        metrics.evidence_count = assembled.evidence.len();
        info!(
            "Step 8: Assembled {} evidence entries in {} sections",
            assembled.evidence.len(),
            assembled.plan.sections.len()
        );
        metrics.prompt_tokens_estimate = assembled.prompt_tokens_estimate();
        enter(PipelineStage::Assembled);

        metrics.total_time_ms = start.elapsed().as_millis() as u64;
        enter(PipelineStage::Returned);
        info!(
            "Discovery complete: {} evidence entries, {} warnings in {}ms",
            assembled.evidence.len(),
            warnings.len(),
            metrics.total_time_ms
        );

        Ok(DiscoveryResult {
            query: request.query,
            evidence: assembled.evidence,
            prompt: assembled.prompt,
            warnings,
            metrics,
        })
    }

    /// Expand `query`, falling back to the query alone on failure or when
    /// the expander breaks its contract.
    fn expand_query(&self, query: &str, warnings: &mut Vec<Warning>) -> Vec<String> {
        if !self.config.expansion.enabled {
            return vec![query.to_string()];
        }

        match self.expander.expand(query) {
            Ok(expanded)
                if (MIN_QUERIES..=MAX_QUERIES).contains(&expanded.len())
                    && expanded.first().map(String::as_str) == Some(query) =>
            {
                expanded
            }
            Ok(expanded) => {
                warn!(
                    "Expander returned {} queries violating its contract, using original query",
                    expanded.len()
                );
                warnings.push(Warning::new(
                    WarningKind::ExpansionFailure,
                    format!(
                        "query expansion returned {} variants; searched the original query only",
                        expanded.len()
                    ),
                ));
                vec![query.to_string()]
            }
            Err(e) => {
                warn!("Query expansion failed, using original query: {}", e);
                warnings.push(Warning::new(
                    WarningKind::ExpansionFailure,
                    format!("query expansion failed; searched the original query only: {}", e),
                ));
                vec![query.to_string()]
            }
        }
    }

    async fn embed_queries(&self, queries: &[String], warnings: &mut Vec<Warning>) -> Vec<QueryEmbedding> {
        let timeout = self.config.search.embed_timeout();
        let futures = queries.iter().map(|query| {
            let embedder = self.embedder.clone();
            async move {
                match tokio::time::timeout(timeout, embedder.embed(query)).await {
                    Ok(result) => result,
                    Err(_) => Err(DiscoveryError::Timeout(format!(
                        "embedding exceeded {}ms",
                        timeout.as_millis()
                    ))),
                }
            }
        });

        let mut embedded = Vec::with_capacity(queries.len());
        let mut failures = Vec::new();
        for (query, result) in queries.iter().zip(join_all(futures).await) {
            match result {
                Ok(embedding) => embedded.push(QueryEmbedding::new(query.clone(), embedding)),
                Err(e) => {
                    warn!("Failed to embed query '{}': {}", query, e);
                    failures.push(e.to_string());
                }
            }
        }

        if !failures.is_empty() {
            warnings.push(Warning::new(
                WarningKind::EmbeddingFailure,
                format!(
                    "{} of {} queries could not be embedded: {}",
                    failures.len(),
                    queries.len(),
                    failures[0]
                ),
            ));
        }

        embedded
    }
}
