//! Memoized query embeddings.
//!
//! Expanded queries repeat across requests, so their vectors are kept in a
//! bounded, expiring moka cache keyed by query text. Concurrent lookups of
//! the same text share one call to the wrapped provider, and failed
//! embeddings are never stored.

use async_trait::async_trait;
use beacon_core::{DiscoveryError, EmbeddingModel, EmbeddingProvider, Result, Vector};
use moka::future::Cache;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Hit and miss counters for a [`CachedEmbedder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    vectors: Cache<String, Arc<Vector>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            vectors: Cache::builder().max_capacity(capacity).time_to_live(ttl).build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vector> {
        let computed = AtomicBool::new(false);
        let result = self
            .vectors
            .try_get_with(text.to_string(), async {
                computed.store(true, Ordering::Relaxed);
                self.inner.embed(text).await.map(Arc::new)
            })
            .await;

        let counter = if computed.load(Ordering::Relaxed) {
            &self.misses
        } else {
            &self.hits
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let vector = result.map_err(|shared| {
            Arc::try_unwrap(shared).unwrap_or_else(|e| DiscoveryError::Embedding(e.to_string()))
        })?;
        Ok(vector.as_ref().clone())
    }

    fn model(&self) -> &EmbeddingModel {
        self.inner.model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::HashingEmbedder;
    use std::sync::atomic::AtomicUsize;

    struct FlakyEmbedder {
        model: EmbeddingModel,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vector> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text == "bad" {
                Err(DiscoveryError::Embedding("refused".to_string()))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }

        fn model(&self) -> &EmbeddingModel {
            &self.model
        }
    }

    fn flaky() -> Arc<FlakyEmbedder> {
        Arc::new(FlakyEmbedder {
            model: EmbeddingModel::new("test", "flaky", 2),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_cached_embedder_hits() {
        let embedder = CachedEmbedder::new(
            Arc::new(HashingEmbedder::default()),
            100,
            Duration::from_secs(60),
        );

        let first = embedder.embed("vector database").await.unwrap();
        let second = embedder.embed("vector database").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(embedder.stats(), CacheStats { hits: 1, misses: 1 });
        assert_eq!(embedder.dimension(), 256);
    }

    #[tokio::test]
    async fn test_failures_not_cached() {
        let inner = flaky();
        let embedder = CachedEmbedder::new(inner.clone(), 10, Duration::from_secs(60));

        let err = embedder.embed("bad").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Embedding(ref reason) if reason == "refused"));
        assert!(embedder.embed("bad").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        embedder.embed("good").await.unwrap();
        embedder.embed("good").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(embedder.stats(), CacheStats { hits: 1, misses: 3 });
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_call() {
        let inner = flaky();
        let embedder = CachedEmbedder::new(inner.clone(), 10, Duration::from_secs(60));

        let (a, b) = tokio::join!(embedder.embed("same"), embedder.embed("same"));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let inner = flaky();
        let embedder = CachedEmbedder::new(inner.clone(), 10, Duration::from_millis(20));

        embedder.embed("short-lived").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        embedder.embed("short-lived").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
