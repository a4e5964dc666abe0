//! Error types for discovery.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Request rejected before any collaborator call was issued.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Zero candidates survived across all collections and queries.
    #[error("No evidence found for query '{query}'")]
    EmptyResult { query: String },

    #[error("Collection unavailable: {collection}: {reason}")]
    CollectionUnavailable { collection: String, reason: String },

    #[error("Query expansion failed: {0}")]
    ExpansionFailure(String),

    #[error("Graph unavailable: {0}")]
    GraphUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DiscoveryError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn collection_unavailable(collection: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CollectionUnavailable {
            collection: collection.into(),
            reason: reason.into(),
        }
    }

    pub fn graph_unavailable(msg: impl Into<String>) -> Self {
        Self::GraphUnavailable(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error ends a request without a usable result.
    ///
    /// Only invalid requests and empty results are terminal; everything else
    /// is degraded into a warning by the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::EmptyResult { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(DiscoveryError::invalid("focus_k > broad_k").is_terminal());
        assert!(
            DiscoveryError::EmptyResult {
                query: "q".to_string()
            }
            .is_terminal()
        );
        assert!(!DiscoveryError::graph_unavailable("down").is_terminal());
        assert!(!DiscoveryError::collection_unavailable("docs", "timeout").is_terminal());
        assert!(!DiscoveryError::ExpansionFailure("boom".to_string()).is_terminal());
    }

    #[test]
    fn test_display() {
        let err = DiscoveryError::collection_unavailable("docs", "connection reset");
        assert_eq!(
            err.to_string(),
            "Collection unavailable: docs: connection reset"
        );

        let err = DiscoveryError::EmptyResult {
            query: "vector database".to_string(),
        };
        assert_eq!(err.to_string(), "No evidence found for query 'vector database'");
    }
}
