use compose::QueryTextError;
use embed::EmbedError;
use index::{IndexError, SnapshotError};
use registry::RegistryError;
use thiserror::Error;

/// The search error taxonomy. Every failure a caller can observe maps to
/// one of these; each carries a stable wire code and a retryability flag
/// so the HTTP layer can build the `{code, message, retryable}` envelope
/// without string matching.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("query is empty")]
    QueryEmpty,
    #[error("index not ready")]
    IndexNotReady,
    #[error("snapshot incompatible with current backend: {0}")]
    ModelMismatch(String),
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),
    #[error("embedding queue saturated")]
    Overloaded,
    #[error("query cancelled")]
    Cancelled,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl SearchError {
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::InvalidRequest(_) => "InvalidRequest",
            SearchError::QueryEmpty => "QueryEmpty",
            SearchError::IndexNotReady => "IndexNotReady",
            SearchError::ModelMismatch(_) => "ModelMismatch",
            SearchError::EmbeddingFailed(_) => "EmbeddingFailed",
            SearchError::Overloaded => "Overloaded",
            SearchError::Cancelled => "Cancelled",
            SearchError::NotFound(_) => "NotFound",
            SearchError::Internal(_) => "Internal",
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(
            self,
            SearchError::IndexNotReady
                | SearchError::ModelMismatch(_)
                | SearchError::EmbeddingFailed(_)
                | SearchError::Overloaded
                | SearchError::Internal(_)
        )
    }
}

impl From<QueryTextError> for SearchError {
    fn from(e: QueryTextError) -> Self {
        match e {
            QueryTextError::Empty => SearchError::QueryEmpty,
            QueryTextError::TooLong(_) => SearchError::InvalidRequest(e.to_string()),
        }
    }
}

impl From<EmbedError> for SearchError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::Overloaded => SearchError::Overloaded,
            EmbedError::NotFitted => SearchError::IndexNotReady,
            EmbedError::InvalidConfig(msg) => SearchError::Internal(msg),
            other => SearchError::EmbeddingFailed(other.to_string()),
        }
    }
}

impl From<IndexError> for SearchError {
    fn from(e: IndexError) -> Self {
        SearchError::Internal(e.to_string())
    }
}

impl From<RegistryError> for SearchError {
    fn from(e: RegistryError) -> Self {
        SearchError::Internal(e.to_string())
    }
}

impl From<SnapshotError> for SearchError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::Incompatible(msg) => SearchError::ModelMismatch(msg),
            other => SearchError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SearchError::QueryEmpty.code(), "QueryEmpty");
        assert_eq!(SearchError::Overloaded.code(), "Overloaded");
        assert_eq!(SearchError::Cancelled.code(), "Cancelled");
    }

    #[test]
    fn retryability_follows_the_taxonomy() {
        assert!(SearchError::IndexNotReady.retryable());
        assert!(SearchError::Overloaded.retryable());
        assert!(!SearchError::QueryEmpty.retryable());
        assert!(!SearchError::Cancelled.retryable());
        assert!(!SearchError::NotFound("x".into()).retryable());
    }

    #[test]
    fn embed_errors_map_onto_the_taxonomy() {
        assert!(matches!(
            SearchError::from(EmbedError::Overloaded),
            SearchError::Overloaded
        ));
        assert!(matches!(
            SearchError::from(EmbedError::NotFitted),
            SearchError::IndexNotReady
        ));
    }
}
