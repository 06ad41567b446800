//! Error taxonomy for a retrieval call.

use thiserror::Error;

use crate::store::Relation;

/// Errors surfaced by the retrieval engine.
///
/// Fatal kinds abort the call with no partial result. `ExpansionBranch`
/// is only ever logged by the expansion stage; it never reaches the caller.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// The filter object is malformed (unknown category, inverted date range).
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Request parameters outside their accepted range (e.g. `top_k = 0`).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The query vector length differs from the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch {
        /// Configured embedding dimension.
        expected: usize,
        /// Length of the supplied vector.
        actual: usize,
    },

    /// The storage layer's similarity query failed.
    #[error("Search backend error: {0:#}")]
    SearchBackend(#[source] anyhow::Error),

    /// One expansion branch failed for one candidate.
    #[error("Expansion branch `{relation}` failed for email `{email_id}`: {source:#}")]
    ExpansionBranch {
        /// The direct match the branch was expanding.
        email_id: String,
        /// The relation being traversed.
        relation: Relation,
        /// Underlying storage error.
        #[source]
        source: anyhow::Error,
    },

    /// The embedding collaborator could not embed the query.
    #[error("Embedding service error: {0:#}")]
    EmbeddingService(#[source] anyhow::Error),

    /// The caller cancelled the retrieval.
    #[error("Retrieval cancelled")]
    Cancelled,
}

impl RetrievalError {
    /// Whether the orchestrator may retry the failed step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetrievalError::SearchBackend(_))
    }

    /// Stable machine-readable kind, used in CLI JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            RetrievalError::InvalidFilter(_) => "invalid_filter",
            RetrievalError::InvalidRequest(_) => "invalid_request",
            RetrievalError::EmbeddingDimensionMismatch { .. } => "embedding_dimension_mismatch",
            RetrievalError::SearchBackend(_) => "search_backend",
            RetrievalError::ExpansionBranch { .. } => "expansion_branch",
            RetrievalError::EmbeddingService(_) => "embedding_service",
            RetrievalError::Cancelled => "cancelled",
        }
    }
}
