//! Retrieval orchestrator.
//!
//! [`Retriever`] is the single entry point of the engine. It holds the
//! long-lived store and embedding collaborators plus an immutable
//! [`EngineConfig`], and keeps no state between calls.
//!
//! # Sequence
//!
//! 1. Compile filters (fail fast on [`RetrievalError::InvalidFilter`]).
//! 2. Embed the query (fail fast on [`RetrievalError::EmbeddingService`]).
//! 3. Vector search; a [`RetrievalError::SearchBackend`] failure is retried
//!    once after `search_retry_backoff`.
//! 4. Graph expansion, if requested (branch failures are non-fatal).
//! 5. Deduplicate, score, and truncate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::RetrievalError;
use crate::expand::{expand_graph, ExpansionBranches};
use crate::filter::{compile, FilterRequest, Predicate};
use crate::models::{Candidate, Email, RetrievalResult};
use crate::rank::{rank, RankingConfig};
use crate::search::vector_search;
use crate::store::Store;

/// Immutable engine configuration, fixed at [`Retriever`] construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Embedding dimension shared by every stored email and the query.
    pub dims: usize,
    /// Direct matches when the request does not say.
    pub default_top_k: usize,
    /// Upper bound applied to any requested `top_k`.
    pub max_top_k: usize,
    /// Result bound when the request does not say.
    pub default_max_results: usize,
    /// Emails fetched per (direct match, relation) branch.
    pub branch_limit: usize,
    /// Delay before the single similarity-search retry.
    pub search_retry_backoff: Duration,
    pub ranking: RankingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dims: 1536,
            default_top_k: 5,
            max_top_k: 50,
            default_max_results: 20,
            branch_limit: 3,
            search_retry_backoff: Duration::from_millis(200),
            ranking: RankingConfig::default(),
        }
    }
}

/// One retrieval call's inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalRequest {
    pub query: String,
    pub filters: FilterRequest,
    /// Direct matches to fetch; engine default when `None`.
    pub top_k: Option<usize>,
    pub expand_graph: bool,
    /// Result bound; engine default when `None`.
    pub max_results: Option<usize>,
    pub branches: ExpansionBranches,
    /// Attach a score breakdown to every item.
    pub explain: bool,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: FilterRequest::default(),
            top_k: None,
            expand_graph: true,
            max_results: None,
            branches: ExpansionBranches::default(),
            explain: false,
        }
    }
}

/// Hybrid vector + graph retriever over a [`Store`] and an [`EmbeddingProvider`].
pub struct Retriever<S: ?Sized, E: ?Sized> {
    store: Arc<S>,
    embedder: Arc<E>,
    config: EngineConfig,
}

impl<S, E> Retriever<S, E>
where
    S: Store + ?Sized,
    E: EmbeddingProvider + ?Sized,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: EngineConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a full retrieval with no external cancellation.
    pub async fn retrieve(
        &self,
        req: &RetrievalRequest,
    ) -> Result<RetrievalResult, RetrievalError> {
        self.retrieve_with_cancel(req, &CancellationToken::new())
            .await
    }

    /// Run a full retrieval, stopping promptly once `cancel` fires.
    pub async fn retrieve_with_cancel(
        &self,
        req: &RetrievalRequest,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult, RetrievalError> {
        let started = Instant::now();
        let predicate = compile(&req.filters)?;
        let top_k = self.resolve_top_k(req.top_k)?;
        check_cancelled(cancel)?;

        let query_vec = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetrievalError::Cancelled),
            embedded = self.embedder.embed(&req.query) => {
                embedded.map_err(RetrievalError::EmbeddingService)?
            }
        };
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            model = self.embedder.model_name(),
            "query embedded"
        );

        self.run_stages(req, &predicate, &query_vec, top_k, cancel)
            .await
    }

    /// Run steps 3–5 with a caller-supplied query vector.
    pub async fn retrieve_by_vector(
        &self,
        req: &RetrievalRequest,
        query_vec: &[f32],
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult, RetrievalError> {
        let predicate = compile(&req.filters)?;
        let top_k = self.resolve_top_k(req.top_k)?;
        self.run_stages(req, &predicate, query_vec, top_k, cancel)
            .await
    }

    /// Metadata-only search: emails satisfying `filters`, most recent first.
    pub async fn browse(
        &self,
        filters: &FilterRequest,
        limit: usize,
    ) -> Result<Vec<Email>, RetrievalError> {
        browse(self.store.as_ref(), filters, limit).await
    }

    async fn run_stages(
        &self,
        req: &RetrievalRequest,
        predicate: &Predicate,
        query_vec: &[f32],
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult, RetrievalError> {
        let started = Instant::now();
        let direct = self
            .search_with_retry(predicate, query_vec, top_k, cancel)
            .await?;
        debug!(
            hits = direct.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "vector search complete"
        );

        let mut failed_branches = 0;
        let mut candidates = direct;
        if req.expand_graph && !candidates.is_empty() {
            let expansion = expand_graph(
                self.store.as_ref(),
                &candidates,
                req.branches,
                self.config.branch_limit,
                cancel,
            )
            .await?;
            failed_branches = expansion.failed_branches;
            candidates.extend(expansion.candidates);
        }
        check_cancelled(cancel)?;

        let max_results = req
            .max_results
            .unwrap_or(self.config.default_max_results);
        let mut result = rank(
            candidates,
            &self.config.ranking,
            Utc::now(),
            max_results,
            req.explain,
        );
        result.failed_branches = failed_branches;

        debug!(
            items = result.items.len(),
            total = result.total_candidates,
            failed_branches,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieval complete"
        );
        Ok(result)
    }

    async fn search_with_retry(
        &self,
        predicate: &Predicate,
        query_vec: &[f32],
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>, RetrievalError> {
        check_cancelled(cancel)?;
        let store = self.store.as_ref();
        let dims = self.config.dims;

        match vector_search(store, predicate, query_vec, top_k, dims).await {
            Err(err) if err.is_retryable() => {
                warn!(
                    error = %err,
                    backoff_ms = self.config.search_retry_backoff.as_millis() as u64,
                    "similarity search failed; retrying once"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetrievalError::Cancelled),
                    _ = tokio::time::sleep(self.config.search_retry_backoff) => {}
                }
                vector_search(store, predicate, query_vec, top_k, dims).await
            }
            other => other,
        }
    }

    fn resolve_top_k(&self, requested: Option<usize>) -> Result<usize, RetrievalError> {
        match requested {
            Some(0) => Err(RetrievalError::InvalidRequest(
                "top_k must be a positive integer".to_string(),
            )),
            Some(k) => Ok(k.min(self.config.max_top_k)),
            None => Ok(self.config.default_top_k.min(self.config.max_top_k)),
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), RetrievalError> {
    if cancel.is_cancelled() {
        Err(RetrievalError::Cancelled)
    } else {
        Ok(())
    }
}

/// Metadata-only search against any [`Store`].
pub async fn browse<S: Store + ?Sized>(
    store: &S,
    filters: &FilterRequest,
    limit: usize,
) -> Result<Vec<Email>, RetrievalError> {
    let predicate = compile(filters)?;
    store
        .filter_emails(&predicate, limit)
        .await
        .map_err(RetrievalError::SearchBackend)
}
