//! Vector search stage.
//!
//! Runs the store's cosine-similarity primitive under a compiled
//! [`Predicate`] and tags every hit as [`Origin::DirectMatch`].

use crate::error::RetrievalError;
use crate::filter::Predicate;
use crate::models::{Candidate, Origin};
use crate::store::{cmp_by_similarity, Store};

/// Return up to `top_k` direct matches for `query_vec`.
///
/// Results are ordered by descending similarity, ties broken by more
/// recent timestamp, then by id.
///
/// # Errors
///
/// - [`RetrievalError::EmbeddingDimensionMismatch`] if `query_vec.len() != dims`;
///   checked before the store is contacted.
/// - [`RetrievalError::SearchBackend`] if the store query fails.
pub async fn vector_search<S: Store + ?Sized>(
    store: &S,
    predicate: &Predicate,
    query_vec: &[f32],
    top_k: usize,
    dims: usize,
) -> Result<Vec<Candidate>, RetrievalError> {
    if query_vec.len() != dims {
        return Err(RetrievalError::EmbeddingDimensionMismatch {
            expected: dims,
            actual: query_vec.len(),
        });
    }

    let mut hits = store
        .similarity_search(predicate, query_vec, top_k)
        .await
        .map_err(RetrievalError::SearchBackend)?;

    hits.sort_by(cmp_by_similarity);
    hits.truncate(top_k);

    Ok(hits
        .into_iter()
        .map(|h| Candidate {
            email: h.email,
            similarity: h.similarity,
            origin: Origin::DirectMatch,
        })
        .collect())
}
