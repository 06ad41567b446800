//! Storage abstraction for Lexmail.
//!
//! The [`Store`] trait is the storage/query capability the retrieval
//! engine consumes: a filtered cosine-similarity primitive and a
//! traverse-by-relation primitive. The engine never materializes the
//! email graph; it only asks for bounded neighborhoods.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::cmp::Ordering;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::filter::Predicate;
use crate::models::{Email, Origin};

/// Graph relations the expansion stage can traverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// Same conversation thread, including direct reply edges.
    ThreadMember,
    /// Related to the same case/matter.
    SameCase,
    /// Involves at least one of the same people.
    SharedParticipant,
}

impl Relation {
    pub const ALL: [Relation; 3] = [
        Relation::ThreadMember,
        Relation::SameCase,
        Relation::SharedParticipant,
    ];

    /// Edge name in the storage schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::ThreadMember => "thread_member",
            Relation::SameCase => "related_to_case",
            Relation::SharedParticipant => "involves",
        }
    }

    /// Origin tag given to emails reached through this relation.
    pub fn origin(&self) -> Origin {
        match self {
            Relation::ThreadMember => Origin::ThreadMember,
            Relation::SameCase => Origin::SameCase,
            Relation::SharedParticipant => Origin::SamePeople,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An email returned by [`Store::similarity_search`] with its score.
#[derive(Debug, Clone)]
pub struct ScoredEmail {
    pub email: Email,
    /// Cosine similarity to the query vector.
    pub similarity: f64,
}

/// Order by similarity (desc), timestamp (desc), id (asc).
pub fn cmp_by_similarity(a: &ScoredEmail, b: &ScoredEmail) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then(b.email.timestamp.cmp(&a.email.timestamp))
        .then(a.email.id.cmp(&b.email.id))
}

/// Order by timestamp (desc), id (asc).
pub fn cmp_by_recency(a: &Email, b: &Email) -> Ordering {
    b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id))
}

/// Abstract storage/query capability.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`similarity_search`](Store::similarity_search) | Filtered cosine nearest-neighbour search |
/// | [`traverse`](Store::traverse) | Bounded neighbours of a set of emails over one relation |
/// | [`filter_emails`](Store::filter_emails) | Metadata-only listing, most recent first |
/// | [`get_email`](Store::get_email) | Fetch one email by id |
#[async_trait]
pub trait Store: Send + Sync {
    /// Return up to `top_k` emails satisfying `predicate`, ordered by
    /// descending cosine similarity to `query_vec`.
    async fn similarity_search(
        &self,
        predicate: &Predicate,
        query_vec: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredEmail>>;

    /// Return up to `limit` emails connected to any of `email_ids` via
    /// `relation`, excluding the seeds themselves, most recent first.
    async fn traverse(
        &self,
        email_ids: &[String],
        relation: Relation,
        limit: usize,
    ) -> Result<Vec<Email>>;

    /// Return up to `limit` emails satisfying `predicate`, most recent first.
    async fn filter_emails(&self, predicate: &Predicate, limit: usize) -> Result<Vec<Email>>;

    /// Retrieve one email by id.
    async fn get_email(&self, id: &str) -> Result<Option<Email>>;
}
