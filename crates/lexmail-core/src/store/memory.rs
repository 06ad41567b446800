//! In-memory [`Store`] implementation for tests and small deployments.
//!
//! Emails live in a `BTreeMap` behind `std::sync::RwLock`. Relations are
//! derived from email attributes the same way ingestion materializes them:
//! shared thread id or reply linkage, shared dossier id, shared participant.
//! Vector search is brute-force cosine similarity.

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::filter::Predicate;
use crate::models::Email;

use super::{cmp_by_recency, cmp_by_similarity, Relation, ScoredEmail, Store};

/// In-memory email store.
pub struct InMemoryStore {
    emails: RwLock<BTreeMap<String, Email>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            emails: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build a store pre-populated with `emails`.
    pub fn with_emails(emails: impl IntoIterator<Item = Email>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.emails.write() {
            for email in emails {
                map.insert(email.id.clone(), email);
            }
        }
        store
    }

    /// Insert or replace an email.
    pub fn insert(&self, email: Email) -> Result<()> {
        let mut map = self
            .emails
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        map.insert(email.id.clone(), email);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.emails.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Email>>> {
        self.emails
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn related(seed: &Email, other: &Email, relation: Relation) -> bool {
    match relation {
        Relation::ThreadMember => {
            (!seed.thread_id.is_empty() && seed.thread_id == other.thread_id)
                || seed.is_reply_linked(other)
        }
        Relation::SameCase => seed.dossier_id.is_some() && seed.dossier_id == other.dossier_id,
        Relation::SharedParticipant => {
            let people: HashSet<&str> = seed.participants().collect();
            other.participants().any(|p| people.contains(p))
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn similarity_search(
        &self,
        predicate: &Predicate,
        query_vec: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredEmail>> {
        let emails = self.read()?;
        let mut scored: Vec<ScoredEmail> = emails
            .values()
            .filter(|e| predicate.matches(e))
            .map(|e| ScoredEmail {
                similarity: cosine_similarity(query_vec, &e.embedding) as f64,
                email: e.clone(),
            })
            .collect();
        scored.sort_by(cmp_by_similarity);
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn traverse(
        &self,
        email_ids: &[String],
        relation: Relation,
        limit: usize,
    ) -> Result<Vec<Email>> {
        let emails = self.read()?;
        let seeds: Vec<&Email> = email_ids.iter().filter_map(|id| emails.get(id)).collect();
        let mut hits: Vec<Email> = emails
            .values()
            .filter(|e| !email_ids.contains(&e.id))
            .filter(|e| seeds.iter().any(|s| related(s, e, relation)))
            .cloned()
            .collect();
        hits.sort_by(cmp_by_recency);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn filter_emails(&self, predicate: &Predicate, limit: usize) -> Result<Vec<Email>> {
        let emails = self.read()?;
        let mut hits: Vec<Email> = emails
            .values()
            .filter(|e| predicate.matches(e))
            .cloned()
            .collect();
        hits.sort_by(cmp_by_recency);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get_email(&self, id: &str) -> Result<Option<Email>> {
        Ok(self.read()?.get(id).cloned())
    }
}
