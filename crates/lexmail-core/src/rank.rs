//! Deduplication and ranking stage.
//!
//! # Scoring
//!
//! 1. Group candidates by email id. Keep the highest-precedence origin
//!    (`direct_match` > `thread_member` > `same_case` > `same_people`) and
//!    the maximum similarity observed.
//! 2. `score = similarity × W_sim + recency × W_recency + origin_boost × W_origin`,
//!    where `recency = clamp(1 - age / window, 0, 1)`.
//! 3. Sort by score (desc), timestamp (desc), id (asc).
//! 4. Truncate to `max_results`.
//!
//! The stage is a pure function of its inputs, the configuration, and the
//! supplied `now`.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Candidate, Origin, RetrievalItem, RetrievalResult};

/// Weights of the composite score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub similarity: f64,
    pub recency: f64,
    pub origin: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            similarity: 0.6,
            recency: 0.15,
            origin: 0.25,
        }
    }
}

/// Fixed boost per origin tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginBoosts {
    pub direct_match: f64,
    pub thread_member: f64,
    pub same_case: f64,
    pub same_people: f64,
}

impl Default for OriginBoosts {
    fn default() -> Self {
        Self {
            direct_match: 1.0,
            thread_member: 0.6,
            same_case: 0.4,
            same_people: 0.2,
        }
    }
}

impl OriginBoosts {
    pub fn boost(&self, origin: Origin) -> f64 {
        match origin {
            Origin::DirectMatch => self.direct_match,
            Origin::ThreadMember => self.thread_member,
            Origin::SameCase => self.same_case,
            Origin::SamePeople => self.same_people,
        }
    }
}

/// Ranking tuning parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingConfig {
    pub weights: RankingWeights,
    pub origin_boost: OriginBoosts,
    /// Age at which the recency boost reaches zero.
    pub recency_window: Duration,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: RankingWeights::default(),
            origin_boost: OriginBoosts::default(),
            recency_window: Duration::days(365),
        }
    }
}

/// Scoring breakdown for a ranked item.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreExplanation {
    pub similarity: f64,
    pub recency_boost: f64,
    pub origin_boost: f64,
    pub weights: RankingWeights,
}

/// Clipped linear decay: `1.0` at age zero (or in the future), `0.0` at
/// or beyond `window`.
pub fn recency_boost(timestamp: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> f64 {
    let window_secs = window.num_seconds();
    if window_secs <= 0 {
        return 0.0;
    }
    let age_secs = (now - timestamp).num_seconds().max(0);
    (1.0 - age_secs as f64 / window_secs as f64).clamp(0.0, 1.0)
}

/// Collapse candidates sharing an email id, ordered by id.
pub fn deduplicate(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut by_id: BTreeMap<String, Candidate> = BTreeMap::new();
    for c in candidates {
        match by_id.get_mut(&c.email.id) {
            Some(existing) => {
                if c.origin.precedence() > existing.origin.precedence() {
                    existing.origin = c.origin;
                }
                existing.similarity = existing.similarity.max(c.similarity);
            }
            None => {
                by_id.insert(c.email.id.clone(), c);
            }
        }
    }
    by_id.into_values().collect()
}

/// Deduplicate, score, order, and truncate a candidate multiset.
pub fn rank(
    candidates: Vec<Candidate>,
    config: &RankingConfig,
    now: DateTime<Utc>,
    max_results: usize,
    explain: bool,
) -> RetrievalResult {
    let unique = deduplicate(candidates);
    let total_candidates = unique.len();
    let w = config.weights;

    let mut items: Vec<RetrievalItem> = unique
        .into_iter()
        .map(|c| {
            let recency = recency_boost(c.email.timestamp, now, config.recency_window);
            let origin = config.origin_boost.boost(c.origin);
            let score = c.similarity * w.similarity + recency * w.recency + origin * w.origin;
            RetrievalItem {
                email_id: c.email.id,
                subject: c.email.subject,
                body: c.email.body,
                sender_email: c.email.sender_email,
                sender_name: c.email.sender_name,
                timestamp: c.email.timestamp,
                score,
                similarity: c.similarity,
                origin: c.origin,
                category: c.email.category,
                dossier_id: c.email.dossier_id,
                explain: explain.then(|| ScoreExplanation {
                    similarity: c.similarity,
                    recency_boost: recency,
                    origin_boost: origin,
                    weights: w,
                }),
            }
        })
        .collect();

    items.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.timestamp.cmp(&a.timestamp))
            .then(a.email_id.cmp(&b.email_id))
    });
    items.truncate(max_results);

    RetrievalResult {
        items,
        total_candidates,
        failed_branches: 0,
    }
}
