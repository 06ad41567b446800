//! Core data models for Lexmail.
//!
//! [`Email`], [`Person`], and [`Case`] are created during ingestion and are
//! read-only to the retrieval engine. [`Candidate`] and [`RetrievalResult`]
//! live only for the duration of one retrieval call.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rank::ScoreExplanation;

/// Sender classification assigned during ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Client,
    OpposingCounsel,
    MedicalExpert,
    Court,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Client,
        Category::OpposingCounsel,
        Category::MedicalExpert,
        Category::Court,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Client => "client",
            Category::OpposingCounsel => "opposing-counsel",
            Category::MedicalExpert => "medical-expert",
            Category::Court => "court",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A category string outside the closed set.
#[derive(Debug, Clone, Error)]
#[error("unknown category `{0}` (expected one of: client, opposing-counsel, medical-expert, court, other)")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// A stored email with its precomputed embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub sender_email: String,
    pub sender_name: String,
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Conversation thread identifier. Empty when the source had none.
    pub thread_id: String,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub category: Option<Category>,
    pub client_id: Option<String>,
    /// Case/matter reference (e.g. `"24/00123"`).
    pub dossier_id: Option<String>,
    pub priority: Option<bool>,
    pub tags: BTreeSet<String>,
    pub has_attachments: bool,
    pub language: String,
    pub embedding: Vec<f32>,
}

impl Email {
    /// Sender, recipients, and cc addresses, in that order.
    pub fn participants(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.sender_email.as_str())
            .chain(self.recipients.iter().map(String::as_str))
            .chain(self.cc.iter().map(String::as_str))
            .filter(|addr| !addr.is_empty())
    }

    /// Whether `other` is a direct reply to this email or vice versa.
    pub fn is_reply_linked(&self, other: &Email) -> bool {
        let replies = |child: &Email, parent: &Email| {
            !parent.message_id.is_empty()
                && child.in_reply_to.as_deref() == Some(parent.message_id.as_str())
        };
        replies(self, other) || replies(other, self)
    }
}

/// Role of a [`Person`] in the practice's correspondence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Client,
    OpposingCounsel,
    Expert,
    Court,
}

impl Role {
    /// The role implied by a sender's email category, if any.
    pub fn from_category(category: Category) -> Option<Role> {
        match category {
            Category::Client => Some(Role::Client),
            Category::OpposingCounsel => Some(Role::OpposingCounsel),
            Category::MedicalExpert => Some(Role::Expert),
            Category::Court => Some(Role::Court),
            Category::Other => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::OpposingCounsel => "opposing-counsel",
            Role::Expert => "expert",
            Role::Court => "court",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Role::Client),
            "opposing-counsel" => Ok(Role::OpposingCounsel),
            "expert" => Ok(Role::Expert),
            "court" => Ok(Role::Court),
            other => anyhow::bail!("unknown role `{}`", other),
        }
    }
}

/// A correspondent, identified by email address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub email: String,
    pub display_name: String,
    pub role: Option<Role>,
}

/// A case (dossier), identified by its reference string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub reference: String,
    pub client_name: String,
    pub description: String,
}

/// Why an email ended up in the candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    DirectMatch,
    ThreadMember,
    SameCase,
    SamePeople,
}

impl Origin {
    /// Fixed dedup priority: higher wins when an email has several origins.
    pub fn precedence(&self) -> u8 {
        match self {
            Origin::DirectMatch => 3,
            Origin::ThreadMember => 2,
            Origin::SameCase => 1,
            Origin::SamePeople => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::DirectMatch => "direct_match",
            Origin::ThreadMember => "thread_member",
            Origin::SameCase => "same_case",
            Origin::SamePeople => "same_people",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An email under consideration within a single retrieval call.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub email: Email,
    /// Cosine similarity to the query; `0.0` for expansion hits.
    pub similarity: f64,
    pub origin: Origin,
}

/// One ranked entry of a [`RetrievalResult`].
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalItem {
    pub email_id: String,
    pub subject: String,
    pub body: String,
    pub sender_email: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    /// Composite relevance score.
    pub score: f64,
    pub similarity: f64,
    pub origin: Origin,
    pub category: Option<Category>,
    pub dossier_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<ScoreExplanation>,
}

/// Ordered, deduplicated, size-bounded output of one retrieval call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub items: Vec<RetrievalItem>,
    /// Unique emails considered before truncation to `max_results`.
    pub total_candidates: usize,
    /// Expansion branches that failed and were treated as empty.
    pub failed_branches: usize,
}
