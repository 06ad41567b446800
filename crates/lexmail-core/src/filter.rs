//! Filter compiler.
//!
//! Turns a caller-supplied [`FilterRequest`] into a conjunctive
//! [`Predicate`]. Storage backends either evaluate the predicate directly
//! ([`Predicate::matches`]) or translate its [`Clause`]s into their own
//! query language.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;
use crate::models::{Category, Email};

/// Inclusive timestamp bounds. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Structured metadata filters as received from the caller.
///
/// `category` is kept as a raw string so that values outside the closed
/// category set can be reported as [`RetrievalError::InvalidFilter`].
/// Empty strings and empty tag lists impose no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterRequest {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub dossier_id: Option<String>,
    #[serde(default)]
    pub sender_email: Option<String>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    /// Match-any tag set.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// One conjunct of a compiled [`Predicate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Category(Category),
    ClientId(String),
    DossierId(String),
    SenderEmail(String),
    DateRange {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    AnyTag(BTreeSet<String>),
}

impl Clause {
    pub fn matches(&self, email: &Email) -> bool {
        match self {
            Clause::Category(c) => email.category == Some(*c),
            Clause::ClientId(id) => email.client_id.as_deref() == Some(id.as_str()),
            Clause::DossierId(id) => email.dossier_id.as_deref() == Some(id.as_str()),
            Clause::SenderEmail(addr) => email.sender_email == *addr,
            Clause::DateRange { start, end } => {
                start.map_or(true, |s| email.timestamp >= s)
                    && end.map_or(true, |e| email.timestamp <= e)
            }
            Clause::AnyTag(tags) => tags.iter().any(|t| email.tags.contains(t)),
        }
    }
}

/// Conjunction of [`Clause`]s. An empty predicate matches every email.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    /// The predicate with no constraints.
    pub fn always() -> Self {
        Self::default()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_unconstrained(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, email: &Email) -> bool {
        self.clauses.iter().all(|c| c.matches(email))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Compile a filter request into a conjunctive predicate.
///
/// # Errors
///
/// [`RetrievalError::InvalidFilter`] when `category` is outside the closed
/// set or `date_range.start > date_range.end`.
pub fn compile(filters: &FilterRequest) -> Result<Predicate, RetrievalError> {
    let mut clauses = Vec::new();

    if let Some(raw) = non_empty(&filters.category) {
        let category = raw
            .parse::<Category>()
            .map_err(|e| RetrievalError::InvalidFilter(e.to_string()))?;
        clauses.push(Clause::Category(category));
    }
    if let Some(id) = non_empty(&filters.client_id) {
        clauses.push(Clause::ClientId(id));
    }
    if let Some(id) = non_empty(&filters.dossier_id) {
        clauses.push(Clause::DossierId(id));
    }
    if let Some(addr) = non_empty(&filters.sender_email) {
        clauses.push(Clause::SenderEmail(addr));
    }
    if let Some(range) = filters.date_range {
        if let (Some(start), Some(end)) = (range.start, range.end) {
            if start > end {
                return Err(RetrievalError::InvalidFilter(format!(
                    "date_range.start ({}) is after date_range.end ({})",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                )));
            }
        }
        if range.start.is_some() || range.end.is_some() {
            clauses.push(Clause::DateRange {
                start: range.start,
                end: range.end,
            });
        }
    }
    if let Some(tags) = &filters.tags {
        let tags: BTreeSet<String> = tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if !tags.is_empty() {
            clauses.push(Clause::AnyTag(tags));
        }
    }

    Ok(Predicate { clauses })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::email;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_empty_filter_is_unconstrained() {
        let p = compile(&FilterRequest::default()).unwrap();
        assert!(p.is_unconstrained());
        assert!(p.matches(&email("a")));
    }

    #[test]
    fn test_invalid_category_rejected() {
        let filters = FilterRequest {
            category: Some("invalid_value".into()),
            ..Default::default()
        };
        let err = compile(&filters).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidFilter(_)));
    }

    #[test]
    fn test_inverted_date_range_rejected() {
        let filters = FilterRequest {
            date_range: Some(DateRange {
                start: Some(ts(2024, 6, 1)),
                end: Some(ts(2024, 1, 1)),
            }),
            ..Default::default()
        };
        assert!(matches!(
            compile(&filters),
            Err(RetrievalError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_blank_values_impose_no_constraint() {
        let filters = FilterRequest {
            client_id: Some("  ".into()),
            tags: Some(vec![String::new()]),
            date_range: Some(DateRange::default()),
            ..Default::default()
        };
        assert!(compile(&filters).unwrap().is_unconstrained());
    }

    #[test]
    fn test_conjunction_of_all_keys() {
        let filters = FilterRequest {
            category: Some("client".into()),
            client_id: Some("martin_123".into()),
            dossier_id: Some("24/00123".into()),
            sender_email: Some("martin@client.fr".into()),
            date_range: Some(DateRange {
                start: Some(ts(2024, 1, 1)),
                end: Some(ts(2024, 12, 31)),
            }),
            tags: Some(vec!["urgent".into(), "expertise".into()]),
        };
        let p = compile(&filters).unwrap();
        assert_eq!(p.clauses().len(), 6);

        let mut e = email("m1");
        e.category = Some(Category::Client);
        e.client_id = Some("martin_123".into());
        e.dossier_id = Some("24/00123".into());
        e.sender_email = "martin@client.fr".into();
        e.timestamp = ts(2024, 3, 15);
        e.tags.insert("expertise".into());
        assert!(p.matches(&e));

        let mut wrong_dossier = e.clone();
        wrong_dossier.dossier_id = Some("24/00999".into());
        assert!(!p.matches(&wrong_dossier));

        let mut no_tag = e.clone();
        no_tag.tags.clear();
        assert!(!p.matches(&no_tag));

        let mut too_late = e;
        too_late.timestamp = ts(2025, 1, 2);
        assert!(!p.matches(&too_late));
    }

    #[test]
    fn test_date_range_is_inclusive_and_open_ended() {
        let filters = FilterRequest {
            date_range: Some(DateRange {
                start: Some(ts(2024, 1, 1)),
                end: None,
            }),
            ..Default::default()
        };
        let p = compile(&filters).unwrap();
        let mut e = email("a");
        e.timestamp = ts(2024, 1, 1);
        assert!(p.matches(&e));
        e.timestamp = ts(2023, 12, 31);
        assert!(!p.matches(&e));
    }
}
