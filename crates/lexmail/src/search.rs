//! `search` and `browse` commands.
//!
//! `search` runs the full hybrid retrieval (embed → vector search → graph
//! expansion → ranking) through [`Retriever`] over the SQLite store.
//! `browse` is the metadata-only path: same filter validation, no
//! embedding call, most recent first.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use lexmail_core::embedding::EmbeddingProvider;
use lexmail_core::expand::ExpansionBranches;
use lexmail_core::models::{Category, Email};
use lexmail_core::retrieve::browse;
use lexmail_core::{
    DateRange, FilterRequest, RetrievalError, RetrievalRequest, RetrievalResult, Retriever,
};

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::sqlite_store::SqliteStore;

/// Metadata filters shared by `search` and `browse`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct FilterArgs {
    /// Sender category: client, opposing-counsel, medical-expert, court, other.
    #[arg(long)]
    pub category: Option<String>,
    /// Client identifier.
    #[arg(long = "client")]
    pub client_id: Option<String>,
    /// Dossier reference (e.g. `24/00123`).
    #[arg(long = "dossier")]
    pub dossier_id: Option<String>,
    /// Exact sender address.
    #[arg(long = "sender")]
    pub sender_email: Option<String>,
    /// Only emails on or after this date (YYYY-MM-DD or RFC 3339).
    #[arg(long)]
    pub from: Option<String>,
    /// Only emails on or before this date (YYYY-MM-DD or RFC 3339).
    #[arg(long)]
    pub to: Option<String>,
    /// Match emails carrying any of these tags (repeatable).
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

impl FilterArgs {
    pub fn to_filter_request(&self) -> Result<FilterRequest> {
        let start = self
            .from
            .as_deref()
            .map(|raw| parse_date_bound(raw, false))
            .transpose()?;
        let end = self
            .to
            .as_deref()
            .map(|raw| parse_date_bound(raw, true))
            .transpose()?;

        Ok(FilterRequest {
            category: self.category.clone(),
            client_id: self.client_id.clone(),
            dossier_id: self.dossier_id.clone(),
            sender_email: self.sender_email.clone(),
            date_range: (start.is_some() || end.is_some()).then_some(DateRange { start, end }),
            tags: (!self.tags.is_empty()).then(|| self.tags.clone()),
        })
    }
}

/// Parse a date bound. A bare day covers the whole day.
fn parse_date_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}': expected YYYY-MM-DD or RFC 3339", raw))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| anyhow!("invalid date '{}'", raw))
}

/// Options of one `search` invocation.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: Option<usize>,
    pub max_results: Option<usize>,
    pub expand_graph: bool,
    pub branches: ExpansionBranches,
    pub filters: FilterRequest,
    pub explain: bool,
}

impl SearchOptions {
    pub fn to_request(&self, query: &str) -> RetrievalRequest {
        RetrievalRequest {
            query: query.to_string(),
            filters: self.filters.clone(),
            top_k: self.top_k,
            expand_graph: self.expand_graph,
            max_results: self.max_results,
            branches: self.branches,
            explain: self.explain,
        }
    }
}

/// Run one retrieval against an open store.
pub async fn search_emails(
    store: Arc<SqliteStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: &Config,
    query: &str,
    options: &SearchOptions,
    cancel: &CancellationToken,
) -> Result<RetrievalResult, RetrievalError> {
    let retriever = Retriever::new(store, embedder, config.engine_config());
    retriever
        .retrieve_with_cancel(&options.to_request(query), cancel)
        .await
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: &'a str,
    message: String,
}

fn print_json_error(err: &RetrievalError) -> Result<()> {
    let body = serde_json::json!({
        "error": ErrorBody {
            kind: err.kind(),
            message: err.to_string(),
        }
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Run the `search` command. Ctrl-C cancels the in-flight retrieval.
pub async fn run_search(
    config: &Config,
    query: &str,
    options: &SearchOptions,
    json: bool,
) -> Result<()> {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
    let pool = db::connect(config).await?;
    let store = Arc::new(SqliteStore::new(pool));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received; cancelling retrieval");
            trigger.cancel();
        }
    });

    let outcome = search_emails(store.clone(), embedder, config, query, options, &cancel).await;
    ctrl_c.abort();
    store.pool().close().await;

    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            if json {
                print_json_error(&err)?;
            }
            return Err(err.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.items.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, item) in result.items.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} — {}",
            i + 1,
            item.score,
            item.origin,
            item.subject
        );
        println!(
            "    from: {} <{}>",
            display_name(&item.sender_name, &item.sender_email),
            item.sender_email
        );
        println!("    date: {}", item.timestamp.format("%Y-%m-%d %H:%M"));
        if let Some(dossier) = &item.dossier_id {
            println!("    dossier: {}", dossier);
        }
        if let Some(category) = item.category {
            println!("    category: {}", category);
        }
        println!("    excerpt: \"{}\"", excerpt(&item.body, 200));
        if let Some(ex) = &item.explain {
            println!(
                "    explain: similarity={:.3} recency={:.3} origin={:.2} (weights {:.2}/{:.2}/{:.2})",
                ex.similarity,
                ex.recency_boost,
                ex.origin_boost,
                ex.weights.similarity,
                ex.weights.recency,
                ex.weights.origin
            );
        }
        println!("    id: {}", item.email_id);
        println!();
    }
    println!(
        "{} of {} candidates shown{}",
        result.items.len(),
        result.total_candidates,
        if result.failed_branches > 0 {
            format!(" ({} expansion branches failed)", result.failed_branches)
        } else {
            String::new()
        }
    );

    Ok(())
}

/// One metadata-only search hit.
#[derive(Debug, Serialize)]
pub struct BrowseItem {
    pub email_id: String,
    pub subject: String,
    pub sender_email: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub category: Option<Category>,
    pub dossier_id: Option<String>,
    pub origin: &'static str,
}

impl From<Email> for BrowseItem {
    fn from(email: Email) -> Self {
        Self {
            email_id: email.id,
            subject: email.subject,
            sender_email: email.sender_email,
            sender_name: email.sender_name,
            timestamp: email.timestamp,
            category: email.category,
            dossier_id: email.dossier_id,
            origin: "metadata_filter",
        }
    }
}

/// Metadata-only search against an open store.
pub async fn browse_emails(
    store: &SqliteStore,
    filters: &FilterRequest,
    limit: usize,
) -> Result<Vec<BrowseItem>, RetrievalError> {
    let emails = browse(store, filters, limit).await?;
    Ok(emails.into_iter().map(BrowseItem::from).collect())
}

/// Run the `browse` command.
pub async fn run_browse(
    config: &Config,
    filters: &FilterRequest,
    limit: usize,
    json: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let outcome = browse_emails(&store, filters, limit).await;
    store.pool().close().await;

    let items = match outcome {
        Ok(items) => items,
        Err(err) => {
            if json {
                print_json_error(&err)?;
            }
            return Err(err.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for item in &items {
        println!(
            "{}  {:<16} {} — {}",
            item.timestamp.format("%Y-%m-%d"),
            item.category.map(|c| c.as_str()).unwrap_or("-"),
            display_name(&item.sender_name, &item.sender_email),
            item.subject
        );
        println!("    id: {}", item.email_id);
    }

    Ok(())
}

fn display_name<'a>(name: &'a str, email: &'a str) -> &'a str {
    if name.is_empty() {
        email
    } else {
        name
    }
}

fn excerpt(body: &str, max_chars: usize) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_args_day_bounds() {
        let args = FilterArgs {
            from: Some("2024-01-01".into()),
            to: Some("2024-01-31".into()),
            tags: vec!["urgent".into()],
            ..Default::default()
        };
        let req = args.to_filter_request().unwrap();
        let range = req.date_range.unwrap();
        assert_eq!(range.start.unwrap().to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(range.end.unwrap().to_rfc3339(), "2024-01-31T23:59:59+00:00");
        assert_eq!(req.tags, Some(vec!["urgent".to_string()]));
    }

    #[test]
    fn test_filter_args_without_bounds() {
        let req = FilterArgs::default().to_filter_request().unwrap();
        assert!(req.date_range.is_none());
        assert!(req.tags.is_none());
        assert!(FilterArgs {
            from: Some("01/02/2024".into()),
            ..Default::default()
        }
        .to_filter_request()
        .is_err());
    }

    #[test]
    fn test_excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\n\n b", 10), "a b");
        assert_eq!(excerpt("abcdefghijkl", 4), "abcd…");
    }
}
