//! Email import: JSONL records → embeddings → SQLite nodes and edges.
//!
//! Each line of the input file is one pre-classified email (category,
//! client and dossier already assigned). Records without an embedding are
//! embedded in batches with the configured provider. After the emails are
//! stored, the graph relations the retrieval engine traverses are built:
//!
//! 1. `thread_member` between every pair of emails sharing a thread id
//! 2. `replies_to` from `in_reply_to` resolved against stored `message_id`s
//! 3. `involves` edges to sender, recipients, and cc (persons upserted)
//! 4. `related_to_case` edges to the email's dossier (case upserted)

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use lexmail_core::embedding::{email_embedding_text, EmbeddingProvider};
use lexmail_core::models::{Case, Category, Email, Person, Role};

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::sqlite_store::{Involvement, LinkKind, SqliteStore};

/// One line of an import file.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub sender_email: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    /// RFC 3339, or ISO 8601 without offset (read as UTC).
    #[serde(alias = "date")]
    pub timestamp: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub dossier_id: Option<String>,
    #[serde(default)]
    pub priority: Option<bool>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Settings that shape one import run.
#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    /// Required embedding length.
    pub dims: usize,
    /// Texts per embedding request.
    pub batch_size: usize,
}

/// Counts reported after an import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub emails: usize,
    pub embedded: usize,
    pub thread_links: usize,
    pub reply_links: usize,
    pub involves: usize,
    pub cases: usize,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| anyhow!("invalid timestamp '{}'", raw))
}

impl EmailRecord {
    /// Convert into a stored [`Email`]. The embedding may still be empty.
    pub fn into_email(self) -> Result<Email> {
        let category = non_empty(self.category)
            .map(|c| c.parse::<Category>())
            .transpose()?;
        let timestamp = parse_timestamp(&self.timestamp)?;
        let message_id = non_empty(self.message_id).unwrap_or_default();
        let id = non_empty(self.id)
            .or_else(|| (!message_id.is_empty()).then(|| message_id.clone()))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Email {
            id,
            subject: self.subject,
            body: self.body,
            sender_email: self.sender_email.trim().to_string(),
            sender_name: self.sender_name,
            recipients: self.recipients,
            cc: self.cc,
            timestamp,
            thread_id: non_empty(self.thread_id).unwrap_or_default(),
            message_id,
            in_reply_to: non_empty(self.in_reply_to),
            category,
            client_id: non_empty(self.client_id),
            dossier_id: non_empty(self.dossier_id),
            priority: self.priority,
            tags: self.tags.into_iter().collect(),
            has_attachments: self.has_attachments,
            language: non_empty(self.language).unwrap_or_else(|| "fr".to_string()),
            embedding: self.embedding.unwrap_or_default(),
        })
    }
}

/// Parse JSONL content into emails, tagging errors with their line number.
pub fn parse_jsonl(content: &str) -> Result<Vec<(usize, Email)>> {
    let mut emails = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let record: EmailRecord = serde_json::from_str(line)
            .with_context(|| format!("line {}: malformed email record", line_no))?;
        let email = record
            .into_email()
            .with_context(|| format!("line {}: invalid email record", line_no))?;
        emails.push((line_no, email));
    }
    Ok(emails)
}

/// Embed, store, and relate `emails`.
pub async fn import_emails(
    store: &SqliteStore,
    embedder: &dyn EmbeddingProvider,
    options: ImportOptions,
    mut emails: Vec<(usize, Email)>,
) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    // Embed records that arrived without a vector
    let missing: Vec<usize> = emails
        .iter()
        .enumerate()
        .filter(|(_, (_, e))| e.embedding.is_empty())
        .map(|(i, _)| i)
        .collect();
    for batch in missing.chunks(options.batch_size.max(1)) {
        let texts: Vec<String> = batch
            .iter()
            .map(|&i| email_embedding_text(&emails[i].1.subject, &emails[i].1.body))
            .collect();
        let vectors = embedder
            .embed_batch(&texts)
            .await
            .with_context(|| format!("failed to embed batch of {} emails", texts.len()))?;
        if vectors.len() != batch.len() {
            bail!(
                "embedding provider returned {} vectors for {} emails",
                vectors.len(),
                batch.len()
            );
        }
        for (&i, vector) in batch.iter().zip(vectors) {
            emails[i].1.embedding = vector;
        }
        stats.embedded += batch.len();
        debug!(batch = batch.len(), total = stats.embedded, "embedded emails");
    }

    for (line_no, email) in &emails {
        if email.embedding.len() != options.dims {
            bail!(
                "line {}: embedding has {} dimensions, expected {}",
                line_no,
                email.embedding.len(),
                options.dims
            );
        }
    }

    for (_, email) in &emails {
        store.upsert_email(email, embedder.model_name()).await?;
        stats.emails += 1;
    }

    let emails: Vec<Email> = emails.into_iter().map(|(_, e)| e).collect();
    build_relations(store, &emails, &mut stats).await?;

    info!(
        emails = stats.emails,
        embedded = stats.embedded,
        thread_links = stats.thread_links,
        reply_links = stats.reply_links,
        "import complete"
    );
    Ok(stats)
}

async fn build_relations(
    store: &SqliteStore,
    emails: &[Email],
    stats: &mut ImportStats,
) -> Result<()> {
    // Thread membership, including emails stored by earlier imports
    let threads: BTreeSet<&str> = emails
        .iter()
        .map(|e| e.thread_id.as_str())
        .filter(|t| !t.is_empty())
        .collect();
    for thread_id in threads {
        let ids = store.thread_email_ids(thread_id).await?;
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                store.link_emails(a, b, LinkKind::ThreadMember).await?;
                stats.thread_links += 1;
            }
        }
    }

    // Replies
    for email in emails {
        if let Some(parent) = &email.in_reply_to {
            if let Some(parent_id) = store.email_id_by_message_id(parent).await? {
                if parent_id != email.id {
                    store
                        .link_emails(&email.id, &parent_id, LinkKind::RepliesTo)
                        .await?;
                    stats.reply_links += 1;
                }
            }
        }
    }

    // People
    for email in emails {
        if !email.sender_email.is_empty() {
            let display_name = if email.sender_name.is_empty() {
                email.sender_email.clone()
            } else {
                email.sender_name.clone()
            };
            store
                .upsert_person(&Person {
                    email: email.sender_email.clone(),
                    display_name,
                    role: email.category.and_then(Role::from_category),
                })
                .await?;
            store
                .relate_person(&email.id, &email.sender_email, Involvement::Sender)
                .await?;
            stats.involves += 1;
        }
        for (addrs, role) in [
            (&email.recipients, Involvement::To),
            (&email.cc, Involvement::Cc),
        ] {
            for addr in addrs.iter().filter(|a| !a.is_empty()) {
                store
                    .upsert_person(&Person {
                        email: addr.clone(),
                        display_name: String::new(),
                        role: None,
                    })
                    .await?;
                store.relate_person(&email.id, addr, role).await?;
                stats.involves += 1;
            }
        }
    }

    // Cases
    let mut seen_cases = BTreeSet::new();
    for email in emails {
        if let Some(reference) = &email.dossier_id {
            if seen_cases.insert(reference.clone()) {
                store
                    .upsert_case(&Case {
                        reference: reference.clone(),
                        client_name: email.client_id.clone().unwrap_or_default(),
                        description: format!("Dossier {}", reference),
                    })
                    .await?;
            }
            store.relate_case(&email.id, reference).await?;
        }
    }
    stats.cases = seen_cases.len();

    Ok(())
}

/// Run the `import` command: read the file, import, print a summary.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let emails = parse_jsonl(&content)?;

    let needs_embedding = emails.iter().any(|(_, e)| e.embedding.is_empty());
    if needs_embedding && !config.embedding.is_enabled() {
        bail!("Some records have no embedding. Set [embedding] provider in config.");
    }

    let embedder = create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let options = ImportOptions {
        dims: config.engine_config().dims,
        batch_size: config.embedding.batch_size,
    };

    let stats = import_emails(&store, embedder.as_ref(), options, emails).await?;

    println!("import {}", path.display());
    println!("  emails stored: {}", stats.emails);
    if config.embedding.is_enabled() {
        println!("  emails embedded: {}", stats.embedded);
    }
    println!("  thread links: {}", stats.thread_links);
    println!("  reply links: {}", stats.reply_links);
    println!("  person links: {}", stats.involves);
    println!("  cases: {}", stats.cases);
    println!("ok");

    store.pool().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_defaults_and_id_fallback() {
        let emails = parse_jsonl(
            r#"{"subject": "Audience", "sender_email": "greffe@tribunal.fr", "date": "2024-03-01T10:00:00", "message_id": "msg_003", "category": "court", "dossier_id": " 24/00123 "}"#,
        )
        .unwrap();
        let (line, email) = &emails[0];
        assert_eq!(*line, 1);
        assert_eq!(email.id, "msg_003");
        assert_eq!(email.category, Some(Category::Court));
        assert_eq!(email.dossier_id.as_deref(), Some("24/00123"));
        assert_eq!(email.language, "fr");
        assert_eq!(email.timestamp.timestamp(), 1_709_287_200);
        assert!(email.embedding.is_empty());
    }

    #[test]
    fn test_invalid_category_reports_line() {
        let content = concat!(
            r#"{"subject": "a", "sender_email": "a@x.fr", "timestamp": "2024-01-01T00:00:00Z"}"#,
            "\n\n",
            r#"{"subject": "b", "sender_email": "b@x.fr", "timestamp": "2024-01-01T00:00:00Z", "category": "invalid_value"}"#,
        );
        let err = parse_jsonl(content).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("line 3"), "{}", msg);
        assert!(msg.contains("invalid_value"), "{}", msg);
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp("2024-03-01T10:00:00+01:00").is_ok());
        assert!(parse_timestamp("2024-03-01T10:00:00.123456").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
