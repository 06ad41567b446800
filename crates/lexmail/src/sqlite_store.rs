//! SQLite-backed [`Store`] implementation.
//!
//! Compiled filter predicates become parameterized `WHERE` clauses built
//! with [`QueryBuilder`]; cosine similarity is computed in Rust over the
//! rows that pass the filter. Graph relations are answered with joins over
//! the edge tables created by [`crate::migrate`].

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use lexmail_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use lexmail_core::filter::Clause;
use lexmail_core::models::{Case, Category, Email, Person, Role};
use lexmail_core::store::{cmp_by_similarity, Relation, ScoredEmail, Store};
use lexmail_core::Predicate;

const EMAIL_COLUMNS: &str = "e.id, e.subject, e.body, e.sender_email, e.sender_name, \
     e.recipients_json, e.cc_json, e.timestamp, e.thread_id, e.message_id, e.in_reply_to, \
     e.category, e.client_id, e.dossier_id, e.priority, e.tags_json, e.has_attachments, \
     e.language, e.embedding";

/// Email ↔ email edge kinds stored in `email_links`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Both emails belong to the same thread. Stored once per pair.
    ThreadMember,
    /// `src` is a direct reply to `dst`.
    RepliesTo,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::ThreadMember => "thread_member",
            LinkKind::RepliesTo => "replies_to",
        }
    }
}

/// How a person takes part in an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Involvement {
    Sender,
    To,
    Cc,
}

impl Involvement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Involvement::Sender => "sender",
            Involvement::To => "to",
            Involvement::Cc => "cc",
        }
    }
}

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace an email node.
    pub async fn upsert_email(&self, email: &Email, model: &str) -> Result<()> {
        let tags: Vec<&String> = email.tags.iter().collect();
        sqlx::query(
            r#"
            INSERT INTO emails (id, subject, body, sender_email, sender_name,
                                recipients_json, cc_json, timestamp, thread_id,
                                message_id, in_reply_to, category, client_id,
                                dossier_id, priority, tags_json, has_attachments,
                                language, embedding, embedding_model)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                subject = excluded.subject,
                body = excluded.body,
                sender_email = excluded.sender_email,
                sender_name = excluded.sender_name,
                recipients_json = excluded.recipients_json,
                cc_json = excluded.cc_json,
                timestamp = excluded.timestamp,
                thread_id = excluded.thread_id,
                message_id = excluded.message_id,
                in_reply_to = excluded.in_reply_to,
                category = excluded.category,
                client_id = excluded.client_id,
                dossier_id = excluded.dossier_id,
                priority = excluded.priority,
                tags_json = excluded.tags_json,
                has_attachments = excluded.has_attachments,
                language = excluded.language,
                embedding = excluded.embedding,
                embedding_model = excluded.embedding_model
            "#,
        )
        .bind(&email.id)
        .bind(&email.subject)
        .bind(&email.body)
        .bind(&email.sender_email)
        .bind(&email.sender_name)
        .bind(serde_json::to_string(&email.recipients)?)
        .bind(serde_json::to_string(&email.cc)?)
        .bind(email.timestamp.timestamp())
        .bind(&email.thread_id)
        .bind(&email.message_id)
        .bind(&email.in_reply_to)
        .bind(email.category.map(|c| c.as_str()))
        .bind(&email.client_id)
        .bind(&email.dossier_id)
        .bind(email.priority)
        .bind(serde_json::to_string(&tags)?)
        .bind(email.has_attachments)
        .bind(&email.language)
        .bind(vec_to_blob(&email.embedding))
        .bind(model)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a person, keeping known name and role when the new ones are blank.
    pub async fn upsert_person(&self, person: &Person) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO persons (email, display_name, role)
            VALUES (?, ?, ?)
            ON CONFLICT(email) DO UPDATE SET
                display_name = CASE WHEN excluded.display_name != ''
                                    THEN excluded.display_name
                                    ELSE persons.display_name END,
                role = COALESCE(excluded.role, persons.role)
            "#,
        )
        .bind(&person.email)
        .bind(&person.display_name)
        .bind(person.role.map(|r| r.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Look up a person by address.
    pub async fn get_person(&self, email: &str) -> Result<Option<Person>> {
        let row = sqlx::query("SELECT email, display_name, role FROM persons WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<Person> {
            let role: Option<String> = row.get("role");
            Ok(Person {
                email: row.get("email"),
                display_name: row.get("display_name"),
                role: role.map(|r| r.parse::<Role>()).transpose()?,
            })
        })
        .transpose()
    }

    /// Insert a case if its reference is new.
    pub async fn upsert_case(&self, case: &Case) -> Result<()> {
        sqlx::query(
            "INSERT INTO cases (reference, client_name, description) VALUES (?, ?, ?) \
             ON CONFLICT(reference) DO NOTHING",
        )
        .bind(&case.reference)
        .bind(&case.client_name)
        .bind(&case.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn link_emails(&self, src_id: &str, dst_id: &str, kind: LinkKind) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO email_links (src_id, dst_id, kind) VALUES (?, ?, ?)")
            .bind(src_id)
            .bind(dst_id)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn relate_person(
        &self,
        email_id: &str,
        person_email: &str,
        role: Involvement,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO involves (email_id, person_email, role) VALUES (?, ?, ?)",
        )
        .bind(email_id)
        .bind(person_email)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn relate_case(&self, email_id: &str, case_ref: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO related_to_case (email_id, case_ref) VALUES (?, ?)")
            .bind(email_id)
            .bind(case_ref)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Ids of every email in `thread_id`, oldest first.
    pub async fn thread_email_ids(&self, thread_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM emails WHERE thread_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Resolve an RFC 5322 `Message-ID` to a stored email id.
    pub async fn email_id_by_message_id(&self, message_id: &str) -> Result<Option<String>> {
        let id = sqlx::query_scalar("SELECT id FROM emails WHERE message_id = ? LIMIT 1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }
}

fn ceil_secs(ts: DateTime<Utc>) -> i64 {
    if ts.timestamp_subsec_nanos() > 0 {
        ts.timestamp() + 1
    } else {
        ts.timestamp()
    }
}

fn push_predicate(qb: &mut QueryBuilder<'_, Sqlite>, predicate: &Predicate) {
    qb.push(" WHERE 1 = 1");
    for clause in predicate.clauses() {
        match clause {
            Clause::Category(c) => {
                qb.push(" AND e.category = ").push_bind(c.as_str());
            }
            Clause::ClientId(id) => {
                qb.push(" AND e.client_id = ").push_bind(id.clone());
            }
            Clause::DossierId(id) => {
                qb.push(" AND e.dossier_id = ").push_bind(id.clone());
            }
            Clause::SenderEmail(addr) => {
                qb.push(" AND e.sender_email = ").push_bind(addr.clone());
            }
            Clause::DateRange { start, end } => {
                if let Some(start) = start {
                    qb.push(" AND e.timestamp >= ").push_bind(ceil_secs(*start));
                }
                if let Some(end) = end {
                    qb.push(" AND e.timestamp <= ").push_bind(end.timestamp());
                }
            }
            Clause::AnyTag(tags) => {
                qb.push(
                    " AND EXISTS (SELECT 1 FROM json_each(e.tags_json) \
                     WHERE json_each.value IN ",
                );
                push_list(qb, tags.iter());
                qb.push(")");
            }
        }
    }
}

fn push_list<'a>(qb: &mut QueryBuilder<'_, Sqlite>, values: impl Iterator<Item = &'a String>) {
    qb.push("(");
    let mut sep = qb.separated(", ");
    for v in values {
        sep.push_bind(v.clone());
    }
    sep.push_unseparated(")");
}

fn json_list(row: &SqliteRow, column: &str) -> Result<Vec<String>> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

/// `LIMIT` value for `limit`, saturating at `i64::MAX` (SQLite reads a negative limit as none).
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn row_to_email(row: &SqliteRow) -> Result<Email> {
    let id: String = row.try_get("id")?;
    let ts: i64 = row.try_get("timestamp")?;
    let timestamp = DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| anyhow!("email {} has an out-of-range timestamp {}", id, ts))?;
    let category = row
        .try_get::<Option<String>, _>("category")?
        .map(|c| c.parse::<Category>())
        .transpose()?;
    let recipients = json_list(row, "recipients_json")?;
    let cc = json_list(row, "cc_json")?;
    let tags = json_list(row, "tags_json")?;
    let blob: Vec<u8> = row.try_get("embedding")?;

    Ok(Email {
        id,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        sender_email: row.try_get("sender_email")?,
        sender_name: row.try_get("sender_name")?,
        recipients,
        cc,
        timestamp,
        thread_id: row.try_get("thread_id")?,
        message_id: row.try_get("message_id")?,
        in_reply_to: row.try_get("in_reply_to")?,
        category,
        client_id: row.try_get("client_id")?,
        dossier_id: row.try_get("dossier_id")?,
        priority: row.try_get("priority")?,
        tags: tags.into_iter().collect(),
        has_attachments: row.try_get("has_attachments")?,
        language: row.try_get("language")?,
        embedding: blob_to_vec(&blob),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn similarity_search(
        &self,
        predicate: &Predicate,
        query_vec: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredEmail>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM emails e", EMAIL_COLUMNS));
        push_predicate(&mut qb, predicate);
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut scored = rows
            .iter()
            .map(|row| -> Result<ScoredEmail> {
                let email = row_to_email(row)?;
                Ok(ScoredEmail {
                    similarity: cosine_similarity(query_vec, &email.embedding) as f64,
                    email,
                })
            })
            .collect::<Result<Vec<_>>>()?;

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
        if email_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM emails e WHERE e.id IN (",
            EMAIL_COLUMNS
        ));
        match relation {
            Relation::ThreadMember => {
                qb.push("SELECT dst_id FROM email_links WHERE src_id IN ");
                push_list(&mut qb, email_ids.iter());
                qb.push(" UNION SELECT src_id FROM email_links WHERE dst_id IN ");
                push_list(&mut qb, email_ids.iter());
            }
            Relation::SameCase => {
                qb.push(
                    "SELECT r2.email_id FROM related_to_case r1 \
                     JOIN related_to_case r2 ON r2.case_ref = r1.case_ref \
                     WHERE r1.email_id IN ",
                );
                push_list(&mut qb, email_ids.iter());
            }
            Relation::SharedParticipant => {
                qb.push(
                    "SELECT i2.email_id FROM involves i1 \
                     JOIN involves i2 ON i2.person_email = i1.person_email \
                     WHERE i1.email_id IN ",
                );
                push_list(&mut qb, email_ids.iter());
            }
        }
        qb.push(") AND e.id NOT IN ");
        push_list(&mut qb, email_ids.iter());
        qb.push(" ORDER BY e.timestamp DESC, e.id ASC LIMIT ");
        qb.push_bind(sql_limit(limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_email).collect()
    }

    async fn filter_emails(&self, predicate: &Predicate, limit: usize) -> Result<Vec<Email>> {
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM emails e", EMAIL_COLUMNS));
        push_predicate(&mut qb, predicate);
        qb.push(" ORDER BY e.timestamp DESC, e.id ASC LIMIT ");
        qb.push_bind(sql_limit(limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_email).collect()
    }

    async fn get_email(&self, id: &str) -> Result<Option<Email>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM emails e WHERE e.id = ",
            EMAIL_COLUMNS
        ));
        qb.push_bind(id.to_string());
        let row = qb.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_email).transpose()
    }
}
