//! Idempotent schema migrations.
//!
//! Emails are nodes; the graph relations the retrieval engine traverses
//! are materialized as edge tables:
//!
//! | Table | Edge |
//! |-------|------|
//! | `email_links` | email ↔ email (`thread_member`, `replies_to`) |
//! | `involves` | email → person (`sender`, `to`, `cc`) |
//! | `related_to_case` | email → case |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create every table and index if missing. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS emails (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            sender_email TEXT NOT NULL,
            sender_name TEXT NOT NULL DEFAULT '',
            recipients_json TEXT NOT NULL DEFAULT '[]',
            cc_json TEXT NOT NULL DEFAULT '[]',
            timestamp INTEGER NOT NULL,
            thread_id TEXT NOT NULL DEFAULT '',
            message_id TEXT NOT NULL DEFAULT '',
            in_reply_to TEXT,
            category TEXT,
            client_id TEXT,
            dossier_id TEXT,
            priority INTEGER,
            tags_json TEXT NOT NULL DEFAULT '[]',
            has_attachments INTEGER NOT NULL DEFAULT 0,
            language TEXT NOT NULL DEFAULT 'fr',
            embedding BLOB NOT NULL,
            embedding_model TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS persons (
            email TEXT PRIMARY KEY,
            display_name TEXT NOT NULL DEFAULT '',
            role TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cases (
            reference TEXT PRIMARY KEY,
            client_name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS email_links (
            src_id TEXT NOT NULL,
            dst_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            PRIMARY KEY (src_id, dst_id, kind),
            FOREIGN KEY (src_id) REFERENCES emails(id),
            FOREIGN KEY (dst_id) REFERENCES emails(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS involves (
            email_id TEXT NOT NULL,
            person_email TEXT NOT NULL,
            role TEXT NOT NULL,
            PRIMARY KEY (email_id, person_email, role),
            FOREIGN KEY (email_id) REFERENCES emails(id),
            FOREIGN KEY (person_email) REFERENCES persons(email)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS related_to_case (
            email_id TEXT NOT NULL,
            case_ref TEXT NOT NULL,
            PRIMARY KEY (email_id, case_ref),
            FOREIGN KEY (email_id) REFERENCES emails(id),
            FOREIGN KEY (case_ref) REFERENCES cases(reference)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_emails_thread ON emails(thread_id)",
        "CREATE INDEX IF NOT EXISTS idx_emails_dossier ON emails(dossier_id)",
        "CREATE INDEX IF NOT EXISTS idx_emails_sender ON emails(sender_email)",
        "CREATE INDEX IF NOT EXISTS idx_emails_timestamp ON emails(timestamp DESC)",
        "CREATE INDEX IF NOT EXISTS idx_emails_message_id ON emails(message_id)",
        "CREATE INDEX IF NOT EXISTS idx_email_links_dst ON email_links(dst_id)",
        "CREATE INDEX IF NOT EXISTS idx_involves_person ON involves(person_email)",
        "CREATE INDEX IF NOT EXISTS idx_related_case ON related_to_case(case_ref)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}
