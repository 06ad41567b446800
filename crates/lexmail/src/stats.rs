//! Database statistics.
//!
//! A quick summary of what has been imported: node and edge counts, the
//! category distribution, and the covered date span. Used by
//! `lexmail stats` to check that an import built the graph as expected.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Counts gathered from one database.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Stats {
    pub emails: i64,
    pub persons: i64,
    pub cases: i64,
    pub thread_links: i64,
    pub reply_links: i64,
    pub involves: i64,
    pub case_links: i64,
    /// `(category, count)`, most frequent first.
    pub categories: Vec<(String, i64)>,
    /// `(model, count)` of stored embeddings.
    pub embedding_models: Vec<(String, i64)>,
    pub oldest_ts: Option<i64>,
    pub newest_ts: Option<i64>,
}

async fn count(pool: &SqlitePool, sql: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).fetch_one(pool).await?)
}

/// Query every count from an open pool.
pub async fn gather_stats(pool: &SqlitePool) -> Result<Stats> {
    let mut stats = Stats {
        emails: count(pool, "SELECT COUNT(*) FROM emails").await?,
        persons: count(pool, "SELECT COUNT(*) FROM persons").await?,
        cases: count(pool, "SELECT COUNT(*) FROM cases").await?,
        thread_links: count(
            pool,
            "SELECT COUNT(*) FROM email_links WHERE kind = 'thread_member'",
        )
        .await?,
        reply_links: count(
            pool,
            "SELECT COUNT(*) FROM email_links WHERE kind = 'replies_to'",
        )
        .await?,
        involves: count(pool, "SELECT COUNT(*) FROM involves").await?,
        case_links: count(pool, "SELECT COUNT(*) FROM related_to_case").await?,
        ..Default::default()
    };

    let rows = sqlx::query(
        r#"
        SELECT COALESCE(category, 'uncategorized') AS category, COUNT(*) AS n
        FROM emails
        GROUP BY 1
        ORDER BY n DESC, category ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    stats.categories = rows
        .iter()
        .map(|row| (row.get("category"), row.get("n")))
        .collect();

    let rows = sqlx::query(
        r#"
        SELECT embedding_model AS model, COUNT(*) AS n
        FROM emails
        GROUP BY embedding_model
        ORDER BY n DESC, model ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    stats.embedding_models = rows
        .iter()
        .map(|row| (row.get("model"), row.get("n")))
        .collect();

    let span = sqlx::query("SELECT MIN(timestamp) AS oldest, MAX(timestamp) AS newest FROM emails")
        .fetch_one(pool)
        .await?;
    stats.oldest_ts = span.get("oldest");
    stats.newest_ts = span.get("newest");

    Ok(stats)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = gather_stats(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Lexmail — Database Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Emails:      {}", stats.emails);
    println!("  Persons:     {}", stats.persons);
    println!("  Cases:       {}", stats.cases);
    println!();
    println!("  Thread links:  {}", stats.thread_links);
    println!("  Reply links:   {}", stats.reply_links);
    println!("  Involves:      {}", stats.involves);
    println!("  Case links:    {}", stats.case_links);

    if let (Some(oldest), Some(newest)) = (stats.oldest_ts, stats.newest_ts) {
        println!();
        println!(
            "  Span:        {} → {} (newest {})",
            format_ts_iso(oldest),
            format_ts_iso(newest),
            format_ts_relative(newest)
        );
    }

    if !stats.categories.is_empty() {
        println!();
        println!("  By category:");
        println!("  {:<24} {:>8}", "CATEGORY", "EMAILS");
        println!("  {}", "-".repeat(33));
        for (category, n) in &stats.categories {
            println!("  {:<24} {:>8}", category, n);
        }
    }

    if !stats.embedding_models.is_empty() {
        println!();
        println!("  Embeddings:");
        for (model, n) in &stats.embedding_models {
            println!("  {:<24} {:>8}", model, n);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 days ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts_iso(0), "1970-01-01 00:00");
        let recent = chrono::Utc::now().timestamp() - 2 * 86400 - 5;
        assert_eq!(format_ts_relative(recent), "2 days ago");
    }
}
