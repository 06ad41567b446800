//! Import into a temporary SQLite database, then retrieve through the
//! core pipeline over [`SqliteStore`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use lexmail::config::Config;
use lexmail::import::{import_emails, parse_jsonl, ImportOptions};
use lexmail::migrate::migrate_pool;
use lexmail::search::browse_emails;
use lexmail::sqlite_store::SqliteStore;
use lexmail::db;
use lexmail_core::embedding::EmbeddingProvider;
use lexmail_core::{
    EngineConfig, FilterRequest, Origin, RetrievalError, RetrievalRequest, Retriever,
};
use tempfile::TempDir;

/// "expertise" → x axis, "audience" → y axis, anything else → z axis.
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_lowercase();
        Ok(if text.contains("expertise") {
            vec![1.0, 0.0, 0.0]
        } else if text.contains("audience") {
            vec![0.0, 1.0, 0.0]
        } else {
            vec![0.0, 0.0, 1.0]
        })
    }
}

const EMAILS: &str = r#"{"id": "m1", "subject": "Rapport d'expertise médicale", "body": "Veuillez trouver le rapport.", "sender_email": "expert@clinique.fr", "sender_name": "Dr Martin", "date": "2024-03-01T10:00:00", "thread_id": "t-1", "message_id": "<m1@clinique.fr>", "category": "medical-expert", "client_id": "C-42", "dossier_id": "24/00123", "tags": ["rapport"]}
{"id": "m2", "subject": "Re: rapport", "body": "Merci, bien reçu.", "sender_email": "avocat@cabinet.fr", "date": "2024-03-02T09:00:00", "thread_id": "t-1", "message_id": "<m2@cabinet.fr>", "in_reply_to": "<m1@clinique.fr>", "category": "other", "dossier_id": "24/00123"}
{"id": "m3", "subject": "Convocation audience", "body": "L'audience est fixée au 12 avril.", "sender_email": "greffe@tribunal.fr", "date": "2024-02-01T14:30:00", "thread_id": "t-2", "category": "court", "dossier_id": "24/00123", "tags": ["urgent"]}
{"id": "m4", "subject": "Facture", "body": "Ci-joint la facture.", "sender_email": "client@example.fr", "recipients": ["expert@clinique.fr"], "date": "2024-01-15T08:00:00Z", "thread_id": "t-3", "category": "client", "client_id": "C-7", "dossier_id": "23/00999"}
"#;

async fn setup() -> (TempDir, Arc<SqliteStore>) {
    let tmp = TempDir::new().unwrap();
    let config = Config::with_db_path(tmp.path().join("lexmail.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    migrate_pool(&pool).await.unwrap();
    let store = SqliteStore::new(pool);

    let stats = import_emails(
        &store,
        &KeywordEmbedder,
        ImportOptions {
            dims: 3,
            batch_size: 2,
        },
        parse_jsonl(EMAILS).unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(stats.emails, 4);
    assert_eq!(stats.embedded, 4);
    assert_eq!(stats.thread_links, 1);
    assert_eq!(stats.reply_links, 1);
    assert_eq!(stats.cases, 2);

    (tmp, Arc::new(store))
}

fn retriever(store: Arc<SqliteStore>) -> Retriever<SqliteStore, KeywordEmbedder> {
    let config = EngineConfig {
        dims: 3,
        ..EngineConfig::default()
    };
    Retriever::new(store, Arc::new(KeywordEmbedder), config)
}

#[tokio::test]
async fn test_direct_match_expands_over_thread_case_and_people() {
    let (_tmp, store) = setup().await;
    let retriever = retriever(store);

    let mut req = RetrievalRequest::new("expertise médicale");
    req.top_k = Some(1);
    let result = retriever.retrieve(&req).await.unwrap();

    let origins: HashMap<&str, Origin> = result
        .items
        .iter()
        .map(|item| (item.email_id.as_str(), item.origin))
        .collect();
    assert_eq!(result.items[0].email_id, "m1");
    assert_eq!(origins["m1"], Origin::DirectMatch);
    assert_eq!(origins["m2"], Origin::ThreadMember);
    assert_eq!(origins["m3"], Origin::SameCase);
    assert_eq!(origins["m4"], Origin::SamePeople);
    assert_eq!(result.items.len(), 4);
    assert_eq!(result.failed_branches, 0);
}

#[tokio::test]
async fn test_filters_restrict_direct_matches() {
    let (_tmp, store) = setup().await;
    let retriever = retriever(store);

    let mut req = RetrievalRequest::new("audience");
    req.expand_graph = false;
    req.filters = FilterRequest {
        category: Some("court".into()),
        ..Default::default()
    };
    let result = retriever.retrieve(&req).await.unwrap();
    let ids: Vec<&str> = result.items.iter().map(|i| i.email_id.as_str()).collect();
    assert_eq!(ids, vec!["m3"]);

    // The filter wins over similarity: m1 is the closest email overall.
    let mut req = RetrievalRequest::new("expertise médicale");
    req.expand_graph = false;
    req.filters = FilterRequest {
        dossier_id: Some("23/00999".into()),
        ..Default::default()
    };
    let result = retriever.retrieve(&req).await.unwrap();
    let ids: Vec<&str> = result.items.iter().map(|i| i.email_id.as_str()).collect();
    assert_eq!(ids, vec!["m4"]);

    let mut req = RetrievalRequest::new("expertise médicale");
    req.expand_graph = false;
    req.filters = FilterRequest {
        tags: Some(vec!["urgent".into(), "absent".into()]),
        ..Default::default()
    };
    let result = retriever.retrieve(&req).await.unwrap();
    let ids: Vec<&str> = result.items.iter().map(|i| i.email_id.as_str()).collect();
    assert_eq!(ids, vec!["m3"]);
}

#[tokio::test]
async fn test_invalid_category_rejected_before_search() {
    let (_tmp, store) = setup().await;
    let retriever = retriever(store);

    let mut req = RetrievalRequest::new("expertise");
    req.filters = FilterRequest {
        category: Some("judge".into()),
        ..Default::default()
    };
    let err = retriever.retrieve(&req).await.unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidFilter(_)));
}

#[tokio::test]
async fn test_browse_lists_dossier_most_recent_first() {
    let (_tmp, store) = setup().await;

    let filters = FilterRequest {
        dossier_id: Some("24/00123".into()),
        ..Default::default()
    };
    let items = browse_emails(&store, &filters, 10).await.unwrap();
    let ids: Vec<&str> = items.iter().map(|i| i.email_id.as_str()).collect();
    assert_eq!(ids, vec!["m2", "m1", "m3"]);
    assert!(items.iter().all(|i| i.origin == "metadata_filter"));

    let items = browse_emails(&store, &filters, 1).await.unwrap();
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn test_reimport_is_idempotent() {
    let (_tmp, store) = setup().await;

    import_emails(
        &store,
        &KeywordEmbedder,
        ImportOptions {
            dims: 3,
            batch_size: 8,
        },
        parse_jsonl(EMAILS).unwrap(),
    )
    .await
    .unwrap();

    let stats = lexmail::stats::gather_stats(store.pool()).await.unwrap();
    assert_eq!(stats.emails, 4);
    assert_eq!(stats.thread_links, 1);
    assert_eq!(stats.reply_links, 1);
    assert_eq!(stats.cases, 2);
    assert_eq!(stats.case_links, 4);
    assert_eq!(stats.embedding_models, vec![("keyword".to_string(), 4)]);
}
