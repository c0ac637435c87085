//! Integration tests for the [`Connector`] extension point: a custom,
//! non-filesystem source can be ingested through the same orchestrator
//! pipeline (dedup, chunking, indexing) as the built-in filesystem connector.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use context_harness::config::{
    CacheConfig, ChunkingConfig, Config, ConnectorsConfig, DbConfig, EmbeddingConfig,
    GenerationConfig, RetrievalConfig, ServerConfig, WebConfig,
};
use context_harness::migrate;
use context_harness::models::SourceItem;
use context_harness::orchestrator::{Orchestrator, QueryOptions};
use context_harness::traits::Connector;
use tempfile::tempdir;

/// An in-memory connector that hands back a fixed set of documents. Stands
/// in for a connector backed by some external system (a wiki, a ticket
/// tracker) that only needs to implement [`Connector::scan`].
struct InMemoryConnector {
    docs: Vec<(String, String, String)>, // (id, title, body)
}

impl InMemoryConnector {
    fn new(docs: Vec<(String, String, String)>) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    fn name(&self) -> &str {
        "inmemory"
    }

    fn description(&self) -> &str {
        "In-memory test connector"
    }

    fn connector_type(&self) -> &str {
        "custom"
    }

    async fn scan(&self) -> Result<Vec<SourceItem>> {
        let now = Utc::now();
        Ok(self
            .docs
            .iter()
            .map(|(id, title, body)| SourceItem {
                source: "custom:inmemory".to_string(),
                source_id: id.clone(),
                source_url: None,
                title: Some(title.clone()),
                author: Some("test".to_string()),
                created_at: now,
                updated_at: now,
                content_type: "text/plain".to_string(),
                body: body.clone(),
                metadata_json: "{}".to_string(),
                raw_json: None,
                raw_bytes: None,
            })
            .collect())
    }
}

fn test_config(db_path: std::path::PathBuf) -> Config {
    Config {
        db: DbConfig { path: db_path },
        chunking: ChunkingConfig {
            max_tokens: 200,
            overlap_tokens: 0,
            mode: "generic".to_string(),
        },
        retrieval: RetrievalConfig {
            hybrid_alpha: 0.6,
            candidate_k_keyword: 20,
            candidate_k_vector: 20,
            final_limit: 10,
            group_by: "document".to_string(),
            doc_agg: "max".to_string(),
            max_chunks_per_doc: 3,
            two_step_enabled: false,
            two_step_candidates: 20,
            rrf_k: 60.0,
            web_search_enabled: false,
            web_kb_enabled: false,
        },
        embedding: EmbeddingConfig::default(),
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
        connectors: ConnectorsConfig { filesystem: None },
        web: WebConfig::default(),
        cache: CacheConfig::default(),
        generation: GenerationConfig::default(),
    }
}

#[tokio::test]
async fn custom_connector_ingests_through_orchestrator() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path().join("ctx.sqlite"));
    migrate::run_migrations(&config).await.unwrap();
    let orchestrator = Orchestrator::new(config).await.unwrap();

    let connector = InMemoryConnector::new(vec![
        (
            "doc-1".to_string(),
            "First".to_string(),
            "The quick brown fox jumps over the lazy dog.".to_string(),
        ),
        (
            "doc-2".to_string(),
            "Second".to_string(),
            "Rust is a systems programming language focused on safety.".to_string(),
        ),
    ]);

    let outcome = orchestrator.ingest_connector(&connector, false).await.unwrap();
    assert_eq!(outcome.documents_scanned, 2);
    assert_eq!(outcome.documents_ingested, 2);
    assert_eq!(outcome.documents_failed, 0);
    assert!(outcome.chunks_written >= 2);

    let response = orchestrator
        .query("systems programming", QueryOptions::default())
        .await
        .unwrap();
    assert!(!response.retrieved.is_empty());
    assert!(response.retrieved[0]
        .text
        .to_lowercase()
        .contains("systems programming"));
}

#[tokio::test]
async fn custom_connector_reingest_is_idempotent_unless_forced() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path().join("ctx.sqlite"));
    migrate::run_migrations(&config).await.unwrap();
    let orchestrator = Orchestrator::new(config).await.unwrap();

    let connector = InMemoryConnector::new(vec![(
        "doc-1".to_string(),
        "Title".to_string(),
        "stable content".to_string(),
    )]);

    let first = orchestrator.ingest_connector(&connector, false).await.unwrap();
    assert_eq!(first.documents_ingested, 1);

    let second = orchestrator.ingest_connector(&connector, false).await.unwrap();
    assert_eq!(second.documents_ingested, 0);
    assert_eq!(second.documents_skipped, 1);

    let forced = orchestrator.ingest_connector(&connector, true).await.unwrap();
    assert_eq!(forced.documents_ingested, 1);
}

#[tokio::test]
async fn custom_connector_with_no_items_is_a_no_op() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path().join("ctx.sqlite"));
    migrate::run_migrations(&config).await.unwrap();
    let orchestrator = Orchestrator::new(config).await.unwrap();

    let connector = InMemoryConnector::new(vec![]);
    let outcome = orchestrator.ingest_connector(&connector, false).await.unwrap();
    assert_eq!(outcome.documents_scanned, 0);
    assert_eq!(outcome.documents_ingested, 0);
}

#[test]
fn filesystem_connector_reports_source_label() {
    use context_harness::config::FilesystemConnectorConfig;
    use context_harness::connector_fs::FilesystemConnector;

    let fs_config = FilesystemConnectorConfig {
        root: std::env::temp_dir(),
        include_globs: vec!["**/*.md".to_string()],
        exclude_globs: vec![],
        follow_symlinks: false,
    };
    let connector = FilesystemConnector::new("docs".to_string(), fs_config);
    assert_eq!(connector.source_label(), "filesystem:docs");
    assert_eq!(connector.connector_type(), "filesystem");
}
