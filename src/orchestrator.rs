//! Central orchestrator: owns the connection pool and every pluggable
//! component (embedder, vector index, keyword index, web knowledge base,
//! live-web providers, semantic cache, completion backend) and implements
//! the ingest/query/reconcile operations the CLI and HTTP surfaces both
//! call through.
//!
//! Ingestion is gated on a content hash (`source` + `source_id` + body),
//! not a modification timestamp: re-ingesting an unchanged file is a no-op
//! unless `force` is set, and only documents whose hash actually changed
//! get rechunked and reindexed. Concurrent ingestion of the *same*
//! `source`/`source_id` pair is serialized with an in-process advisory
//! lock; different documents ingest concurrently.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::SemanticCache;
use crate::chunk;
use crate::config::Config;
use crate::connector_fs;
use crate::db;
use crate::embedding;
use crate::extract;
use crate::generator::{self, Completion};
use crate::hybrid_retriever::{self, CrossEncoder, IdentityCrossEncoder};
use crate::keyword_index::{KeywordIndex, SqliteKeywordIndex};
use crate::models::{Chunk, RetrievalTier, RetrievedItem, SourceItem};
use crate::traits::Connector;
use crate::two_step_retriever::{self, TwoStepHit};
use crate::vector_index::{SqliteVectorIndex, VectorHit, VectorIndex};
use crate::web::kb::WebKnowledgeBase;
use crate::web::provider::{self, ExtractorProvider, SnippetProvider};

/// Outcome of ingesting a single document.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub document_id: String,
    pub chunks_written: usize,
    pub skipped_unchanged: bool,
    pub embeddings_written: usize,
    pub embeddings_pending: usize,
}

/// Outcome of ingesting an entire filesystem connector's tree.
#[derive(Debug, Clone, Default)]
pub struct DirectoryIngestOutcome {
    pub documents_scanned: usize,
    pub documents_ingested: usize,
    pub documents_skipped: usize,
    pub documents_failed: usize,
    pub chunks_written: usize,
}

/// The result of a single query through the full retrieve → pack → generate
/// flow. `answer` is `None` when generation is disabled — callers that only
/// want retrieval (e.g. `ctx search`) still get `retrieved`.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub answer: Option<String>,
    pub retrieved: Vec<RetrievedItem>,
    pub citations: Vec<usize>,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub web_documents_purged: u64,
    pub cache_entries_purged: u64,
}

/// When a live web search fires for a given query, under `web_mode =
/// "on_low_confidence"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebMode {
    /// Fire on every query (alongside corpus/web-kb retrieval).
    Parallel,
    /// Fire only when the top local-corpus score is below
    /// `web.low_confidence_threshold`, or the query looks time-sensitive.
    OnLowConfidence,
}

impl Default for WebMode {
    fn default() -> Self {
        WebMode::OnLowConfidence
    }
}

/// Per-request overrides for [`Orchestrator::query`]. Fields left at their
/// defaults fall back to the operator-configured behavior.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Overrides `retrieval.final_limit` for this request when set.
    pub top_k: Option<i64>,
    pub use_cache: bool,
    /// Per-request opt-in to live web search, layered under the operator's
    /// static `retrieval.web_search_enabled` kill switch — both must allow
    /// it for a live search to actually fire.
    pub enable_web_search: bool,
    pub web_mode: WebMode,
    /// Overrides the provider used for the premium rerank pass of two-step
    /// retrieval (e.g. `"ollama"`, `"gemini"`). Never affects the local
    /// embedding space the vector index was built in.
    pub embedder_type: Option<String>,
    pub user_context: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: None,
            use_cache: true,
            enable_web_search: false,
            web_mode: WebMode::OnLowConfidence,
            embedder_type: None,
            user_context: None,
        }
    }
}

/// Words/phrases that mark a query as time-sensitive, used by
/// `web_mode = "on_low_confidence"` to fire a live search even when the
/// local corpus scored confidently.
const TEMPORAL_KEYWORDS: &[&str] = &["latest", "today", "now", "current", "recent"];

fn contains_temporal_keyword(query: &str) -> bool {
    let lower = query.to_lowercase();
    if TEMPORAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }
    let year_re = Regex::new(r"\b(19|20)\d{2}\b").expect("static temporal regex is valid");
    year_re.is_match(query)
}

struct DocumentMeta {
    source_id: String,
    title: Option<String>,
    content_type: String,
}

pub struct Orchestrator {
    pool: SqlitePool,
    config: Config,
    vector_index: Box<dyn VectorIndex>,
    keyword_index: Box<dyn KeywordIndex>,
    web_kb: Option<WebKnowledgeBase>,
    snippet_provider: Box<dyn SnippetProvider>,
    extractor_provider: Box<dyn ExtractorProvider>,
    cache: Option<SemanticCache>,
    completion: Box<dyn Completion>,
    cross_encoder: Box<dyn CrossEncoder>,
    ingest_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Orchestrator {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let pool = db::connect(&config).await?;

        let vector_index: Box<dyn VectorIndex> = Box::new(SqliteVectorIndex::new(pool.clone()));
        let keyword_index: Box<dyn KeywordIndex> = Box::new(SqliteKeywordIndex::new(pool.clone()));

        let web_kb = if config.retrieval.web_kb_enabled {
            Some(WebKnowledgeBase::new(pool.clone(), config.web.ttl_days))
        } else {
            None
        };

        let snippet_provider: Box<dyn SnippetProvider> = if config.web.enabled {
            match config.web.snippet_provider.as_str() {
                "duckduckgo" => {
                    Box::new(provider::DuckDuckGoProvider::new(config.web.requests_per_minute)?)
                }
                _ => Box::new(provider::DisabledSnippetProvider),
            }
        } else {
            Box::new(provider::DisabledSnippetProvider)
        };

        let extractor_provider: Box<dyn ExtractorProvider> = if config.web.enabled {
            match config.web.extractor_provider.as_str() {
                "html" => Box::new(provider::HtmlTextExtractor::new(config.web.requests_per_minute)?),
                _ => Box::new(provider::DisabledExtractorProvider),
            }
        } else {
            Box::new(provider::DisabledExtractorProvider)
        };

        let cache = if config.cache.enabled {
            Some(SemanticCache::new(
                pool.clone(),
                config.cache.similarity_threshold,
                config.cache.ttl_secs,
            ))
        } else {
            None
        };

        let completion = generator::create_completion(&config.generation)?;

        Ok(Arc::new(Self {
            pool,
            config,
            vector_index,
            keyword_index,
            web_kb,
            snippet_provider,
            extractor_provider,
            cache,
            completion,
            cross_encoder: Box::new(IdentityCrossEncoder),
            ingest_locks: AsyncMutex::new(HashMap::new()),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.ingest_locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn content_hash(source: &str, source_id: &str, body: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(source_id.as_bytes());
        hasher.update(body.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    // ── Ingestion ──────────────────────────────────────────────────────

    /// Ingest a single file directly, outside of a configured filesystem
    /// connector (used by `ctx ingest <path>`).
    pub async fn ingest_document(
        &self,
        path: &Path,
        source_name: &str,
        force: bool,
    ) -> Result<IngestOutcome> {
        if !path.exists() {
            bail!("file does not exist: {}", path.display());
        }

        let metadata = std::fs::metadata(path)?;
        let modified = metadata
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        let modified_secs = modified
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let modified_at = Utc
            .timestamp_opt(modified_secs, 0)
            .single()
            .unwrap_or_else(Utc::now);

        let content_type = detect_content_type(path);
        let title = path.file_name().map(|n| n.to_string_lossy().to_string());
        let source_id = path.to_string_lossy().to_string();
        let source_url = Some(format!("file://{}", path.display()));

        let item = if content_type == "text/plain" {
            SourceItem {
                source: source_name.to_string(),
                source_id,
                source_url,
                title,
                author: None,
                created_at: modified_at,
                updated_at: modified_at,
                content_type: content_type.to_string(),
                body: std::fs::read_to_string(path)?,
                metadata_json: "{}".to_string(),
                raw_json: None,
                raw_bytes: None,
            }
        } else {
            let bytes = std::fs::read(path)?;
            let body = extract::extract_text(&bytes, content_type)
                .map_err(|e| anyhow::anyhow!("extraction failed for {}: {}", path.display(), e))?;
            SourceItem {
                source: source_name.to_string(),
                source_id,
                source_url,
                title,
                author: None,
                created_at: modified_at,
                updated_at: modified_at,
                content_type: content_type.to_string(),
                body,
                metadata_json: "{}".to_string(),
                raw_json: None,
                raw_bytes: None,
            }
        };

        self.ingest_source_item_forced(&item, force).await
    }

    /// Ingest every file matched by the configured `[connectors.filesystem]`
    /// connector, labeled with `name` (e.g. `"filesystem:<name>"`).
    pub async fn ingest_directory(&self, name: &str, force: bool) -> Result<DirectoryIngestOutcome> {
        let fs_config = self
            .config
            .connectors
            .filesystem
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no [connectors.filesystem] configured"))?;

        let connector = connector_fs::FilesystemConnector::new(name.to_string(), fs_config);
        self.ingest_connector(&connector, force).await
    }

    /// Ingest every item a [`Connector`] scans. Extraction of binary bodies
    /// happens here rather than in the connector, since a connector's job is
    /// to enumerate bytes, not interpret them — this lets the same resolve
    /// and dedup logic serve the filesystem connector and any custom one.
    pub async fn ingest_connector(
        &self,
        connector: &dyn Connector,
        force: bool,
    ) -> Result<DirectoryIngestOutcome> {
        let raw_items = connector.scan().await?;
        let mut outcome = DirectoryIngestOutcome {
            documents_scanned: raw_items.len(),
            ..Default::default()
        };

        for raw in &raw_items {
            let item = match self.resolve_item_body(raw) {
                Ok(item) => item,
                Err(e) => {
                    warn!(source_id = %raw.source_id, error = %e, "extraction failed, skipping document");
                    outcome.documents_failed += 1;
                    continue;
                }
            };

            match self.ingest_source_item_forced(&item, force).await {
                Ok(result) if result.skipped_unchanged => outcome.documents_skipped += 1,
                Ok(result) => {
                    outcome.documents_ingested += 1;
                    outcome.chunks_written += result.chunks_written;
                }
                Err(e) => {
                    warn!(source_id = %item.source_id, error = %e, "ingest failed, skipping document");
                    outcome.documents_failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    /// [`connector_fs::scan_filesystem`] hands back binary files with an
    /// empty `body` and the raw bytes in `raw_bytes`; extraction is an
    /// ingestion-time concern, so it happens here rather than in the
    /// connector.
    fn resolve_item_body(&self, item: &SourceItem) -> Result<SourceItem> {
        let Some(bytes) = &item.raw_bytes else {
            return Ok(item.clone());
        };
        let body = extract::extract_text(bytes, &item.content_type)
            .map_err(|e| anyhow::anyhow!("extraction failed for {}: {}", item.source_id, e))?;
        let mut resolved = item.clone();
        resolved.body = body;
        resolved.raw_bytes = None;
        Ok(resolved)
    }

    async fn ingest_source_item_forced(&self, item: &SourceItem, force: bool) -> Result<IngestOutcome> {
        let lock_key = format!("{}:{}", item.source, item.source_id);
        let lock = self.lock_for(&lock_key).await;
        let _guard = lock.lock().await;

        let dedup_hash = Self::content_hash(&item.source, &item.source_id, &item.body);

        let existing: Option<(String, String)> =
            sqlx::query_as("SELECT id, dedup_hash FROM documents WHERE source = ? AND source_id = ?")
                .bind(&item.source)
                .bind(&item.source_id)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((doc_id, existing_hash)) = &existing {
            if !force && existing_hash == &dedup_hash {
                return Ok(IngestOutcome {
                    document_id: doc_id.clone(),
                    chunks_written: 0,
                    skipped_unchanged: true,
                    embeddings_written: 0,
                    embeddings_pending: 0,
                });
            }
        }

        let doc_id = existing
            .map(|(id, _)| id)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        sqlx::query(
            r#"
            INSERT INTO documents (id, source, source_id, source_url, title, author, created_at, updated_at, content_type, body, metadata_json, raw_json, dedup_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source, source_id) DO UPDATE SET
                source_url = excluded.source_url,
                title = excluded.title,
                author = excluded.author,
                updated_at = excluded.updated_at,
                content_type = excluded.content_type,
                body = excluded.body,
                metadata_json = excluded.metadata_json,
                raw_json = excluded.raw_json,
                dedup_hash = excluded.dedup_hash
            "#,
        )
        .bind(&doc_id)
        .bind(&item.source)
        .bind(&item.source_id)
        .bind(&item.source_url)
        .bind(&item.title)
        .bind(&item.author)
        .bind(item.created_at.timestamp())
        .bind(item.updated_at.timestamp())
        .bind(&item.content_type)
        .bind(&item.body)
        .bind(&item.metadata_json)
        .bind(&item.raw_json)
        .bind(&dedup_hash)
        .execute(&self.pool)
        .await?;

        let chunks = chunk::chunk_document(
            &item.source_id,
            &doc_id,
            &item.body,
            self.config.chunking.max_tokens,
            self.config.chunking.overlap_tokens,
            &self.config.chunking.mode,
        );

        self.replace_chunks(&doc_id, &chunks).await?;
        let (embeddings_written, embeddings_pending) = self.embed_and_index_chunks(&chunks).await;

        Ok(IngestOutcome {
            document_id: doc_id,
            chunks_written: chunks.len(),
            skipped_unchanged: false,
            embeddings_written,
            embeddings_pending,
        })
    }

    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        self.vector_index.delete_by_document(document_id).await?;
        self.keyword_index.delete_by_document(document_id).await?;
        sqlx::query("DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, text, hash, section_type, section_level, start_char, end_char) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(&chunk.section_type)
            .bind(chunk.section_level)
            .bind(chunk.start_char)
            .bind(chunk.end_char)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Keyword-indexes every chunk unconditionally (it needs no embedding),
    /// then embeds and vector-indexes them if an embedding provider is
    /// configured. A batch whose embedding call fails leaves those chunks
    /// keyword-searchable but not vector-searchable until the next ingest.
    async fn embed_and_index_chunks(&self, chunks: &[Chunk]) -> (usize, usize) {
        for chunk in chunks {
            if let Err(e) = self.keyword_index.index(&chunk.id, &chunk.document_id, &chunk.text).await {
                warn!(chunk_id = %chunk.id, error = %e, "keyword indexing failed");
            }
        }

        if !self.config.embedding.is_enabled() {
            return (0, 0);
        }

        let provider = match embedding::create_provider(&self.config.embedding) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "could not create embedding provider, chunks left unembedded");
                return (0, chunks.len());
            }
        };

        let mut embedded = 0usize;
        let mut pending = 0usize;

        for batch in chunks.chunks(self.config.embedding.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            match embedding::embed_texts(provider.as_ref(), &self.config.embedding, &texts).await {
                Ok(vectors) => {
                    for (chunk, vec) in batch.iter().zip(vectors.iter()) {
                        match self.vector_index.upsert(&chunk.id, &chunk.document_id, vec).await {
                            Ok(()) => embedded += 1,
                            Err(e) => {
                                warn!(chunk_id = %chunk.id, error = %e, "vector upsert failed");
                                pending += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "embedding batch failed");
                    pending += batch.len();
                }
            }
        }

        (embedded, pending)
    }

    // ── Query ──────────────────────────────────────────────────────────

    pub async fn query(&self, query_text: &str, opts: QueryOptions) -> Result<QueryResponse> {
        let embedding_enabled = self.config.embedding.is_enabled();

        let mut query_vec: Option<Vec<f32>> = None;
        if embedding_enabled {
            if let Ok(provider) = embedding::create_provider(&self.config.embedding) {
                match embedding::embed_query(provider.as_ref(), &self.config.embedding, query_text).await {
                    Ok(vec) => query_vec = Some(vec),
                    Err(e) => warn!(error = %e, "query embedding failed, continuing keyword-only"),
                }
            }
        }

        if opts.use_cache {
            if let (Some(cache), Some(vec)) = (&self.cache, &query_vec) {
                if let Some(cached) = cache.lookup(query_text, vec).await {
                    let answer = cached
                        .get("answer")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    let citations = answer
                        .as_deref()
                        .map(generator::extract_citations)
                        .unwrap_or_default();
                    let retrieved: Vec<RetrievedItem> = cached
                        .get("sources")
                        .and_then(|v| serde_json::from_value(v.clone()).ok())
                        .unwrap_or_default();
                    return Ok(QueryResponse {
                        answer,
                        retrieved,
                        citations,
                        cache_hit: true,
                    });
                }
            }
        }

        let mut ranked_lists: Vec<Vec<RetrievedItem>> = Vec::new();

        let keyword_hits = self
            .keyword_index
            .search(query_text, self.config.retrieval.candidate_k_keyword)
            .await?;
        if !keyword_hits.is_empty() {
            let mut items = Vec::with_capacity(keyword_hits.len());
            for hit in keyword_hits {
                let doc = self.fetch_document_meta(&hit.document_id).await?;
                items.push(RetrievedItem {
                    chunk_id: hit.chunk_id,
                    document_id: hit.document_id,
                    text: hit.snippet,
                    source_path: doc.as_ref().map(|d| d.source_id.clone()).unwrap_or_default(),
                    title: doc.as_ref().and_then(|d| d.title.clone()),
                    tier: RetrievalTier::Corpus,
                    score: hit.score,
                    ranking_method: "bm25".to_string(),
                    citation: doc.as_ref().map(|d| d.source_id.clone()),
                    content_type: doc.map(|d| d.content_type).unwrap_or_else(|| "text/plain".to_string()),
                });
            }
            ranked_lists.push(items);
        }

        if embedding_enabled {
            if self.config.retrieval.two_step_enabled {
                match two_step_retriever::two_step_search(
                    &self.pool,
                    self.vector_index.as_ref(),
                    &self.config.embedding,
                    query_text,
                    self.config.retrieval.two_step_candidates,
                    self.config.retrieval.candidate_k_vector,
                    opts.embedder_type.as_deref(),
                )
                .await
                {
                    Ok(hits) => ranked_lists.push(self.two_step_hits_to_items(hits).await?),
                    Err(e) => warn!(error = %e, "two-step retrieval failed, falling back to keyword-only"),
                }
            } else if let Some(vec) = &query_vec {
                let hits = self
                    .vector_index
                    .search(vec, self.config.retrieval.candidate_k_vector)
                    .await?;
                ranked_lists.push(self.vector_hits_to_items(hits).await?);
            }
        }

        // Top local-corpus score, used by `web_mode = on_low_confidence` to
        // decide whether the corpus answer is confident enough to skip a
        // live search.
        let top_local_score = ranked_lists
            .iter()
            .flatten()
            .map(|item| item.score)
            .fold(f64::MIN, f64::max);

        if let (Some(kb), Some(vec)) = (&self.web_kb, &query_vec) {
            if self.config.retrieval.web_kb_enabled {
                let hits = kb
                    .search(vec, self.config.retrieval.candidate_k_vector, self.config.web.min_trust_score)
                    .await?;
                let items = hits
                    .into_iter()
                    .map(|(doc, score)| RetrievedItem {
                        chunk_id: format!("webkb:{}", doc.id),
                        document_id: doc.id.clone(),
                        text: doc.text.clone(),
                        source_path: doc.url.clone(),
                        title: doc.title.clone(),
                        tier: RetrievalTier::WebKb,
                        score,
                        ranking_method: "cosine".to_string(),
                        citation: Some(doc.citation()),
                        content_type: "text/html".to_string(),
                    })
                    .collect();
                ranked_lists.push(items);
            }
        }

        let live_web_wanted = opts.enable_web_search
            && self.config.web.enabled
            && self.config.retrieval.web_search_enabled
            && match opts.web_mode {
                WebMode::Parallel => true,
                WebMode::OnLowConfidence => {
                    top_local_score < self.config.web.low_confidence_threshold
                        || contains_temporal_keyword(query_text)
                }
            };

        if live_web_wanted {
            match self.search_live_web(query_text).await {
                Ok(items) if !items.is_empty() => ranked_lists.push(items),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "live web search failed"),
            }
        }

        let fused = hybrid_retriever::reciprocal_rank_fusion(&ranked_lists, self.config.retrieval.rrf_k);
        let mut fused = self.cross_encoder.rerank(query_text, fused);
        let final_limit = opts.top_k.unwrap_or(self.config.retrieval.final_limit);
        fused.truncate(final_limit.max(0) as usize);

        if !self.config.generation.is_enabled() {
            return Ok(QueryResponse {
                answer: None,
                retrieved: fused,
                citations: Vec::new(),
                cache_hit: false,
            });
        }

        let packed = generator::pack_context(&fused, self.config.generation.max_context_tokens);
        let prompt = generator::build_prompt(query_text, &packed, opts.user_context.as_deref());
        let answer = self.completion.complete(&prompt).await?;
        let citations = generator::extract_citations(&answer);

        if opts.use_cache {
            if let (Some(cache), Some(vec)) = (&self.cache, &query_vec) {
                cache
                    .store(query_text, vec, &serde_json::json!({ "answer": answer, "sources": fused }))
                    .await;
            }
        }

        Ok(QueryResponse {
            answer: Some(answer),
            retrieved: fused,
            citations,
            cache_hit: false,
        })
    }

    async fn search_live_web(&self, query: &str) -> Result<Vec<RetrievedItem>> {
        let snippets = self.snippet_provider.search(query, self.config.web.max_results).await?;
        let mut items = Vec::new();

        for snippet in snippets {
            let page = match self.extractor_provider.extract(&snippet.url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(url = %snippet.url, error = %e, "page extraction failed, skipping result");
                    continue;
                }
            };

            let embedding_vec = if self.config.embedding.is_enabled() {
                match embedding::create_provider(&self.config.embedding) {
                    Ok(provider) => embedding::embed_query(provider.as_ref(), &self.config.embedding, &page.text)
                        .await
                        .ok(),
                    Err(_) => None,
                }
            } else {
                None
            };

            let Some(kb) = &self.web_kb else { continue };
            let doc = kb.upsert(&page, embedding_vec.as_deref()).await?;

            items.push(RetrievedItem {
                chunk_id: format!("liveweb:{}", doc.id),
                document_id: doc.id.clone(),
                text: doc.text.clone(),
                source_path: doc.url.clone(),
                title: doc.title.clone(),
                tier: RetrievalTier::LiveWeb,
                score: 0.0,
                ranking_method: "live_web".to_string(),
                citation: Some(doc.citation()),
                content_type: "text/html".to_string(),
            });
        }

        Ok(items)
    }

    async fn vector_hits_to_items(&self, hits: Vec<VectorHit>) -> Result<Vec<RetrievedItem>> {
        let mut items = Vec::with_capacity(hits.len());
        for hit in hits {
            let text: Option<String> = sqlx::query_scalar("SELECT text FROM chunks WHERE id = ?")
                .bind(&hit.chunk_id)
                .fetch_optional(&self.pool)
                .await?;
            let Some(text) = text else { continue };
            let doc = self.fetch_document_meta(&hit.document_id).await?;
            items.push(RetrievedItem {
                chunk_id: hit.chunk_id,
                document_id: hit.document_id,
                text,
                source_path: doc.as_ref().map(|d| d.source_id.clone()).unwrap_or_default(),
                title: doc.as_ref().and_then(|d| d.title.clone()),
                tier: RetrievalTier::Corpus,
                score: hit.score,
                ranking_method: "cosine".to_string(),
                citation: doc.as_ref().map(|d| d.source_id.clone()),
                content_type: doc.map(|d| d.content_type).unwrap_or_else(|| "text/plain".to_string()),
            });
        }
        Ok(items)
    }

    async fn two_step_hits_to_items(&self, hits: Vec<TwoStepHit>) -> Result<Vec<RetrievedItem>> {
        let mut items = Vec::with_capacity(hits.len());
        for hit in hits {
            let doc = self.fetch_document_meta(&hit.document_id).await?;
            items.push(RetrievedItem {
                chunk_id: hit.chunk_id,
                document_id: hit.document_id,
                text: hit.text,
                source_path: doc.as_ref().map(|d| d.source_id.clone()).unwrap_or_default(),
                title: doc.as_ref().and_then(|d| d.title.clone()),
                tier: RetrievalTier::Corpus,
                score: hit.score,
                ranking_method: hit.ranking_method,
                citation: doc.as_ref().map(|d| d.source_id.clone()),
                content_type: doc.map(|d| d.content_type).unwrap_or_else(|| "text/plain".to_string()),
            });
        }
        Ok(items)
    }

    async fn fetch_document_meta(&self, document_id: &str) -> Result<Option<DocumentMeta>> {
        let row = sqlx::query("SELECT source_id, title, content_type FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| DocumentMeta {
            source_id: r.get("source_id"),
            title: r.get("title"),
            content_type: r.get("content_type"),
        }))
    }

    // ── Maintenance ────────────────────────────────────────────────────

    /// Sweep expired web knowledge base documents and cache entries. Cheap
    /// and idempotent — safe to run on a schedule or before a batch of
    /// queries.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let web_documents_purged = match &self.web_kb {
            Some(kb) => kb.purge_expired().await?,
            None => 0,
        };
        let cache_entries_purged = match &self.cache {
            Some(cache) => cache.evict_expired().await?,
            None => 0,
        };
        info!(web_documents_purged, cache_entries_purged, "reconcile sweep complete");
        Ok(ReconcileReport {
            web_documents_purged,
            cache_entries_purged,
        })
    }
}

fn detect_content_type(path: &Path) -> &'static str {
    match path.extension().map(|e| e.to_string_lossy().to_lowercase()) {
        Some(ext) if ext == "pdf" => extract::MIME_PDF,
        Some(ext) if ext == "docx" => extract::MIME_DOCX,
        Some(ext) if ext == "pptx" => extract::MIME_PPTX,
        Some(ext) if ext == "xlsx" => extract::MIME_XLSX,
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use tempfile::tempdir;

    fn test_config(db_path: std::path::PathBuf, root: std::path::PathBuf) -> Config {
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
                web_kb_enabled: true,
            },
            embedding: EmbeddingConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
            connectors: ConnectorsConfig {
                filesystem: Some(FilesystemConnectorConfig {
                    root,
                    include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
                    exclude_globs: vec![],
                    follow_symlinks: false,
                }),
            },
            web: WebConfig::default(),
            cache: CacheConfig::default(),
            generation: GenerationConfig::default(),
        }
    }

    async fn setup() -> (tempfile::TempDir, Arc<Orchestrator>) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("ctx.sqlite");
        let config = test_config(db_path, dir.path().to_path_buf());
        crate::migrate::run_migrations(&config).await.unwrap();
        let orchestrator = Orchestrator::new(config).await.unwrap();
        (dir, orchestrator)
    }

    #[tokio::test]
    async fn test_ingest_document_then_reingest_unchanged_skips() {
        let (dir, orchestrator) = setup().await;
        let file = dir.path().join("a.md");
        std::fs::write(&file, "# Hello\n\nworld content here").unwrap();

        let first = orchestrator.ingest_document(&file, "filesystem:docs", false).await.unwrap();
        assert!(!first.skipped_unchanged);
        assert!(first.chunks_written > 0);

        let second = orchestrator.ingest_document(&file, "filesystem:docs", false).await.unwrap();
        assert!(second.skipped_unchanged);
        assert_eq!(second.document_id, first.document_id);
    }

    #[tokio::test]
    async fn test_ingest_document_force_reingests() {
        let (dir, orchestrator) = setup().await;
        let file = dir.path().join("a.md");
        std::fs::write(&file, "content").unwrap();

        orchestrator.ingest_document(&file, "filesystem:docs", false).await.unwrap();
        let forced = orchestrator.ingest_document(&file, "filesystem:docs", true).await.unwrap();
        assert!(!forced.skipped_unchanged);
    }

    #[tokio::test]
    async fn test_ingest_directory_scans_and_chunks() {
        let (dir, orchestrator) = setup().await;
        std::fs::write(dir.path().join("one.md"), "# One\n\nfirst document").unwrap();
        std::fs::write(dir.path().join("two.md"), "# Two\n\nsecond document").unwrap();

        let outcome = orchestrator.ingest_directory("docs", false).await.unwrap();
        assert_eq!(outcome.documents_scanned, 2);
        assert_eq!(outcome.documents_ingested, 2);
        assert!(outcome.chunks_written >= 2);
    }

    #[tokio::test]
    async fn test_query_keyword_only_no_generation() {
        let (dir, orchestrator) = setup().await;
        let file = dir.path().join("doc.md");
        std::fs::write(&file, "# Zebra\n\nzebras are striped mammals").unwrap();
        orchestrator.ingest_document(&file, "filesystem:docs", false).await.unwrap();

        let response = orchestrator.query("zebra", QueryOptions::default()).await.unwrap();
        assert!(response.answer.is_none());
        assert!(!response.retrieved.is_empty());
        assert!(response.retrieved[0].text.to_lowercase().contains("zebra"));
    }

    #[tokio::test]
    async fn test_query_empty_corpus_returns_no_hits() {
        let (_dir, orchestrator) = setup().await;
        let response = orchestrator.query("anything", QueryOptions::default()).await.unwrap();
        assert!(response.retrieved.is_empty());
        assert!(response.answer.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_runs_without_cache_or_kb_configured() {
        let (dir, orchestrator) = setup().await;
        let report = orchestrator.reconcile().await.unwrap();
        assert_eq!(report.web_documents_purged, 0);
        drop(dir);
    }
}
