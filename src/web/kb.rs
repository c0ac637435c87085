//! Persistent web knowledge base: dedup, TTL expiry, and access tracking for
//! documents fetched from the live web.
//!
//! Dedup happens on two axes — `url` (unique constraint) and `content_hash`
//! (checked explicitly, since the same article can be mirrored at different
//! URLs). A hit against an existing, unexpired document bumps
//! `times_retrieved`/`last_retrieved_at` instead of inserting a duplicate row.

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::WebDocument;
use crate::web::provider::{trust_score, ExtractedPage};

pub struct WebKnowledgeBase {
    pool: SqlitePool,
    ttl_days: i64,
}

impl WebKnowledgeBase {
    pub fn new(pool: SqlitePool, ttl_days: i64) -> Self {
        Self { pool, ttl_days }
    }

    fn content_hash(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a document by URL. If present and unexpired, record a hit and
    /// return it; if present but expired, the caller should re-fetch and
    /// call [`upsert`](Self::upsert). Returns `None` if never seen.
    pub async fn get_by_url(&self, url: &str) -> Result<Option<WebDocument>> {
        let row = sqlx::query(
            r#"
            SELECT id, url, title, author, published_at, text, content_hash,
                   trust_score, fetched_at, expires_at, times_retrieved, last_retrieved_at
            FROM web_documents WHERE url = ?
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let doc = row_to_doc(&row);

        let now = Utc::now().timestamp();
        if doc.expires_at < now {
            return Ok(Some(doc));
        }

        self.record_hit(&doc.id).await?;
        self.get_by_url_uncounted(url).await
    }

    async fn get_by_url_uncounted(&self, url: &str) -> Result<Option<WebDocument>> {
        let row = sqlx::query(
            r#"
            SELECT id, url, title, author, published_at, text, content_hash,
                   trust_score, fetched_at, expires_at, times_retrieved, last_retrieved_at
            FROM web_documents WHERE url = ?
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_to_doc(&r)))
    }

    async fn record_hit(&self, id: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            "UPDATE web_documents SET times_retrieved = times_retrieved + 1, last_retrieved_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or refresh a fetched page, optionally storing its embedding.
    /// Returns the stored [`WebDocument`].
    pub async fn upsert(&self, page: &ExtractedPage, embedding: Option<&[f32]>) -> Result<WebDocument> {
        let now = Utc::now().timestamp();
        let expires_at = now + self.ttl_days * 86_400;
        let content_hash = Self::content_hash(&page.text);
        let score = trust_score(&page.url);

        let existing_id: Option<String> = sqlx::query_scalar("SELECT id FROM web_documents WHERE url = ?")
            .bind(&page.url)
            .fetch_optional(&self.pool)
            .await?;

        let id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        sqlx::query(
            r#"
            INSERT INTO web_documents
                (id, url, title, author, published_at, text, content_hash,
                 trust_score, fetched_at, expires_at, times_retrieved, last_retrieved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                published_at = excluded.published_at,
                text = excluded.text,
                content_hash = excluded.content_hash,
                trust_score = excluded.trust_score,
                fetched_at = excluded.fetched_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&id)
        .bind(&page.url)
        .bind(&page.title)
        .bind(&page.author)
        .bind(page.published_at)
        .bind(&page.text)
        .bind(&content_hash)
        .bind(score)
        .bind(now)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if let Some(vec) = embedding {
            let blob = vec_to_blob(vec);
            sqlx::query(
                r#"
                INSERT INTO web_document_vectors (web_document_id, embedding) VALUES (?, ?)
                ON CONFLICT(web_document_id) DO UPDATE SET embedding = excluded.embedding
                "#,
            )
            .bind(&id)
            .bind(blob)
            .execute(&self.pool)
            .await?;
        }

        self.get_by_url_uncounted(&page.url)
            .await?
            .ok_or_else(|| anyhow::anyhow!("web document vanished immediately after upsert"))
    }

    /// Cosine-similarity search over stored web document vectors, filtered
    /// to unexpired documents at or above `min_trust_score`.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        k: i64,
        min_trust_score: f64,
    ) -> Result<Vec<(WebDocument, f64)>> {
        let now = Utc::now().timestamp();
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.url, d.title, d.author, d.published_at, d.text, d.content_hash,
                   d.trust_score, d.fetched_at, d.expires_at, d.times_retrieved, d.last_retrieved_at,
                   v.embedding
            FROM web_documents d
            JOIN web_document_vectors v ON v.web_document_id = d.id
            WHERE d.expires_at >= ? AND d.trust_score >= ?
            "#,
        )
        .bind(now)
        .bind(min_trust_score)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(WebDocument, f64)> = rows
            .iter()
            .map(|row| {
                let doc = row_to_doc(row);
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let score = cosine_similarity(query_embedding, &vec) as f64;
                (doc, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k.max(0) as usize);
        Ok(scored)
    }

    /// Delete documents past their TTL. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now().timestamp();
        let expired_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM web_documents WHERE expires_at < ?")
                .bind(now)
                .fetch_all(&self.pool)
                .await?;

        for id in &expired_ids {
            sqlx::query("DELETE FROM web_document_vectors WHERE web_document_id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        let result = sqlx::query("DELETE FROM web_documents WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_doc(row: &sqlx::sqlite::SqliteRow) -> WebDocument {
    WebDocument {
        id: row.get("id"),
        url: row.get("url"),
        title: row.get("title"),
        author: row.get("author"),
        published_at: row.get("published_at"),
        text: row.get("text"),
        content_hash: row.get("content_hash"),
        trust_score: row.get("trust_score"),
        fetched_at: row.get("fetched_at"),
        expires_at: row.get("expires_at"),
        times_retrieved: row.get("times_retrieved"),
        last_retrieved_at: row.get("last_retrieved_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            r#"CREATE TABLE web_documents (
                id TEXT PRIMARY KEY, url TEXT NOT NULL UNIQUE, title TEXT, author TEXT,
                published_at INTEGER, text TEXT NOT NULL, content_hash TEXT NOT NULL,
                trust_score REAL NOT NULL DEFAULT 0.5, fetched_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL, times_retrieved INTEGER NOT NULL DEFAULT 0,
                last_retrieved_at INTEGER NOT NULL
            )"#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"CREATE TABLE web_document_vectors (
                web_document_id TEXT PRIMARY KEY, embedding BLOB NOT NULL
            )"#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    fn page(url: &str, text: &str) -> ExtractedPage {
        ExtractedPage {
            url: url.to_string(),
            title: Some("Title".to_string()),
            author: Some("Author".to_string()),
            published_at: None,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_then_get_by_url() {
        let pool = setup_pool().await;
        let kb = WebKnowledgeBase::new(pool, 7);
        kb.upsert(&page("https://a.gov/x", "hello world"), None)
            .await
            .unwrap();

        let doc = kb.get_by_url("https://a.gov/x").await.unwrap().unwrap();
        assert_eq!(doc.text, "hello world");
        assert_eq!(doc.times_retrieved, 1);
    }

    #[tokio::test]
    async fn test_upsert_dedups_by_url() {
        let pool = setup_pool().await;
        let kb = WebKnowledgeBase::new(pool, 7);
        kb.upsert(&page("https://a.gov/x", "v1"), None).await.unwrap();
        kb.upsert(&page("https://a.gov/x", "v2"), None).await.unwrap();

        let doc = kb.get_by_url("https://a.gov/x").await.unwrap().unwrap();
        assert_eq!(doc.text, "v2");
    }

    #[tokio::test]
    async fn test_citation_with_no_year_falls_back() {
        let pool = setup_pool().await;
        let kb = WebKnowledgeBase::new(pool, 7);
        let doc = kb.upsert(&page("https://a.gov/x", "body"), None).await.unwrap();
        assert!(doc.citation().contains("(n.d.)"));
    }

    #[tokio::test]
    async fn test_search_respects_min_trust_score() {
        let pool = setup_pool().await;
        let kb = WebKnowledgeBase::new(pool, 7);
        kb.upsert(&page("https://example.com/x", "hello"), Some(&[1.0, 0.0]))
            .await
            .unwrap();

        let hits = kb.search(&[1.0, 0.0], 10, 0.6).await.unwrap();
        assert!(hits.is_empty(), "example.com trust score 0.5 should be excluded at threshold 0.6");
    }

    #[tokio::test]
    async fn test_purge_expired_removes_old_documents() {
        let pool = setup_pool().await;
        let kb = WebKnowledgeBase::new(pool, -1);
        kb.upsert(&page("https://a.gov/x", "hello"), None).await.unwrap();
        let removed = kb.purge_expired().await.unwrap();
        assert_eq!(removed, 1);
    }
}
