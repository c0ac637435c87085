//! Keyword index: BM25-family full-text search over chunk text.
//!
//! Backed by the `chunks_fts` FTS5 virtual table. FTS5's `rank` column is
//! negative (lower = better); [`SqliteKeywordIndex::search`] negates it so
//! callers always see higher-is-better scores, matching [`crate::vector_index::VectorIndex`].

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f64,
    pub snippet: String,
}

#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn index(&self, chunk_id: &str, document_id: &str, text: &str) -> Result<()>;
    async fn search(&self, query: &str, k: i64) -> Result<Vec<KeywordHit>>;
    async fn delete_by_document(&self, document_id: &str) -> Result<()>;
}

pub struct SqliteKeywordIndex {
    pool: SqlitePool,
}

impl SqliteKeywordIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeywordIndex for SqliteKeywordIndex {
    async fn index(&self, chunk_id: &str, document_id: &str, text: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(chunk_id)
            .bind(document_id)
            .bind(text)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(&self, query: &str, k: i64) -> Result<Vec<KeywordHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, document_id, rank,
                   snippet(chunks_fts, 2, '>>>', '<<<', '...', 48) AS snippet
            FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(k)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                KeywordHit {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    score: -rank,
                    snippet: row.get("snippet"),
                }
            })
            .collect())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
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
            "CREATE VIRTUAL TABLE chunks_fts USING fts5(chunk_id UNINDEXED, document_id UNINDEXED, text)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_index_then_search_finds_match() {
        let pool = setup_pool().await;
        let index = SqliteKeywordIndex::new(pool);
        index.index("c1", "d1", "the quick brown fox").await.unwrap();
        index.index("c2", "d1", "a slow green turtle").await.unwrap();

        let hits = index.search("fox", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let pool = setup_pool().await;
        let index = SqliteKeywordIndex::new(pool);
        let hits = index.search("", 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_reindex_replaces_entry() {
        let pool = setup_pool().await;
        let index = SqliteKeywordIndex::new(pool);
        index.index("c1", "d1", "alpha").await.unwrap();
        index.index("c1", "d1", "beta").await.unwrap();

        assert!(index.search("alpha", 10).await.unwrap().is_empty());
        assert_eq!(index.search("beta", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_document() {
        let pool = setup_pool().await;
        let index = SqliteKeywordIndex::new(pool);
        index.index("c1", "d1", "alpha").await.unwrap();
        index.delete_by_document("d1").await.unwrap();
        assert!(index.search("alpha", 10).await.unwrap().is_empty());
    }
}
