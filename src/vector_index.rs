//! Vector index: stores chunk embeddings and serves cosine-similarity search.
//!
//! Backed by the `chunk_vectors` table (one little-endian f32 BLOB per
//! chunk). Search is a brute-force scan — fine at the corpus sizes this
//! crate targets; an ANN index would replace the scan in [`SqliteVectorIndex::search`]
//! without touching the trait.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};

/// A single ranked hit from a vector search.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f64,
}

/// Point-in-time counts describing what the index currently holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorIndexInfo {
    pub vector_count: i64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, chunk_id: &str, document_id: &str, embedding: &[f32]) -> Result<()>;
    async fn search(&self, query: &[f32], k: i64) -> Result<Vec<VectorHit>>;
    async fn delete_by_document(&self, document_id: &str) -> Result<()>;
    async fn info(&self) -> Result<VectorIndexInfo>;
}

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, chunk_id: &str, document_id: &str, embedding: &[f32]) -> Result<()> {
        let blob = vec_to_blob(embedding);
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
            VALUES (?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET embedding = excluded.embedding
            "#,
        )
        .bind(chunk_id)
        .bind(document_id)
        .bind(blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn search(&self, query: &[f32], k: i64) -> Result<Vec<VectorHit>> {
        let rows = sqlx::query("SELECT chunk_id, document_id, embedding FROM chunk_vectors")
            .fetch_all(&self.pool)
            .await?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let score = cosine_similarity(query, &vec) as f64;
                VectorHit {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    score,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k.max(0) as usize);
        Ok(hits)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn info(&self) -> Result<VectorIndexInfo> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(VectorIndexInfo { vector_count: count })
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
            r#"CREATE TABLE chunk_vectors (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                embedding BLOB NOT NULL
            )"#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_upsert_then_search_returns_best_match() {
        let pool = setup_pool().await;
        let index = SqliteVectorIndex::new(pool);

        index.upsert("c1", "d1", &[1.0, 0.0]).await.unwrap();
        index.upsert("c2", "d1", &[0.0, 1.0]).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].chunk_id, "c1");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_existing() {
        let pool = setup_pool().await;
        let index = SqliteVectorIndex::new(pool);

        index.upsert("c1", "d1", &[1.0, 0.0]).await.unwrap();
        index.upsert("c1", "d1", &[0.0, 1.0]).await.unwrap();

        let info = index.info().await.unwrap();
        assert_eq!(info.vector_count, 1);
    }

    #[tokio::test]
    async fn test_delete_by_document() {
        let pool = setup_pool().await;
        let index = SqliteVectorIndex::new(pool);

        index.upsert("c1", "d1", &[1.0, 0.0]).await.unwrap();
        index.upsert("c2", "d2", &[0.0, 1.0]).await.unwrap();
        index.delete_by_document("d1").await.unwrap();

        let info = index.info().await.unwrap();
        assert_eq!(info.vector_count, 1);
    }
}
