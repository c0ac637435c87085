//! Semantic cache: answers keyed by query meaning, not exact text.
//!
//! A lookup embeds the incoming query and scans stored entries for the
//! closest match by cosine similarity; a hit above `similarity_threshold`
//! short-circuits generation. Backed by `cache_entries`, a linear scan —
//! the same tradeoff the vector index makes, justified by corpus scale.
//! Any backend failure (pool error, corrupt row) degrades to a cache miss
//! rather than failing the query: the cache is an optimization, not a
//! dependency the query path should break on.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};

pub struct SemanticCache {
    pool: SqlitePool,
    similarity_threshold: f64,
    ttl_secs: i64,
}

impl SemanticCache {
    pub fn new(pool: SqlitePool, similarity_threshold: f64, ttl_secs: i64) -> Self {
        Self {
            pool,
            similarity_threshold,
            ttl_secs,
        }
    }

    /// Look up a cached answer for a semantically similar query. Returns
    /// `None` on miss, on expiry, or on any backend error (logged and
    /// swallowed — the caller should fall through to live generation).
    pub async fn lookup(&self, query_text: &str, query_embedding: &[f32]) -> Option<serde_json::Value> {
        match self.try_lookup(query_text, query_embedding).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "semantic cache lookup failed, degrading to miss");
                None
            }
        }
    }

    async fn try_lookup(&self, _query_text: &str, query_embedding: &[f32]) -> Result<Option<serde_json::Value>> {
        let now = Utc::now().timestamp();
        let rows = sqlx::query(
            "SELECT id, query_embedding, answer_json FROM cache_entries WHERE expires_at >= ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut best: Option<(String, f64, serde_json::Value)> = None;
        for row in &rows {
            let blob: Vec<u8> = row.get("query_embedding");
            let vec = blob_to_vec(&blob);
            let similarity = cosine_similarity(query_embedding, &vec) as f64;
            if similarity >= self.similarity_threshold {
                if best.as_ref().map(|(_, s, _)| similarity > *s).unwrap_or(true) {
                    let answer_json: String = row.get("answer_json");
                    let parsed: serde_json::Value = serde_json::from_str(&answer_json)?;
                    best = Some((row.get("id"), similarity, parsed));
                }
            }
        }

        if let Some((id, _, answer)) = &best {
            sqlx::query("UPDATE cache_entries SET hit_count = hit_count + 1 WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            return Ok(Some(answer.clone()));
        }

        Ok(None)
    }

    /// Store a new query/answer pair. Failures are logged and swallowed —
    /// a cache write failure must never fail the query it's caching.
    pub async fn store(&self, query_text: &str, query_embedding: &[f32], answer: &serde_json::Value) {
        if let Err(e) = self.try_store(query_text, query_embedding, answer).await {
            warn!(error = %e, "semantic cache store failed, continuing without caching");
        }
    }

    async fn try_store(&self, query_text: &str, query_embedding: &[f32], answer: &serde_json::Value) -> Result<()> {
        let now = Utc::now().timestamp();
        let id = Uuid::new_v4().to_string();
        let blob = vec_to_blob(query_embedding);
        let answer_json = serde_json::to_string(answer)?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (id, query_text, query_embedding, answer_json, created_at, expires_at, hit_count)
            VALUES (?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(id)
        .bind(query_text)
        .bind(blob)
        .bind(answer_json)
        .bind(now)
        .bind(now + self.ttl_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete expired entries. Returns the number removed.
    pub async fn evict_expired(&self) -> Result<u64> {
        let now = Utc::now().timestamp();
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
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
            r#"CREATE TABLE cache_entries (
                id TEXT PRIMARY KEY, query_text TEXT NOT NULL, query_embedding BLOB NOT NULL,
                answer_json TEXT NOT NULL, created_at INTEGER NOT NULL, expires_at INTEGER NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0
            )"#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_store_then_lookup_hit_above_threshold() {
        let pool = setup_pool().await;
        let cache = SemanticCache::new(pool, 0.9, 3600);
        let answer = serde_json::json!({"text": "42"});
        cache.store("what is the answer", &[1.0, 0.0], &answer).await;

        let hit = cache.lookup("what's the answer", &[1.0, 0.0]).await;
        assert_eq!(hit, Some(answer));
    }

    #[tokio::test]
    async fn test_lookup_miss_below_threshold() {
        let pool = setup_pool().await;
        let cache = SemanticCache::new(pool, 0.95, 3600);
        cache
            .store("q", &[1.0, 0.0], &serde_json::json!({"text": "x"}))
            .await;

        let hit = cache.lookup("different", &[0.0, 1.0]).await;
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_not_returned() {
        let pool = setup_pool().await;
        let cache = SemanticCache::new(pool, 0.5, -1);
        cache
            .store("q", &[1.0, 0.0], &serde_json::json!({"text": "x"}))
            .await;

        let hit = cache.lookup("q", &[1.0, 0.0]).await;
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn test_evict_expired_removes_rows() {
        let pool = setup_pool().await;
        let cache = SemanticCache::new(pool, 0.5, -1);
        cache
            .store("q", &[1.0, 0.0], &serde_json::json!({"text": "x"}))
            .await;

        let removed = cache.evict_expired().await.unwrap();
        assert_eq!(removed, 1);
    }
}
