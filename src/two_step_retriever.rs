//! Two-step retrieval: cheap local-space search, then premium-space rerank.
//!
//! Step 1 searches [`VectorIndex`] in whatever space the configured embedder
//! produces locally. Step 2 re-embeds the surviving candidates (and the
//! query) into the premium space and reorders by premium-space cosine
//! similarity. If the premium re-embed fails for any reason, retrieval
//! degrades to the step-1 ranking rather than failing the query —
//! `ranking_method` on the returned items records which path was taken.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::EmbeddingConfig;
use crate::embedding::{self, PremiumSpace};
use crate::vector_index::VectorIndex;

#[derive(Debug, Clone)]
pub struct TwoStepHit {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub score: f64,
    pub ranking_method: String,
}

pub async fn two_step_search(
    pool: &SqlitePool,
    index: &dyn VectorIndex,
    embedding_config: &EmbeddingConfig,
    query: &str,
    candidate_k: i64,
    final_k: i64,
    premium_override: Option<&str>,
) -> Result<Vec<TwoStepHit>> {
    let provider = embedding::create_provider(embedding_config)?;
    let local_query_vec =
        embedding::embed_query(provider.as_ref(), embedding_config, query).await?;

    let local_hits = index.search(&local_query_vec, candidate_k).await?;
    if local_hits.is_empty() {
        return Ok(Vec::new());
    }

    let texts = fetch_chunk_texts(pool, &local_hits.iter().map(|h| h.chunk_id.clone()).collect::<Vec<_>>()).await?;

    match rerank_premium(embedding_config, query, &local_hits, &texts, premium_override).await {
        Ok(mut hits) => {
            hits.truncate(final_k.max(0) as usize);
            Ok(hits)
        }
        Err(_) => {
            let mut hits: Vec<TwoStepHit> = local_hits
                .into_iter()
                .map(|h| TwoStepHit {
                    text: texts.get(&h.chunk_id).cloned().unwrap_or_default(),
                    chunk_id: h.chunk_id,
                    document_id: h.document_id,
                    score: h.score,
                    ranking_method: "local_approximate".to_string(),
                })
                .collect();
            hits.truncate(final_k.max(0) as usize);
            Ok(hits)
        }
    }
}

async fn rerank_premium(
    embedding_config: &EmbeddingConfig,
    query: &str,
    local_hits: &[crate::vector_index::VectorHit],
    texts: &std::collections::HashMap<String, String>,
    premium_override: Option<&str>,
) -> Result<Vec<TwoStepHit>> {
    let candidate_texts: Vec<String> = local_hits
        .iter()
        .map(|h| texts.get(&h.chunk_id).cloned().unwrap_or_default())
        .collect();

    // A per-request embedder override only ever applies to the premium
    // rerank pass, never to the indexed local space — swapping the
    // provider config used for `index.search` would desync query vectors
    // from the vectors actually stored in the index.
    let premium_config = match premium_override {
        Some(provider) => {
            let mut cfg = embedding_config.clone();
            cfg.provider = provider.to_string();
            cfg
        }
        None => embedding_config.clone(),
    };

    let premium_query = embedding::re_embed(&premium_config, &[query.to_string()], PremiumSpace::Premium)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("premium query embedding returned no vector"))?;

    let premium_candidates = embedding::re_embed(&premium_config, &candidate_texts, PremiumSpace::Premium).await?;

    let mut hits: Vec<TwoStepHit> = local_hits
        .iter()
        .zip(premium_candidates.iter())
        .map(|(local, premium_vec)| TwoStepHit {
            chunk_id: local.chunk_id.clone(),
            document_id: local.document_id.clone(),
            text: texts.get(&local.chunk_id).cloned().unwrap_or_default(),
            score: embedding::cosine_similarity(&premium_query, premium_vec) as f64,
            ranking_method: "premium_rerank".to_string(),
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(hits)
}

async fn fetch_chunk_texts(
    pool: &SqlitePool,
    chunk_ids: &[String],
) -> Result<std::collections::HashMap<String, String>> {
    let mut map = std::collections::HashMap::new();
    for chunk_id in chunk_ids {
        if let Some(row) = sqlx::query("SELECT text FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(pool)
            .await?
        {
            map.insert(chunk_id.clone(), row.get::<String, _>("text"));
        }
    }
    Ok(map)
}
