//! Hybrid retrieval: reciprocal rank fusion (RRF) across ranked lists drawn
//! from different tiers (local corpus, web knowledge base, live web search).
//!
//! Each input list is already ranked by its own scoring method (BM25 rank,
//! cosine similarity, premium rerank, …) — RRF only cares about rank
//! position, not the underlying score's scale, which is what lets it fuse
//! keyword and vector rankings without the min-max normalization the
//! original hybrid search used.

use std::collections::HashMap;

use crate::models::RetrievedItem;

/// Default RRF damping constant. Larger values flatten the influence of
/// rank position; smaller values weight the very top of each list more
/// heavily.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Fuse multiple ranked lists into one, scoring each item by
/// `Σ tier_weight / (k + rank)` across every list it appears in (1-indexed
/// rank). Ties are broken by chunk ID for determinism.
pub fn reciprocal_rank_fusion(ranked_lists: &[Vec<RetrievedItem>], k: f64) -> Vec<RetrievedItem> {
    let mut fused: HashMap<String, RetrievedItem> = HashMap::new();
    let mut scores: HashMap<String, f64> = HashMap::new();

    for list in ranked_lists {
        for (rank, item) in list.iter().enumerate() {
            let weight = item.tier.weight();
            let contribution = weight / (k + (rank as f64 + 1.0));
            *scores.entry(item.chunk_id.clone()).or_insert(0.0) += contribution;
            fused
                .entry(item.chunk_id.clone())
                .or_insert_with(|| item.clone());
        }
    }

    let mut results: Vec<RetrievedItem> = fused
        .into_iter()
        .map(|(chunk_id, mut item)| {
            item.score = *scores.get(&chunk_id).unwrap_or(&0.0);
            item
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    results
}

/// Optional final reranking stage applied to the fused result list before
/// it is truncated to `final_limit`. The default is a no-op; a real
/// cross-encoder would score `(query, item.text)` pairs directly.
pub trait CrossEncoder: Send + Sync {
    fn rerank(&self, query: &str, items: Vec<RetrievedItem>) -> Vec<RetrievedItem>;
}

pub struct IdentityCrossEncoder;

impl CrossEncoder for IdentityCrossEncoder {
    fn rerank(&self, _query: &str, items: Vec<RetrievedItem>) -> Vec<RetrievedItem> {
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RetrievalTier;

    fn item(chunk_id: &str, tier: RetrievalTier, method: &str) -> RetrievedItem {
        RetrievedItem {
            chunk_id: chunk_id.to_string(),
            document_id: "doc1".to_string(),
            text: "text".to_string(),
            source_path: "doc1.md".to_string(),
            title: None,
            tier,
            score: 0.0,
            ranking_method: method.to_string(),
            citation: None,
            content_type: "text/plain".to_string(),
        }
    }

    #[test]
    fn test_rrf_rewards_consensus() {
        let keyword = vec![
            item("a", RetrievalTier::Corpus, "bm25"),
            item("b", RetrievalTier::Corpus, "bm25"),
        ];
        let vector = vec![
            item("b", RetrievalTier::Corpus, "cosine"),
            item("a", RetrievalTier::Corpus, "cosine"),
        ];
        let fused = reciprocal_rank_fusion(&[keyword, vector], DEFAULT_RRF_K);
        assert_eq!(fused.len(), 2);
        // "a" ranked #1 in keyword and #2 in vector, "b" the reverse —
        // symmetric, so scores should tie and fall back to id ordering.
        assert!((fused[0].score - fused[1].score).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_corpus_outranks_web_at_equal_rank() {
        let corpus = vec![item("a", RetrievalTier::Corpus, "bm25")];
        let web = vec![item("b", RetrievalTier::LiveWeb, "web")];
        let fused = reciprocal_rank_fusion(&[corpus, web], DEFAULT_RRF_K);
        assert_eq!(fused[0].chunk_id, "a");
    }

    #[test]
    fn test_rrf_empty_input() {
        let fused = reciprocal_rank_fusion(&[], DEFAULT_RRF_K);
        assert!(fused.is_empty());
    }

    #[test]
    fn test_identity_cross_encoder_preserves_order() {
        let items = vec![
            item("a", RetrievalTier::Corpus, "bm25"),
            item("b", RetrievalTier::Corpus, "bm25"),
        ];
        let encoder = IdentityCrossEncoder;
        let reranked = encoder.rerank("query", items.clone());
        assert_eq!(
            reranked.iter().map(|i| i.chunk_id.clone()).collect::<Vec<_>>(),
            items.iter().map(|i| i.chunk_id.clone()).collect::<Vec<_>>()
        );
    }
}
