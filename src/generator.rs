//! Answer generation: context packing under a token budget, prompt
//! construction, and the [`Completion`] backend abstraction.
//!
//! Token budget is approximated as `len(text) / 4` characters-per-token,
//! matching the same heuristic [`crate::chunk`] uses for chunk sizing —
//! good enough to keep prompts under a model's context window without
//! pulling in a real tokenizer for this purpose.

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::models::RetrievedItem;

const CHARS_PER_TOKEN: usize = 4;

/// One packed context item, ready to render into a prompt.
#[derive(Debug, Clone)]
pub struct PackedDoc {
    pub index: usize,
    pub text: String,
    pub source_path: String,
    pub content_type: String,
}

/// Greedily pack retrieved items into a prompt under `max_context_tokens`.
/// Items are taken in the order given (already ranked); a chunk that would
/// overflow the remaining budget is truncated at the nearest sentence or
/// newline boundary as long as at least 80% of the remaining budget is kept
/// — otherwise it's dropped rather than packed as a sliver.
pub fn pack_context(items: &[RetrievedItem], max_context_tokens: usize) -> Vec<PackedDoc> {
    let max_chars = max_context_tokens * CHARS_PER_TOKEN;
    let mut packed = Vec::new();
    let mut used_chars = 0usize;

    for item in items {
        if used_chars >= max_chars {
            break;
        }
        let remaining = max_chars - used_chars;
        let text = if item.text.len() <= remaining {
            item.text.clone()
        } else {
            let min_keep = (remaining as f64 * 0.8) as usize;
            match truncate_at_boundary(&item.text, remaining) {
                Some(truncated) if truncated.len() >= min_keep => truncated,
                _ => continue,
            }
        };

        used_chars += text.len();
        packed.push(PackedDoc {
            index: packed.len() + 1,
            text,
            source_path: item.citation.clone().unwrap_or_else(|| item.source_path.clone()),
            content_type: item.content_type.clone(),
        });
    }

    packed
}

/// Truncate `text` to at most `limit` bytes, preferring to cut at a sentence
/// end (`. `, `.\n`) or otherwise a newline, scanning backward from `limit`.
fn truncate_at_boundary(text: &str, limit: usize) -> Option<String> {
    if limit == 0 || text.is_empty() {
        return None;
    }
    let limit = limit.min(text.len());
    let window = &text[..limit];

    let boundary = window
        .rfind(". ")
        .map(|i| i + 1)
        .or_else(|| window.rfind(".\n"))
        .or_else(|| window.rfind('\n'));

    let cut = boundary.unwrap_or(limit);
    let piece = text[..cut].trim();
    if piece.is_empty() {
        None
    } else {
        Some(piece.to_string())
    }
}

/// Build the user-facing prompt from packed context and the query.
///
/// Each document is rendered as `[Doc N] Source: <path>\nType: <type>\nContent:\n<text>`,
/// joined by `\n\n---\n\n` separators so the model can tell where one
/// document ends and the next begins.
pub fn build_prompt(query: &str, packed: &[PackedDoc], user_context: Option<&str>) -> String {
    let mut prompt = String::new();
    prompt.push_str("Answer the question using only the numbered documents below. Cite sources inline as [Doc N].\n\n");
    if let Some(ctx) = user_context {
        if !ctx.trim().is_empty() {
            prompt.push_str(&format!("User context: {ctx}\n\n"));
        }
    }

    let docs: Vec<String> = packed
        .iter()
        .map(|doc| {
            format!(
                "[Doc {}] Source: {}\nType: {}\nContent:\n{}",
                doc.index, doc.source_path, doc.content_type, doc.text
            )
        })
        .collect();
    prompt.push_str(&docs.join("\n\n---\n\n"));
    prompt.push_str(&format!("\n\nQuestion: {query}\n"));
    prompt
}

/// Extract `[Doc N]` citation tokens referenced in a generated answer, in
/// order of first appearance, deduplicated.
pub fn extract_citations(answer: &str) -> Vec<usize> {
    let re = Regex::new(r"\[Doc (\d+)\]").expect("static citation regex is valid");
    let mut seen = Vec::new();
    for cap in re.captures_iter(answer) {
        if let Ok(n) = cap[1].parse::<usize>() {
            if !seen.contains(&n) {
                seen.push(n);
            }
        }
    }
    seen
}

#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct DisabledCompletion;

#[async_trait]
impl Completion for DisabledCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("generation provider is disabled")
    }
}

/// OpenAI-compatible chat completion backend (works against OpenAI itself
/// or any server implementing the same `/chat/completions` shape, selected
/// via `generation.base_url`).
pub struct OpenAiCompletion {
    model: String,
    base_url: String,
    timeout_secs: u64,
}

impl OpenAiCompletion {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for openai provider"))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self {
            model,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Completion for OpenAiCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let resp = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!("generation backend error {}: {}", status, body_text);
        }

        let json: serde_json::Value = resp.json().await?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("malformed completion response"))
    }
}

pub fn create_completion(config: &GenerationConfig) -> Result<Box<dyn Completion>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledCompletion)),
        "openai" => Ok(Box::new(OpenAiCompletion::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RetrievalTier;

    fn item(text: &str) -> RetrievedItem {
        RetrievedItem {
            chunk_id: "c1".to_string(),
            document_id: "d1".to_string(),
            text: text.to_string(),
            source_path: "doc.md".to_string(),
            title: None,
            tier: RetrievalTier::Corpus,
            score: 1.0,
            ranking_method: "bm25".to_string(),
            citation: Some("Doc (2024). Title.".to_string()),
            content_type: "text/plain".to_string(),
        }
    }

    #[test]
    fn test_pack_context_fits_under_budget() {
        let items = vec![item("short text")];
        let packed = pack_context(&items, 100);
        assert_eq!(packed.len(), 1);
        assert_eq!(packed[0].index, 1);
    }

    #[test]
    fn test_pack_context_drops_sliver_truncation() {
        let long_text = "word ".repeat(1000);
        let items = vec![item(&long_text)];
        let packed = pack_context(&items, 2);
        assert!(packed.is_empty(), "8-char budget can't keep 80% of a huge chunk");
    }

    #[test]
    fn test_pack_context_truncates_at_sentence_boundary() {
        let text = "First sentence here. Second sentence that keeps going on and on and on and on.";
        let items = vec![item(text)];
        let packed = pack_context(&items, 10);
        if !packed.is_empty() {
            assert!(packed[0].text.len() <= text.len());
        }
    }

    #[test]
    fn test_build_prompt_includes_doc_markers() {
        let packed = vec![PackedDoc {
            index: 1,
            text: "content".to_string(),
            source_path: "doc.md".to_string(),
            content_type: "text/plain".to_string(),
        }];
        let prompt = build_prompt("What is X?", &packed, None);
        assert!(prompt.contains("[Doc 1] Source: doc.md"));
        assert!(prompt.contains("Type: text/plain"));
        assert!(prompt.contains("Content:\ncontent"));
        assert!(prompt.contains("What is X?"));
    }

    #[test]
    fn test_build_prompt_includes_user_context() {
        let packed = vec![PackedDoc {
            index: 1,
            text: "content".to_string(),
            source_path: "doc.md".to_string(),
            content_type: "text/plain".to_string(),
        }];
        let prompt = build_prompt("What is X?", &packed, Some("the user is a beginner"));
        assert!(prompt.contains("User context: the user is a beginner"));
    }

    #[test]
    fn test_extract_citations_dedups_in_order() {
        let answer = "See [Doc 2] and [Doc 1], also [Doc 2] again.";
        assert_eq!(extract_citations(answer), vec![2, 1]);
    }

    #[test]
    fn test_extract_citations_empty_when_none() {
        assert!(extract_citations("No citations here.").is_empty());
    }
}
