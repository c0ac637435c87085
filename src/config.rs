//! Configuration parsing and validation.
//!
//! Context Harness is configured via a TOML file (default: `config/ctx.toml`).
//! The config defines database paths, chunking parameters, embedding provider
//! settings, retrieval tuning, web knowledge base and semantic cache policy,
//! generation settings, server bind address, and the filesystem connector.
//!
//! # Connectors
//!
//! Only the filesystem connector (`[connectors.filesystem]`) is supported —
//! documents are ingested from a local directory tree.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[allow(dead_code)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    /// `"markdown"` enables header/code-fence-aware structural chunking;
    /// `"generic"` falls back to paragraph-based splitting.
    #[serde(default = "default_chunk_mode")]
    pub mode: String,
}

fn default_overlap() -> usize {
    0
}

fn default_chunk_mode() -> String {
    "markdown".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    #[serde(default = "default_group_by")]
    #[allow(dead_code)]
    pub group_by: String,
    #[serde(default = "default_doc_agg")]
    #[allow(dead_code)]
    pub doc_agg: String,
    #[serde(default = "default_max_chunks_per_doc")]
    #[allow(dead_code)]
    pub max_chunks_per_doc: usize,
    /// Whether two-step retrieval re-embeds candidates in the premium space.
    #[serde(default)]
    pub two_step_enabled: bool,
    /// Candidate count passed from the cheap local-space pass into the
    /// premium rerank.
    #[serde(default = "default_two_step_candidates")]
    pub two_step_candidates: i64,
    /// RRF damping constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_true")]
    pub web_search_enabled: bool,
    #[serde(default = "default_true")]
    pub web_kb_enabled: bool,
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}
fn default_group_by() -> String {
    "document".to_string()
}
fn default_doc_agg() -> String {
    "max".to_string()
}
fn default_max_chunks_per_doc() -> usize {
    3
}
fn default_two_step_candidates() -> i64 {
    50
}
fn default_rrf_k() -> f64 {
    60.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional path to a binary little-endian f32 alignment matrix used to
    /// project local-space vectors into the premium embedding space.
    #[serde(default)]
    pub alignment_matrix_path: Option<PathBuf>,
    /// Base URL for providers that talk to a local/self-hosted endpoint
    /// (currently only `"ollama"`). Defaults to `http://localhost:11434`.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            alignment_matrix_path: None,
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub filesystem: Option<FilesystemConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

fn default_true() -> bool {
    true
}

/// Live web search / fetch policy.
#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_web_provider")]
    pub snippet_provider: String,
    #[serde(default = "default_web_provider")]
    pub extractor_provider: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
    #[serde(default = "default_min_trust_score")]
    pub min_trust_score: f64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Top local-corpus score below which `web_mode = "on_low_confidence"`
    /// fires a live web search.
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            snippet_provider: default_web_provider(),
            extractor_provider: default_web_provider(),
            max_results: default_max_results(),
            ttl_days: default_ttl_days(),
            min_trust_score: default_min_trust_score(),
            requests_per_minute: default_requests_per_minute(),
            low_confidence_threshold: default_low_confidence_threshold(),
        }
    }
}

fn default_web_provider() -> String {
    "disabled".to_string()
}
fn default_max_results() -> usize {
    5
}
fn default_ttl_days() -> i64 {
    7
}
fn default_min_trust_score() -> f64 {
    0.0
}
fn default_requests_per_minute() -> u32 {
    20
}
fn default_low_confidence_threshold() -> f64 {
    0.5
}

/// Semantic cache policy.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: default_cache_threshold(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_threshold() -> f64 {
    0.92
}
fn default_cache_ttl_secs() -> i64 {
    3600
}

/// Answer generation (completion) settings.
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            base_url: None,
            max_context_tokens: default_max_context_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_context_tokens() -> usize {
    3000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    match config.chunking.mode.as_str() {
        "markdown" | "generic" => {}
        other => anyhow::bail!(
            "Unknown chunking.mode: '{}'. Must be markdown or generic.",
            other
        ),
    }

    // Validate retrieval
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    // Validate cache
    if !(0.0..=1.0).contains(&config.cache.similarity_threshold) {
        anyhow::bail!("cache.similarity_threshold must be in [0.0, 1.0]");
    }

    // Validate web
    if !(0.0..=1.0).contains(&config.web.min_trust_score) {
        anyhow::bail!("web.min_trust_score must be in [0.0, 1.0]");
    }
    if config.web.low_confidence_threshold < 0.0 {
        anyhow::bail!("web.low_confidence_threshold must be >= 0.0");
    }

    Ok(config)
}
