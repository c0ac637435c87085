//! Core data models used throughout Context Harness.
//!
//! These types represent the documents, chunks, and search results that flow
//! through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};

/// Raw item produced by a connector before normalization.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content_type: String,
    pub body: String,
    pub metadata_json: String,
    pub raw_json: Option<String>,
    /// Set instead of `body` for binary formats (PDF/DOCX/PPTX/XLSX) that
    /// need extraction before they have usable text.
    pub raw_bytes: Option<Vec<u8>>,
}

/// Normalized document stored in SQLite.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub content_type: String,
    pub body: String,
    pub metadata_json: String,
    pub raw_json: Option<String>,
    pub dedup_hash: String,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
    /// One of `text`, `header`, `code_block`, `table_chunk`.
    pub section_type: String,
    /// Header depth (count of leading `#`), 0 if the chunk has no heading.
    pub section_level: i64,
    /// Byte offsets of this chunk's text within the document body.
    pub start_char: i64,
    pub end_char: i64,
}

/// A search result returned from the query engine.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct SearchResult {
    pub id: String,
    pub title: Option<String>,
    pub source: String,
    pub source_id: String,
    pub updated_at: i64,
    pub score: f64,
    pub snippet: String,
    pub source_url: Option<String>,
}

/// Which ranking tier produced a [`RetrievedItem`].
///
/// Tier weighting feeds reciprocal rank fusion: local corpus hits outrank web
/// knowledge base hits, which in turn outrank live web search snippets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalTier {
    Corpus,
    WebKb,
    LiveWeb,
}

impl RetrievalTier {
    /// Default RRF tier weight, per the corpus/web-kb/live-web ordering.
    pub fn weight(self) -> f64 {
        match self {
            RetrievalTier::Corpus => 1.0,
            RetrievalTier::WebKb => 0.9,
            RetrievalTier::LiveWeb => 0.7,
        }
    }
}

/// A single item surfaced by the hybrid retriever, regardless of which tier or
/// ranking method produced it. The `score` field is always populated by the
/// stage that emits the item — there is no fallback chain.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetrievedItem {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub source_path: String,
    pub title: Option<String>,
    pub tier: RetrievalTier,
    pub score: f64,
    pub ranking_method: String,
    pub citation: Option<String>,
    /// MIME-ish content type of the source document (e.g. `text/plain`,
    /// `text/html`), rendered into the generator prompt as `Type:`.
    pub content_type: String,
}

/// A document fetched from the web and persisted into the web knowledge base.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct WebDocument {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<i64>,
    pub text: String,
    pub content_hash: String,
    pub trust_score: f64,
    pub fetched_at: i64,
    pub expires_at: i64,
    pub times_retrieved: i64,
    pub last_retrieved_at: i64,
}

impl WebDocument {
    /// APA-style citation, falling back to `"(n.d.)."` when no publication
    /// year is known.
    pub fn citation(&self) -> String {
        let author = self.author.as_deref().unwrap_or("Unknown");
        let title = self.title.as_deref().unwrap_or(&self.url);
        let year = self
            .published_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y").to_string());
        match year {
            Some(year) => format!(
                "{author} ({year}). {title}. Retrieved from {url}",
                url = self.url
            ),
            None => format!(
                "{author} (n.d.). {title}. Retrieved from {url}",
                url = self.url
            ),
        }
    }
}

/// A cached query/answer pair in the semantic cache.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct CacheEntry {
    pub id: String,
    pub query_text: String,
    pub answer_json: String,
    /// Serialized `Vec<RetrievedItem>` the answer was generated from, stored
    /// so a cache hit can return the same sources without re-retrieving.
    pub sources_json: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub hit_count: i64,
}
