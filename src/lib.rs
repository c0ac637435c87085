//! # Context Harness
//!
//! **A local-first retrieval-augmented generation service over a library of
//! technical documents.**
//!
//! Context Harness ingests documents from local files and directories,
//! chunks and embeds them, and answers questions over the corpus by
//! combining keyword search, vector search, a persistent web knowledge
//! base, and (optionally) live web search — fused with reciprocal rank
//! fusion and handed to a completion backend for grounded, cited answers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Filesystem   │──▶│   Chunk +    │──▶│  SQLite   │
//! │  connector   │   │   Embed      │   │ FTS5+Vec  │
//! └──────────────┘   └──────────────┘   └─────┬─────┘
//!                                              │
//!                      ┌───────────────────────┼───────────────┐
//!                      ▼                       ▼               ▼
//!               ┌─────────────┐        ┌──────────────┐  ┌───────────┐
//!               │  Web search  │        │ Web knowledge │  │  Semantic │
//!               │  (live)      │        │     base      │  │   cache   │
//!               └──────┬───────┘        └──────┬───────┘  └─────┬─────┘
//!                      └───────────────┬────────┘                │
//!                                       ▼                         │
//!                          Reciprocal rank fusion ◀────────────────
//!                                       │
//!                                       ▼
//!                          Context packing + generation
//! ```
//!
//! ## Data Flow
//!
//! 1. The [`orchestrator`] ingests documents from a single file or a
//!    configured [`connector_fs`] tree, extracting binary formats via
//!    [`extract`].
//! 2. Documents are split into [`models::Chunk`]s by the structure-aware
//!    chunker ([`chunk`]), deduplicated against their prior content hash.
//! 3. Chunks are indexed in SQLite FTS5 ([`keyword_index`]) and, if an
//!    embedding provider is configured ([`embedding`]), in a cosine-scan
//!    vector index ([`vector_index`]) — optionally via a cheap-then-premium
//!    two-step re-rank ([`two_step_retriever`]).
//! 4. Queries fan out across the corpus, the [`web::kb`] knowledge base, and
//!    (if enabled) live web search via [`web::provider`], and are fused with
//!    [`hybrid_retriever`]'s reciprocal rank fusion.
//! 5. Fused context is packed under a token budget and handed to a
//!    [`generator::Completion`] backend, with answers memoized in a
//!    [`cache::SemanticCache`].
//! 6. All of the above is reachable from the **CLI** (`ctx`) and the
//!    **HTTP server** ([`server`]).
//!
//! ## Quick Start
//!
//! ```bash
//! ctx init                           # create database
//! ctx ingest ./docs --source docs    # ingest a directory
//! ctx query "how do I configure retries?"
//! ctx serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `SourceItem`, `Document`, `Chunk`, `RetrievedItem` |
//! | [`error`] | Error taxonomy shared across backends |
//! | [`connector_fs`] | Filesystem connector: walk local directories |
//! | [`extract`] | Text extraction for PDF/DOCX/PPTX/XLSX |
//! | [`chunk`] | Structure-aware Markdown and paragraph-boundary chunkers |
//! | [`embedding`] | Embedding provider trait, OpenAI/Ollama/local implementations |
//! | [`vector_index`] | Cosine-similarity vector search over SQLite |
//! | [`keyword_index`] | SQLite FTS5 (BM25) keyword search |
//! | [`two_step_retriever`] | Cheap local-space search reranked in premium embedding space |
//! | [`hybrid_retriever`] | Reciprocal rank fusion across retrieval tiers |
//! | [`web`] | Persistent web knowledge base and live web search providers |
//! | [`generator`] | Context packing, prompt construction, completion backends |
//! | [`cache`] | Semantic (embedding-similarity) answer cache |
//! | [`orchestrator`] | Wires every component into ingest/query/reconcile operations |
//! | [`get`] | Document retrieval by UUID |
//! | [`sources`] | Connector configuration and health listing |
//! | [`stats`] | Database statistics summary |
//! | [`server`] | HTTP server (Axum) exposing query/ingest/stats/health |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//!
//! ## Configuration
//!
//! Context Harness is configured via a TOML file (default: `config/ctx.toml`).
//! See [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod cache;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generator;
pub mod get;
pub mod hybrid_retriever;
pub mod keyword_index;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod sources;
pub mod stats;
pub mod server;
pub mod traits;
pub mod two_step_retriever;
pub mod vector_index;
pub mod web;
