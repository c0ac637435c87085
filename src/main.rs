//! # Context Harness
//!
//! A local-first retrieval-augmented generation service over a library of
//! technical documents.
//!
//! ```text
//! Filesystem / single file → Orchestrator → Chunk + Embed → SQLite → Query (RRF + generation) → CLI / HTTP
//! ```
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation
//! - [`models`] — Core data types
//! - [`connector_fs`] — Filesystem connector: walk local directories
//! - [`extract`] — PDF/DOCX/PPTX/XLSX text extraction
//! - [`chunk`] — Structure-aware chunkers
//! - [`embedding`] — Embedding providers and vector utilities
//! - [`orchestrator`] — Ingest/query/reconcile operations
//! - [`get`] — Document retrieval by ID
//! - [`sources`] — Connector health/status listing
//! - [`stats`] — Database statistics
//! - [`server`] — HTTP server (Axum)
//! - [`db`] — SQLite connection management
//! - [`migrate`] — Database schema migrations

mod cache;
mod chunk;
mod config;
mod connector_fs;
mod db;
mod embedding;
mod error;
mod extract;
mod generator;
mod get;
mod hybrid_retriever;
mod keyword_index;
mod migrate;
mod models;
mod orchestrator;
mod progress;
mod server;
mod sources;
mod stats;
mod traits;
mod two_step_retriever;
mod vector_index;
mod web;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use orchestrator::{Orchestrator, QueryOptions, WebMode};

#[derive(Parser)]
#[command(
    name = "ctx",
    about = "Context Harness — a local-first retrieval-augmented generation service",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/ctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// List configured connectors and their health
    Sources,

    /// Ingest a single file or a configured connector tree
    Ingest {
        /// Path to a file to ingest. Mutually exclusive with `--connector`.
        path: Option<PathBuf>,

        /// Name of a configured `[connectors.filesystem.<name>]` instance.
        #[arg(long)]
        connector: Option<String>,

        /// Source label recorded for single-file ingestion.
        #[arg(long, default_value = "cli")]
        source: String,

        /// Reingest even if content is unchanged.
        #[arg(long)]
        force: bool,
    },

    /// Retrieve a document by ID
    Get {
        /// Document ID (UUID)
        id: String,
    },

    /// Ask a question over the ingested corpus
    Query {
        /// The question to ask
        question: String,

        /// Number of results to retrieve (overrides the configured default).
        #[arg(long)]
        top_k: Option<i64>,

        /// Skip the semantic cache for this query.
        #[arg(long)]
        no_cache: bool,

        /// Allow a live web search to supplement the corpus for this query.
        #[arg(long)]
        web: bool,
    },

    /// Sweep expired web knowledge base and cache entries
    Reconcile,

    /// Print database statistics
    Stats,

    /// Start the HTTP server
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Ingest {
            path,
            connector,
            source,
            force,
        } => {
            let orchestrator = Orchestrator::new(cfg).await?;
            match (path, connector) {
                (Some(path), _) => {
                    let outcome = orchestrator.ingest_document(&path, &source, force).await?;
                    if outcome.skipped_unchanged {
                        println!("unchanged, skipped: {}", outcome.document_id);
                    } else {
                        println!(
                            "ingested {} ({} chunks, {} embedded, {} pending)",
                            outcome.document_id,
                            outcome.chunks_written,
                            outcome.embeddings_written,
                            outcome.embeddings_pending
                        );
                    }
                }
                (None, Some(name)) => {
                    let outcome = orchestrator.ingest_directory(&name, force).await?;
                    println!(
                        "scanned {} documents: {} ingested, {} unchanged, {} failed ({} chunks written)",
                        outcome.documents_scanned,
                        outcome.documents_ingested,
                        outcome.documents_skipped,
                        outcome.documents_failed,
                        outcome.chunks_written
                    );
                }
                (None, None) => {
                    anyhow::bail!("specify either a file path or --connector <name>");
                }
            }
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Query { question, top_k, no_cache, web } => {
            let orchestrator = Orchestrator::new(cfg).await?;
            let opts = QueryOptions {
                top_k,
                use_cache: !no_cache,
                enable_web_search: web,
                web_mode: WebMode::OnLowConfidence,
                embedder_type: None,
                user_context: None,
            };
            let response = orchestrator.query(&question, opts).await?;

            if let Some(answer) = &response.answer {
                println!("{answer}");
                if !response.citations.is_empty() {
                    println!();
                    println!("Cited: {:?}", response.citations);
                }
            } else {
                println!("--- Retrieved ({}) ---", response.retrieved.len());
                for item in &response.retrieved {
                    println!(
                        "[{:?} {:.4}] {} ({})",
                        item.tier, item.score, item.source_path, item.ranking_method
                    );
                    println!("{}", item.text);
                    println!();
                }
            }
        }
        Commands::Reconcile => {
            let orchestrator = Orchestrator::new(cfg).await?;
            let report = orchestrator.reconcile().await?;
            println!(
                "purged {} expired web documents, {} expired cache entries",
                report.web_documents_purged, report.cache_entries_purged
            );
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
