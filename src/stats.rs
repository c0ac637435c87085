//! Database statistics and health overview.
//!
//! Provides a quick summary of what's indexed: document counts, chunk counts,
//! embedding coverage, and per-source breakdowns. Backs both `ctx stats` and
//! `GET /stats`.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Per-source breakdown of document and chunk counts.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub source: String,
    pub doc_count: i64,
    pub chunk_count: i64,
    pub embedded_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub total_documents: i64,
    pub total_chunks: i64,
    pub total_embedded: i64,
    pub by_source: Vec<SourceStats>,
}

/// Gather stats from an already-open pool. Used by the HTTP server, which
/// keeps a long-lived pool via the orchestrator rather than opening a new
/// one per request.
pub async fn collect_stats(pool: &SqlitePool) -> Result<StatsReport> {
    let total_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;

    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;

    let total_embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(pool)
        .await?;

    let source_rows = sqlx::query(
        r#"
        SELECT
            d.source,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(DISTINCT c.id) AS chunk_count,
            COUNT(DISTINCT cv.chunk_id) AS embedded_count
        FROM documents d
        LEFT JOIN chunks c ON c.document_id = d.id
        LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.id
        GROUP BY d.source
        ORDER BY doc_count DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let by_source = source_rows
        .iter()
        .map(|row| SourceStats {
            source: row.get("source"),
            doc_count: row.get("doc_count"),
            chunk_count: row.get("chunk_count"),
            embedded_count: row.get("embedded_count"),
        })
        .collect();

    Ok(StatsReport {
        total_documents,
        total_chunks,
        total_embedded,
        by_source,
    })
}

/// CLI entry point for `ctx stats`: opens its own pool, prints a formatted
/// summary to stdout.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let report = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Context Harness — Database Stats");
    println!("================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", report.total_documents);
    println!("  Chunks:      {}", report.total_chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        report.total_embedded,
        report.total_chunks,
        if report.total_chunks > 0 {
            (report.total_embedded * 100) / report.total_chunks
        } else {
            0
        }
    );

    if !report.by_source.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<24} {:>6} {:>8} {:>10}",
            "SOURCE", "DOCS", "CHUNKS", "EMBEDDED"
        );
        println!("  {}", "-".repeat(52));
        for s in &report.by_source {
            println!(
                "  {:<24} {:>6} {:>8} {:>10}",
                s.source, s.doc_count, s.chunk_count, s.embedded_count
            );
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
