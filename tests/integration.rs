//! End-to-end CLI tests driving the `ctx` binary against a temp config,
//! temp corpus, and temp SQLite database.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ctx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ctx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    ).unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    ).unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    ).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ctx.sqlite"

[chunking]
max_tokens = 700
overlap_tokens = 80

[retrieval]
final_limit = 12
web_search_enabled = false
web_kb_enabled = false

[server]
bind = "127.0.0.1:7331"

[connectors.filesystem]
root = "{}/files"
include_globs = ["**/*.md", "**/*.txt"]
exclude_globs = []
follow_symlinks = false
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("ctx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ctx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ctx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ctx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ctx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_ctx(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ctx(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_directory() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ctx(&config_path, &["ingest", "--connector", "docs"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("scanned 3 documents"), "{}", stdout);
    assert!(stdout.contains("3 ingested"), "{}", stdout);
}

#[test]
fn test_ingest_directory_idempotent_no_duplicates() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);

    let (stdout1, _, _) = run_ctx(&config_path, &["ingest", "--connector", "docs"]);
    assert!(stdout1.contains("3 ingested"));

    // Second run without changes: content hash is unchanged, so everything is skipped.
    let (stdout2, _, _) = run_ctx(&config_path, &["ingest", "--connector", "docs"]);
    assert!(stdout2.contains("3 unchanged"), "{}", stdout2);
    assert!(stdout2.contains("0 ingested"), "{}", stdout2);
}

#[test]
fn test_ingest_directory_force_reingests() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    run_ctx(&config_path, &["ingest", "--connector", "docs"]);

    let (stdout, _, success) = run_ctx(&config_path, &["ingest", "--connector", "docs", "--force"]);
    assert!(success);
    assert!(stdout.contains("3 ingested"), "{}", stdout);
}

#[test]
fn test_ingest_single_file() {
    let (tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let file = tmp.path().join("files").join("alpha.md");
    let (stdout, stderr, success) = run_ctx(
        &config_path,
        &["ingest", file.to_str().unwrap(), "--source", "manual"],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingested"), "{}", stdout);
}

#[test]
fn test_ingest_single_file_then_reingest_unchanged_skips() {
    let (tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let file = tmp.path().join("files").join("alpha.md");
    run_ctx(&config_path, &["ingest", file.to_str().unwrap()]);

    let (stdout, _, success) = run_ctx(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("unchanged, skipped"), "{}", stdout);
}

#[test]
fn test_ingest_without_path_or_connector_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (_, stderr, success) = run_ctx(&config_path, &["ingest"]);
    assert!(!success, "ingest with neither path nor connector should fail");
    assert!(stderr.contains("connector"), "{}", stderr);
}

#[test]
fn test_ingest_missing_file_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (_, stderr, success) = run_ctx(&config_path, &["ingest", "/nonexistent/file.md"]);
    assert!(!success);
    assert!(stderr.contains("does not exist"), "{}", stderr);
}

#[test]
fn test_query_keyword_retrieval() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    run_ctx(&config_path, &["ingest", "--connector", "docs"]);

    let (stdout, _, success) = run_ctx(&config_path, &["query", "Rust programming"]);
    assert!(success, "query failed");
    assert!(
        stdout.contains("alpha.md") || stdout.contains("Alpha"),
        "Expected alpha.md in results, got: {}",
        stdout
    );
}

#[test]
fn test_query_deterministic() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    run_ctx(&config_path, &["ingest", "--connector", "docs"]);

    let (stdout1, _, _) = run_ctx(&config_path, &["query", "document"]);
    let (stdout2, _, _) = run_ctx(&config_path, &["query", "document"]);
    assert_eq!(
        stdout1, stdout2,
        "Keyword-only query results should be deterministic across runs"
    );
}

#[test]
fn test_query_no_results_on_empty_corpus() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (stdout, _, success) = run_ctx(&config_path, &["query", "xyznonexistent"]);
    assert!(success);
    assert!(stdout.contains("Retrieved (0)"), "{}", stdout);
}

#[tokio::test]
async fn test_get_document() {
    let (tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    run_ctx(&config_path, &["ingest", "--connector", "docs"]);

    let db_path = tmp.path().join("data").join("ctx.sqlite");
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite:{}", db_path.display()))
        .await
        .unwrap();
    let doc_id: String = sqlx::query_scalar("SELECT id FROM documents LIMIT 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    pool.close().await;

    let (stdout, _, success) = run_ctx(&config_path, &["get", &doc_id]);
    assert!(success, "get should succeed for a known document id");
    assert!(stdout.contains(&doc_id));
}

#[test]
fn test_get_missing_document_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);

    let (_, stderr, success) = run_ctx(&config_path, &["get", "nonexistent-id"]);
    assert!(!success, "get with missing ID should fail");
    assert!(stderr.contains("not found") || !stderr.is_empty());
}

#[test]
fn test_sources_lists_filesystem_connector() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_ctx(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("filesystem"));
}

#[test]
fn test_stats_reports_counts() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    run_ctx(&config_path, &["ingest", "--connector", "docs"]);

    let (stdout, _, success) = run_ctx(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:"));
    assert!(stdout.contains("Chunks:"));
}

#[test]
fn test_reconcile_runs_cleanly() {
    let (_tmp, config_path) = setup_test_env();

    run_ctx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ctx(&config_path, &["reconcile"]);
    assert!(success, "reconcile failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("purged"));
}

#[test]
fn test_unknown_config_path_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("does-not-exist.toml");
    let (_, stderr, success) = run_ctx(&missing, &["sources"]);
    assert!(!success);
    assert!(stderr.contains("config file") || !stderr.is_empty());
}
