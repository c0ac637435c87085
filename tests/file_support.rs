//! Integration tests for PDF and Office (DOCX) ingestion through the real
//! `ctx` binary: extraction, idempotent re-ingest, failure skipping, and
//! stored content-type.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn ctx_binary() -> std::path::PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("ctx");
    path
}

/// Minimal valid single-page PDF containing the given phrase, with correct
/// xref byte offsets so `pdf-extract` can parse it.
fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    let stream = format!("BT /F1 12 Tf 100 700 Td ({phrase}) Tj ET\n");
    out.extend_from_slice(format!("4 0 obj << /Length {} >> stream\n{}endstream endobj\n", stream.len(), stream).as_bytes());
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Minimal docx (a ZIP containing `word/document.xml`) with the given text
/// in a single run.
fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn setup_env() -> (TempDir, std::path::PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();

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
bind = "127.0.0.1:7332"

[connectors.filesystem]
root = "{}/files"
include_globs = ["**/*.md", "**/*.txt", "**/*.pdf", "**/*.docx"]
exclude_globs = []
follow_symlinks = false
"#,
        root.display(),
        root.display(),
    );

    fs::write(root.join("config").join("ctx.toml"), config_content).unwrap();
    fs::write(files_dir.join("readme.md"), "# Readme\n\nPlain text file for tests.\n").unwrap();

    (tmp, root.join("config").join("ctx.toml"))
}

fn run_ctx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ctx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ctx: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn docx_ingest_and_query() {
    let (tmp, config_path) = setup_env();
    let files_dir = tmp.path().join("files");
    fs::write(files_dir.join("office.docx"), minimal_docx_with_text("office test phrase")).unwrap();

    run_ctx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ctx(&config_path, &["ingest", "--connector", "docs"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 ingested"), "{}", stdout);

    let (query_out, _, success) = run_ctx(&config_path, &["query", "office test phrase"]);
    assert!(success, "query failed");
    assert!(
        query_out.contains("office test phrase") || query_out.contains("office.docx"),
        "query should surface the phrase or filename, got: {}",
        query_out
    );
}

#[test]
fn docx_idempotent_reingest() {
    let (tmp, config_path) = setup_env();
    let files_dir = tmp.path().join("files");
    fs::write(files_dir.join("office.docx"), minimal_docx_with_text("repeat me")).unwrap();

    run_ctx(&config_path, &["init"]);
    let (stdout1, _, _) = run_ctx(&config_path, &["ingest", "--connector", "docs"]);
    assert!(stdout1.contains("2 ingested"), "{}", stdout1);

    let (stdout2, _, _) = run_ctx(&config_path, &["ingest", "--connector", "docs"]);
    assert!(stdout2.contains("2 unchanged"), "{}", stdout2);
    assert!(stdout2.contains("0 ingested"), "{}", stdout2);
}

#[test]
fn corrupt_pdf_is_skipped_without_failing_the_rest() {
    let (tmp, config_path) = setup_env();
    let files_dir = tmp.path().join("files");
    fs::write(files_dir.join("bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(files_dir.join("good.md"), "# Good\n\nThis is good.\n").unwrap();

    run_ctx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ctx(&config_path, &["ingest", "--connector", "docs"]);
    assert!(success, "ingest must still succeed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1 failed"), "{}", stdout);
    assert!(stdout.contains("2 ingested"), "good.md and readme.md: {}", stdout);
}

#[tokio::test]
async fn pdf_content_type_is_stored() {
    let (tmp, config_path) = setup_env();
    let files_dir = tmp.path().join("files");
    fs::write(files_dir.join("doc.pdf"), minimal_pdf_with_phrase("hello pdf world")).unwrap();

    run_ctx(&config_path, &["init"]);
    run_ctx(&config_path, &["ingest", "--connector", "docs"]);

    let db_path = tmp.path().join("data").join("ctx.sqlite");
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite:{}", db_path.display()))
        .await
        .unwrap();
    let content_type: String =
        sqlx::query_scalar("SELECT content_type FROM documents WHERE source_id LIKE '%.pdf'")
            .fetch_one(&pool)
            .await
            .unwrap();
    pool.close().await;

    assert_eq!(content_type, "application/pdf");
}

#[test]
fn single_pdf_file_ingest_via_path() {
    let (tmp, config_path) = setup_env();
    let pdf_path = tmp.path().join("files").join("single.pdf");
    fs::write(&pdf_path, minimal_pdf_with_phrase("direct ingest phrase")).unwrap();

    run_ctx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ctx(&config_path, &["ingest", pdf_path.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingested"), "{}", stdout);
}
