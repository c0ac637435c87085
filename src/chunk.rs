//! Structure-aware text chunker.
//!
//! Two modes, selected by `chunking.mode`:
//!
//! - **`markdown`** — splits on header boundaries first, then treats each
//!   header's section as a unit. A section is kept atomic (never split) when
//!   it is a fenced code block or already fits within `max_tokens`; oversized
//!   sections are split sentence-aware with overlap, and table sections keep
//!   their header row on every resulting piece.
//! - **`generic`** — paragraph-boundary splitting (`\n\n`), used for plain
//!   text where no header structure exists.
//!
//! Each chunk's ID is a deterministic UUID derived from `md5(source_path ++
//! ":" ++ chunk_index)`, so re-ingesting an unchanged document reproduces the
//! same chunk IDs and re-ingesting a changed document only disturbs the
//! chunks whose content actually shifted. A SHA-256 hash of the chunk text is
//! also stored, to detect staleness against previously embedded content.
//!
//! Each chunk also carries `section_type`/`section_level` (derived from the
//! markdown structure that produced it) and `start_char`/`end_char` (byte
//! offsets into the document body), so downstream consumers can map a chunk
//! back to its position in the source without re-scanning it.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio used when `mode = "generic"`.
const CHARS_PER_TOKEN: usize = 4;

/// Split a document's body into chunks according to `mode`.
pub fn chunk_document(
    source_path: &str,
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
    mode: &str,
) -> Vec<Chunk> {
    match mode {
        "markdown" => chunk_markdown(source_path, document_id, text, max_tokens, overlap_tokens),
        _ => chunk_text(source_path, document_id, text, max_tokens),
    }
}

/// Derive a chunk's ID deterministically from its source path and index, so
/// repeated ingestion of unchanged content produces stable IDs.
fn make_chunk_id(source_path: &str, chunk_index: i64) -> String {
    let key = format!("{source_path}:{chunk_index}");
    let digest = md5::compute(key.as_bytes());
    Uuid::from_bytes(digest.0).to_string()
}

#[allow(clippy::too_many_arguments)]
fn make_chunk(
    source_path: &str,
    document_id: &str,
    index: i64,
    text: &str,
    section_type: &str,
    section_level: i64,
    start_char: i64,
    end_char: i64,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: make_chunk_id(source_path, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
        section_type: section_type.to_string(),
        section_level,
        start_char,
        end_char,
    }
}

/// Paragraph-boundary chunking for non-structured text.
pub fn chunk_text(source_path: &str, document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;

    if text.is_empty() {
        return vec![make_chunk(source_path, document_id, 0, text, "text", 0, 0, 0)];
    }

    // `split("\n\n")` is lossless: each paragraph's start is the previous
    // paragraph's end plus the two-byte delimiter, so offsets can be tracked
    // without re-scanning the original text.
    let mut paragraphs: Vec<(&str, usize, usize)> = Vec::new();
    let mut cursor = 0usize;
    for para in text.split("\n\n") {
        let start = cursor;
        let end = start + para.len();
        paragraphs.push((para, start, end));
        cursor = end + 2;
    }

    let mut chunks = Vec::new();
    let mut current_buf = String::new();
    let mut current_start: usize = 0;
    let mut current_end: usize = 0;
    let mut chunk_index: i64 = 0;

    for (para, para_start, _para_end) in paragraphs {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let leading_ws = para.len() - para.trim_start().len();
        let trimmed_start = para_start + leading_ws;
        let trimmed_end = trimmed_start + trimmed.len();

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            chunks.push(make_chunk(
                source_path,
                document_id,
                chunk_index,
                &current_buf,
                "text",
                0,
                current_start as i64,
                current_end as i64,
            ));
            chunk_index += 1;
            current_buf.clear();
        }

        if trimmed.len() > max_chars {
            if !current_buf.is_empty() {
                chunks.push(make_chunk(
                    source_path,
                    document_id,
                    chunk_index,
                    &current_buf,
                    "text",
                    0,
                    current_start as i64,
                    current_end as i64,
                ));
                chunk_index += 1;
                current_buf.clear();
            }
            let mut remaining = trimmed;
            let mut remaining_start = trimmed_start;
            while !remaining.is_empty() {
                let split_at = remaining.len().min(max_chars);
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let piece = &remaining[..actual_split];
                let piece_trimmed = piece.trim();
                let piece_leading = piece.len() - piece.trim_start().len();
                let piece_start = remaining_start + piece_leading;
                let piece_end = piece_start + piece_trimmed.len();
                chunks.push(make_chunk(
                    source_path,
                    document_id,
                    chunk_index,
                    piece_trimmed,
                    "text",
                    0,
                    piece_start as i64,
                    piece_end as i64,
                ));
                chunk_index += 1;
                remaining_start += actual_split;
                remaining = &remaining[actual_split..];
            }
        } else {
            if current_buf.is_empty() {
                current_start = trimmed_start;
            }
            current_end = trimmed_end;
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        chunks.push(make_chunk(
            source_path,
            document_id,
            chunk_index,
            &current_buf,
            "text",
            0,
            current_start as i64,
            current_end as i64,
        ));
    }

    if chunks.is_empty() {
        let trimmed = text.trim();
        chunks.push(make_chunk(source_path, document_id, 0, trimmed, "text", 0, 0, trimmed.len() as i64));
    }

    chunks
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Prose,
    Code,
    Table,
}

struct Section {
    /// Header line that opened this section, if any (kept as context when
    /// the section is split into multiple chunks).
    heading: Option<String>,
    body: String,
    kind: SectionKind,
    /// Byte offset of `body`'s first line (the heading line, when present)
    /// within the original document text.
    start: usize,
    /// Byte offset one past the section's last line within the original text.
    end: usize,
}

/// Header-aware split: a line matching `^#{1,6}\s+` starts a new section.
/// Lines inside a fenced code block (toggled by a line of ```) never start a
/// new section even if they happen to look like a header.
fn split_into_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut heading: Option<String> = None;
    let mut body_lines: Vec<&str> = Vec::new();
    let mut in_code_fence = false;
    let mut section_has_code = false;
    let mut section_only_code = true;
    let mut section_start: usize = 0;

    #[allow(clippy::too_many_arguments)]
    fn flush(
        heading: &mut Option<String>,
        body_lines: &mut Vec<&str>,
        section_has_code: &mut bool,
        section_only_code: &mut bool,
        section_start: &mut usize,
        end: usize,
        sections: &mut Vec<Section>,
    ) {
        let body = body_lines.join("\n");
        if !body.trim().is_empty() || heading.is_some() {
            let is_table = body.lines().filter(|l| l.trim_start().starts_with('|')).count() >= 2;
            let kind = if *section_has_code && *section_only_code {
                SectionKind::Code
            } else if is_table {
                SectionKind::Table
            } else {
                SectionKind::Prose
            };
            sections.push(Section {
                heading: heading.take(),
                body,
                kind,
                start: *section_start,
                end,
            });
        }
        body_lines.clear();
        *section_has_code = false;
        *section_only_code = true;
    }

    // Line offsets are computed up front so the main scan can stay focused on
    // header/fence detection rather than byte bookkeeping.
    let mut lines_with_pos: Vec<(&str, usize)> = Vec::new();
    let mut pos = 0usize;
    for line in text.lines() {
        lines_with_pos.push((line, pos));
        pos += line.len() + 1;
    }
    let mut cursor = pos;
    if let Some(&(last, last_start)) = lines_with_pos.last() {
        cursor = last_start + last.len();
    }

    for &(line, line_start) in &lines_with_pos {
        let line_end = line_start + line.len();
        cursor = line_end;
        let is_fence_delim = line.trim_start().starts_with("```");
        if is_fence_delim {
            in_code_fence = !in_code_fence;
            section_has_code = true;
            body_lines.push(line);
            continue;
        }

        if !in_code_fence && is_markdown_header(line) {
            flush(
                &mut heading,
                &mut body_lines,
                &mut section_has_code,
                &mut section_only_code,
                &mut section_start,
                line_start,
                &mut sections,
            );
            section_start = line_start;
            heading = Some(line.trim().to_string());
            body_lines.push(line);
            continue;
        }

        if line.trim().is_empty() {
            section_only_code = false;
        } else if !in_code_fence {
            section_only_code = false;
        }
        body_lines.push(line);
    }

    flush(
        &mut heading,
        &mut body_lines,
        &mut section_has_code,
        &mut section_only_code,
        &mut section_start,
        cursor,
        &mut sections,
    );

    sections
}

fn is_markdown_header(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && trimmed.as_bytes().get(hashes) == Some(&b' ')
}

/// Scan `body` for the first markdown table header row (`| ... |`) and the
/// separator row that follows it (`|---|...`), returning both joined by a
/// newline, or an empty string if no table header is found.
fn find_table_header(body: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    for i in 0..lines.len() {
        if lines[i].trim_start().starts_with('|')
            && lines.get(i + 1).map(|l| is_separator_row(l)).unwrap_or(false)
        {
            return format!("{}\n{}", lines[i], lines[i + 1]);
        }
    }
    String::new()
}

/// A markdown table separator row: a `|`-delimited line whose every cell
/// consists solely of `-`/`:` characters (e.g. `|---|:--:|`).
fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.starts_with('|') {
        return false;
    }
    let body = trimmed.trim_matches('|');
    if body.is_empty() {
        return false;
    }
    body.split('|').all(|cell| {
        let cell = cell.trim();
        !cell.is_empty() && cell.chars().all(|c| c == '-' || c == ':')
    })
}

/// Markdown-aware chunking: split into header-bounded sections, keep code
/// blocks and already-small sections atomic, and sentence-split oversized
/// sections with word-level overlap.
pub fn chunk_markdown(
    source_path: &str,
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return vec![make_chunk(source_path, document_id, 0, text, "text", 0, 0, 0)];
    }

    let sections = split_into_sections(text);
    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;

    for section in sections {
        let word_count = section.body.split_whitespace().count();
        let atomic = section.kind == SectionKind::Code || word_count <= max_tokens;
        let section_level = section
            .heading
            .as_deref()
            .map(|h| h.trim_start().chars().take_while(|c| *c == '#').count() as i64)
            .unwrap_or(0);

        if atomic {
            let leading_ws = section.body.len() - section.body.trim_start().len();
            let piece = section.body.trim();
            if !piece.is_empty() {
                let start_char = section.start + leading_ws;
                let end_char = start_char + piece.len();
                let section_type = if section.kind == SectionKind::Code {
                    "code_block"
                } else if section.kind == SectionKind::Table {
                    "table_chunk"
                } else if section.heading.as_deref() == Some(piece) {
                    // Two consecutive headers with no body: this section is
                    // nothing but the heading line itself.
                    "header"
                } else {
                    "text"
                };
                chunks.push(make_chunk(
                    source_path,
                    document_id,
                    chunk_index,
                    piece,
                    section_type,
                    section_level,
                    start_char as i64,
                    end_char as i64,
                ));
                chunk_index += 1;
            }
            continue;
        }

        let table_header = if section.kind == SectionKind::Table {
            find_table_header(&section.body)
        } else {
            String::new()
        };
        let section_type = if section.kind == SectionKind::Table { "table_chunk" } else { "text" };

        let pieces = split_sentences_with_overlap(&section.body, max_tokens, overlap_tokens);
        for piece in pieces {
            let mut full = String::new();
            if let Some(h) = &section.heading {
                full.push_str(h);
                full.push('\n');
            }
            if section.kind == SectionKind::Table && !table_header.is_empty() {
                full.push_str(&table_header);
                full.push('\n');
            }
            full.push_str(piece.text.trim());
            let start_char = section.start + piece.start;
            let end_char = section.start + piece.end;
            chunks.push(make_chunk(
                source_path,
                document_id,
                chunk_index,
                full.trim(),
                section_type,
                section_level,
                start_char as i64,
                end_char as i64,
            ));
            chunk_index += 1;
        }
    }

    if chunks.is_empty() {
        let trimmed = text.trim();
        chunks.push(make_chunk(source_path, document_id, 0, trimmed, "text", 0, 0, trimmed.len() as i64));
    }

    chunks
}

/// A word-split piece of a section body, with its byte offsets within that
/// body so the caller can translate them into document-absolute offsets.
struct Piece {
    text: String,
    start: usize,
    end: usize,
}

/// Split body text into word-bounded pieces of at most `max_tokens` words,
/// preferring sentence boundaries, with `overlap_tokens` words repeated at
/// the start of each piece after the first.
fn split_sentences_with_overlap(body: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<Piece> {
    let sentences = split_sentences(body);
    let mut pieces = Vec::new();
    let mut current_words: Vec<(&str, usize, usize)> = Vec::new();

    for (sentence, sent_start, _sent_end) in &sentences {
        let sentence_words = words_with_offsets(sentence, *sent_start);
        if !current_words.is_empty() && current_words.len() + sentence_words.len() > max_tokens {
            push_piece(&mut pieces, &current_words);
            let keep_from = current_words.len().saturating_sub(overlap_tokens);
            current_words = current_words[keep_from..].to_vec();
        }
        current_words.extend(sentence_words);

        // A single sentence longer than max_tokens still gets hard-split.
        while current_words.len() > max_tokens {
            let piece_words: Vec<(&str, usize, usize)> = current_words.drain(..max_tokens).collect();
            push_piece(&mut pieces, &piece_words);
            let keep_from = piece_words.len().saturating_sub(overlap_tokens);
            let mut carry: Vec<(&str, usize, usize)> = piece_words[keep_from..].to_vec();
            carry.extend(current_words.drain(..));
            current_words = carry;
        }
    }

    if !current_words.is_empty() {
        push_piece(&mut pieces, &current_words);
    }

    if pieces.is_empty() {
        let trimmed = body.trim();
        let leading = body.len() - body.trim_start().len();
        pieces.push(Piece {
            text: trimmed.to_string(),
            start: leading,
            end: leading + trimmed.len(),
        });
    }

    pieces
}

fn push_piece(pieces: &mut Vec<Piece>, words: &[(&str, usize, usize)]) {
    if words.is_empty() {
        return;
    }
    let text = words.iter().map(|(w, _, _)| *w).collect::<Vec<_>>().join(" ");
    let start = words.first().unwrap().1;
    let end = words.last().unwrap().2;
    pieces.push(Piece { text, start, end });
}

/// Split `text` into whitespace-delimited words, each tagged with its byte
/// offset relative to `base_offset` (the position of `text` within the
/// larger body it was sliced from).
fn words_with_offsets(text: &str, base_offset: usize) -> Vec<(&str, usize, usize)> {
    let mut result = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start {
                result.push((&text[s..i], base_offset + s, base_offset + i));
                start = None;
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        result.push((&text[s..], base_offset + s, base_offset + text.len()));
    }
    result
}

/// Naive sentence splitter: breaks after `.`, `!`, or `?` followed by
/// whitespace. Good enough for overlap bookkeeping; not meant to handle
/// abbreviations perfectly. Returns each sentence with its byte offsets
/// within `text`.
fn split_sentences(text: &str) -> Vec<(String, usize, usize)> {
    let mut sentences = Vec::new();
    let indices: Vec<(usize, char)> = text.char_indices().collect();
    let mut seg_start = 0usize;

    for (pos, &(byte_idx, c)) in indices.iter().enumerate() {
        if c == '.' || c == '!' || c == '?' {
            let next_is_ws = indices.get(pos + 1).map(|&(_, c2)| c2.is_whitespace()).unwrap_or(true);
            if next_is_ws {
                let end = byte_idx + c.len_utf8();
                push_sentence(&mut sentences, text, seg_start, end);
                seg_start = end;
            }
        }
    }
    if seg_start < text.len() {
        push_sentence(&mut sentences, text, seg_start, text.len());
    }

    sentences
}

fn push_sentence(sentences: &mut Vec<(String, usize, usize)>, text: &str, start: usize, end: usize) {
    let span = &text[start..end];
    let trimmed = span.trim();
    if trimmed.is_empty() {
        return;
    }
    let leading = span.len() - span.trim_start().len();
    let s = start + leading;
    sentences.push((trimmed.to_string(), s, s + trimmed.len()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1.md", "doc1", "Hello, world!", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].start_char, 0);
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("doc1.md", "doc1", "", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text("doc1.md", "doc1", text, 700);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("doc1.md", "doc1", &text, 10);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic_ids() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text("doc1.md", "doc1", text, 5);
        let c2 = chunk_text("doc1.md", "doc1", text, 5);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.hash, b.hash);
        }
    }

    #[test]
    fn test_chunk_id_depends_on_path_and_index() {
        let a = make_chunk_id("docs/a.md", 0);
        let b = make_chunk_id("docs/b.md", 0);
        let c = make_chunk_id("docs/a.md", 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, make_chunk_id("docs/a.md", 0));
    }

    #[test]
    fn test_markdown_headers_start_new_sections() {
        let text = "# Title\n\nIntro text here.\n\n## Section Two\n\nMore text in section two.";
        let chunks = chunk_markdown("doc.md", "doc1", text, 700, 0);
        assert!(chunks.iter().any(|c| c.text.contains("# Title")));
        assert!(chunks.iter().any(|c| c.text.contains("## Section Two")));
    }

    #[test]
    fn test_markdown_code_block_stays_atomic() {
        let code = "x".repeat(50);
        let text = format!("# Title\n\n```rust\nfn main() {{\n    // {code}\n}}\n```\n");
        let chunks = chunk_markdown("doc.md", "doc1", &text, 5, 0);
        let code_chunk = chunks.iter().find(|c| c.text.contains("fn main")).unwrap();
        assert!(code_chunk.text.contains("```"));
        assert_eq!(code_chunk.section_type, "code_block");
    }

    #[test]
    fn test_markdown_oversized_section_splits_with_overlap() {
        let sentences: Vec<String> = (0..40).map(|i| format!("Sentence number {i}.")).collect();
        let text = format!("# Big Section\n\n{}", sentences.join(" "));
        let chunks = chunk_markdown("doc.md", "doc1", &text, 20, 5);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_markdown_table_header_repeated_on_split() {
        let mut rows = String::from("| A | B |\n|---|---|\n");
        for i in 0..60 {
            rows.push_str(&format!("| row{i} | value{i} |\n"));
        }
        let text = format!("# Data\n\n{rows}");
        let chunks = chunk_markdown("doc.md", "doc1", &text, 15, 2);
        assert!(chunks.len() > 1, "table section should have split into multiple chunks");
        for c in &chunks {
            assert!(c.text.contains("| A | B |"), "chunk missing table header: {}", c.text);
            assert_eq!(c.section_type, "table_chunk");
        }
    }

    #[test]
    fn test_single_paragraph_12_words_reports_text_and_start_char_zero() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let chunks = chunk_markdown("doc.md", "doc1", text, 512, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].section_type, "text");
        assert_eq!(chunks[0].start_char, 0);
    }

    #[test]
    fn test_markdown_headers_report_section_levels() {
        let text = "# A\nbody a\n## B\nbody b";
        let chunks = chunk_markdown("doc.md", "doc1", text, 512, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_level, 1);
        assert!(chunks[0].text.contains("# A"));
        assert!(chunks[0].text.contains("body a"));
        assert_eq!(chunks[1].section_level, 2);
        assert!(chunks[1].text.contains("## B"));
        assert!(chunks[1].text.contains("body b"));
    }

    #[test]
    fn test_two_consecutive_headers_first_becomes_header_chunk() {
        let text = "# Title\n## Subtitle\nbody text here";
        let chunks = chunk_markdown("doc.md", "doc1", text, 512, 0);
        assert_eq!(chunks[0].text, "# Title");
        assert_eq!(chunks[0].section_type, "header");
    }
}
