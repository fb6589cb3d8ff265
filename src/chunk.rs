//! Token-bounded text chunker with heading context.
//!
//! Splits document content into [`Chunk`]s that respect a configurable
//! `max_tokens` budget, carrying `overlap_tokens` from the tail of each
//! slice into the next so context at slice boundaries is not lost.
//!
//! While slicing, markdown headings are tracked so each chunk records the
//! nearest preceding section heading. [`embedding_text`] builds the
//! context-prefixed string that is embedded; the prefix is never stored as
//! display content.

use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split content into chunks, tracking section headings.
/// Returns chunks with contiguous indices starting at 0; whitespace-only
/// content yields no chunks.
pub fn chunk_document(
    collection_id: &str,
    doc_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut slices: Vec<(String, Option<String>)> = Vec::new();
    let mut buf = String::new();
    // Heading in effect where the current buffer starts.
    let mut buf_heading: Option<String> = None;
    // Most recent heading seen while scanning.
    let mut last_heading: Option<String> = None;

    for line in text.lines() {
        if let Some((_, heading_text)) = parse_heading(line) {
            last_heading = Some(heading_text.to_string());
        }

        // A single line over the budget is hard split at space boundaries.
        if line.len() > max_chars {
            if !buf.trim().is_empty() {
                slices.push((buf.trim().to_string(), buf_heading.clone()));
            }
            buf.clear();
            let mut remaining = line;
            while !remaining.is_empty() {
                let split_at = boundary_at_most(remaining, max_chars);
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind(' ')
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                slices.push((remaining[..actual_split].trim().to_string(), last_heading.clone()));
                remaining = &remaining[actual_split..];
            }
            buf_heading = last_heading.clone();
            continue;
        }

        let would_be = if buf.is_empty() {
            line.len()
        } else {
            buf.len() + 1 + line.len()
        };

        if would_be > max_chars && !buf.trim().is_empty() {
            slices.push((buf.trim().to_string(), buf_heading.clone()));
            // Carry the slice tail into the next buffer.
            buf = overlap_tail(&buf, overlap_chars);
            buf_heading = last_heading.clone();
        }

        if buf.is_empty() {
            if slices.is_empty() {
                buf_heading = last_heading.clone();
            }
            buf.push_str(line);
        } else {
            buf.push('\n');
            buf.push_str(line);
        }
    }

    if !buf.trim().is_empty() {
        slices.push((buf.trim().to_string(), buf_heading));
    }

    slices
        .into_iter()
        .filter(|(content, _)| !content.is_empty())
        .enumerate()
        .map(|(i, (content, heading))| Chunk {
            id: Uuid::new_v4().to_string(),
            collection_id: collection_id.to_string(),
            doc_id: doc_id.to_string(),
            chunk_index: i as i64,
            content,
            heading,
        })
        .collect()
}

/// Build the context-prefixed string handed to the embedding provider.
///
/// The section line is included only when the heading exists and differs
/// from the document title.
pub fn embedding_text(title: &str, heading: Option<&str>, slice: &str) -> String {
    match heading {
        Some(h) if h != title => format!("Document: {}\nSection: {}\n\n{}", title, h, slice),
        _ => format!("Document: {}\n\n{}", title, slice),
    }
}

/// Extract the document title: the first top-level heading, falling back to
/// the document ID.
pub fn extract_title(text: &str, doc_id: &str) -> String {
    for line in text.lines() {
        if let Some((1, heading_text)) = parse_heading(line) {
            return heading_text.to_string();
        }
    }
    doc_id.to_string()
}

/// Parse a markdown ATX heading line into (level, text).
pub fn parse_heading(line: &str) -> Option<(u8, &str)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    let text = rest.trim();
    if text.is_empty() {
        return None;
    }
    Some((hashes as u8, text))
}

/// Take the last `overlap_chars` bytes of a slice, snapped to a char
/// boundary and trimmed to a whitespace start where possible.
fn overlap_tail(s: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 {
        return String::new();
    }
    if s.len() <= overlap_chars {
        return s.to_string();
    }
    let mut start = s.len() - overlap_chars;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    let tail = &s[start..];
    // Drop the leading partial word.
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start().to_string(),
        None => tail.to_string(),
    }
}

/// Largest index `<= max` that is a char boundary of `s`.
fn boundary_at_most(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_document("col", "doc1", "Hello, world!", 400, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert!(chunks[0].heading.is_none());
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_document("col", "doc1", "", 400, 50).is_empty());
        assert!(chunk_document("col", "doc1", "  \n\n  ", 400, 50).is_empty());
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..60)
            .map(|i| format!("Line number {} with some padding text.", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_document("col", "doc1", &text, 20, 0);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_heading_tracked_per_slice() {
        let text = "# Guide\n\n## Setup\nInstall the thing.\n\n## Usage\nRun the thing with a long enough body that slicing splits here somewhere in the middle of the section.";
        // Budget small enough that Setup and Usage land in different slices.
        let chunks = chunk_document("col", "doc1", text, 5, 0);
        assert!(chunks.len() >= 2);
        let setup = chunks
            .iter()
            .find(|c| c.content.contains("Install the thing."))
            .unwrap();
        assert_eq!(setup.heading.as_deref(), Some("Setup"));
        let usage = chunks
            .iter()
            .find(|c| c.content.contains("Run the thing"))
            .unwrap();
        assert_eq!(usage.heading.as_deref(), Some("Usage"));
    }

    #[test]
    fn test_overlap_between_consecutive_slices() {
        let text = (0..40)
            .map(|i| format!("sentence number {} padding padding", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_document("col", "doc1", &text, 25, 10);
        assert!(chunks.len() > 1);
        // The second slice must begin with text repeated from the first.
        let carried = chunks[1].content.split('\n').next().unwrap();
        assert!(
            chunks[0].content.contains(carried),
            "expected second slice to open with overlap from the first, got: {}",
            carried
        );
    }

    #[test]
    fn test_overlong_line_hard_split() {
        let text = "word ".repeat(400);
        let chunks = chunk_document("col", "doc1", text.trim(), 20, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.content.len() <= 20 * CHARS_PER_TOKEN);
        }
    }

    #[test]
    fn test_deterministic_content() {
        let text = "# Title\n\nAlpha\nBeta\nGamma\nDelta";
        let a = chunk_document("col", "doc1", text, 5, 1);
        let b = chunk_document("col", "doc1", text, 5, 1);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.content, y.content);
            assert_eq!(x.heading, y.heading);
            assert_eq!(x.chunk_index, y.chunk_index);
        }
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(extract_title("# My Doc\n\nbody", "fallback.md"), "My Doc");
        assert_eq!(extract_title("## Not top level\nbody", "fallback.md"), "fallback.md");
        assert_eq!(extract_title("no headings here", "fallback.md"), "fallback.md");
    }

    #[test]
    fn test_parse_heading() {
        assert_eq!(parse_heading("# One"), Some((1, "One")));
        assert_eq!(parse_heading("### Three deep "), Some((3, "Three deep")));
        assert_eq!(parse_heading("#NoSpace"), None);
        assert_eq!(parse_heading("####### Seven"), None);
        assert_eq!(parse_heading("plain"), None);
        assert_eq!(parse_heading("#   "), None);
    }

    #[test]
    fn test_embedding_text_prefix() {
        let with_section = embedding_text("Guide", Some("Setup"), "body");
        assert_eq!(with_section, "Document: Guide\nSection: Setup\n\nbody");

        // Heading equal to the title collapses to the title line alone.
        let title_only = embedding_text("Guide", Some("Guide"), "body");
        assert_eq!(title_only, "Document: Guide\n\nbody");

        let no_heading = embedding_text("Guide", None, "body");
        assert_eq!(no_heading, "Document: Guide\n\nbody");
    }
}
