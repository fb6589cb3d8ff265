//! Heading outline and section extraction.
//!
//! Pure text walks over markdown-style content: [`outline`] lists headings
//! in order, [`section`] pulls the body under the first heading matching a
//! query substring.

use crate::chunk::parse_heading;
use crate::models::{OutlineEntry, Section};

/// Ordered list of headings up to `max_depth` levels deep.
pub fn outline(text: &str, max_depth: u8) -> Vec<OutlineEntry> {
    let mut entries = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if let Some((level, heading_text)) = parse_heading(line) {
            if level <= max_depth {
                entries.push(OutlineEntry {
                    level,
                    text: heading_text.to_string(),
                    line: i + 1,
                });
            }
        }
    }
    entries
}

/// Extract the section under the first heading whose text contains
/// `heading_query` (case-insensitive).
///
/// With `include_subsections`, the body runs until the next heading of
/// equal-or-higher level; without, it stops at any heading. Returns `None`
/// when no heading matches.
pub fn section(text: &str, heading_query: &str, include_subsections: bool) -> Option<Section> {
    let needle = heading_query.to_lowercase();
    let lines: Vec<&str> = text.lines().collect();

    let (start_idx, level, heading) = lines.iter().enumerate().find_map(|(i, line)| {
        let (level, heading_text) = parse_heading(line)?;
        if heading_text.to_lowercase().contains(&needle) {
            Some((i, level, heading_text.to_string()))
        } else {
            None
        }
    })?;

    let mut end_idx = lines.len();
    for (i, line) in lines.iter().enumerate().skip(start_idx + 1) {
        if let Some((next_level, _)) = parse_heading(line) {
            if !include_subsections || next_level <= level {
                end_idx = i;
                break;
            }
        }
    }

    // Drop trailing blank lines but keep the heading line itself.
    while end_idx > start_idx + 1 && lines[end_idx - 1].trim().is_empty() {
        end_idx -= 1;
    }

    Some(Section {
        heading,
        level,
        start_line: start_idx + 1,
        end_line: end_idx,
        content: lines[start_idx..end_idx].join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\
# API Guide

Intro paragraph.

## Authentication

Use a token.

### Token scopes

Scopes are listed here.

## Pagination

Use cursors.
";

    #[test]
    fn test_outline_all_levels() {
        let entries = outline(DOC, 6);
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["API Guide", "Authentication", "Token scopes", "Pagination"]
        );
        assert_eq!(entries[0].level, 1);
        assert_eq!(entries[2].level, 3);
        assert_eq!(entries[0].line, 1);
    }

    #[test]
    fn test_outline_depth_capped() {
        let entries = outline(DOC, 2);
        assert!(entries.iter().all(|e| e.level <= 2));
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_section_with_subsections() {
        let sec = section(DOC, "authentication", true).unwrap();
        assert_eq!(sec.heading, "Authentication");
        assert_eq!(sec.level, 2);
        assert!(sec.content.starts_with("## Authentication"));
        assert!(sec.content.contains("Token scopes"));
        assert!(!sec.content.contains("Pagination"));
        assert!(sec.end_line >= sec.start_line);
    }

    #[test]
    fn test_section_without_subsections() {
        let sec = section(DOC, "Authentication", false).unwrap();
        assert!(sec.content.contains("Use a token."));
        assert!(!sec.content.contains("Token scopes"));
    }

    #[test]
    fn test_section_match_is_case_insensitive_substring() {
        let sec = section(DOC, "token SCO", true).unwrap();
        assert_eq!(sec.heading, "Token scopes");
        assert_eq!(sec.level, 3);
    }

    #[test]
    fn test_section_no_match() {
        assert!(section(DOC, "deployment", true).is_none());
    }

    #[test]
    fn test_section_runs_to_end_of_document() {
        let sec = section(DOC, "Pagination", true).unwrap();
        assert!(sec.content.contains("Use cursors."));
        assert_eq!(sec.end_line, DOC.lines().count());
    }
}
