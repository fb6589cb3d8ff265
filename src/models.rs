//! Core data models used throughout docdex.
//!
//! These types represent the collections, documents, and chunks that flow
//! through the sync and retrieval pipeline, plus the result shapes returned
//! to callers.

use serde::Serialize;

/// A registered collection: one named container of documents from one source.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    /// Deterministic identifier derived from the normalized source locator.
    pub id: String,
    /// Display name (from the manifest, or the name given at sync time).
    pub name: String,
    /// Normalized source locator this collection syncs from.
    pub locator: String,
    /// Version string declared by the last-applied manifest.
    pub version: String,
    pub description: String,
    /// Hash of the last-applied manifest; `None` before the first sync completes.
    pub manifest_hash: Option<String>,
    /// Unix timestamp of the last successful sync.
    pub last_synced_at: Option<i64>,
    /// Number of documents currently stored.
    pub document_count: i64,
}

/// Lightweight per-document listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub doc_id: String,
    /// Size of the raw content in bytes.
    pub byte_size: i64,
    /// Extracted title (first top-level heading), or the doc ID.
    pub title: String,
}

/// A chunk of a document's content, ready for persistence.
///
/// `content` is the display slice; the context prefix used for embedding is
/// never stored.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub collection_id: String,
    pub doc_id: String,
    pub chunk_index: i64,
    pub content: String,
    /// Nearest preceding section heading at the point this slice starts.
    pub heading: Option<String>,
}

/// Counts reported by one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    /// Number of entries the resolved source declared, whether or not each
    /// one needed work.
    pub total: u64,
}

/// One heading in a document outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutlineEntry {
    /// Heading level, 1–6.
    pub level: u8,
    pub text: String,
    /// 1-based line number.
    pub line: usize,
}

/// A section extracted by heading match.
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub heading: String,
    pub level: u8,
    /// 1-based line of the heading itself.
    pub start_line: usize,
    /// 1-based line of the last content line, inclusive.
    pub end_line: usize,
    /// Section body, starting at the heading line.
    pub content: String,
}

/// A search result returned from the retrieval engine.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub collection: String,
    pub doc_id: String,
    /// Display content of the matching chunk.
    pub content: String,
    /// Cosine distance to the query vector. `None` for chunks reached only
    /// through the keyword channel.
    pub distance: Option<f32>,
    /// Fused (or re-ranked) relevance score, higher is better.
    pub score: f64,
}

/// Neutral distance reported for keyword-only hits: the midpoint of the
/// cosine-distance range [0, 2].
pub const DEFAULT_KEYWORD_DISTANCE: f32 = 1.0;

impl SearchResultItem {
    /// The vector distance, or the neutral placeholder when none was computed.
    pub fn distance_or_default(&self) -> f32 {
        self.distance.unwrap_or(DEFAULT_KEYWORD_DISTANCE)
    }
}
