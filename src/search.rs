//! Hybrid retrieval engine.
//!
//! A query runs through two channels: a cosine-distance ranking over chunk
//! embeddings and an FTS5 keyword ranking over the same chunks. When both
//! produce results they are merged with Reciprocal Rank Fusion; an optional
//! second pass re-scores the fused candidates with an independent model.
//!
//! # RRF
//!
//! Each list contributes `1 / (K + rank)` per item (0-based rank, K = 60,
//! the value recommended by Cormack, Clarke & Buettcher, SIGIR 2009). A
//! chunk appearing in both lists sums its contributions, so agreement
//! between channels always outranks either channel alone.

use anyhow::{bail, Result};
use std::collections::HashMap;
use tracing::debug;

use crate::embedding::{cosine_similarity, ProviderCell};
use crate::models::SearchResultItem;
use crate::store::{ChunkHit, DocStore};

/// RRF constant: large enough that rank differences dominate over
/// absolute-score noise.
pub const RRF_K: f64 = 60.0;

/// Candidate pool multiplier when re-ranking: the second pass needs more to
/// choose from than it returns.
const RERANK_CANDIDATE_FACTOR: usize = 3;

pub const DEFAULT_LIMIT: usize = 10;

/// Inputs for one search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Restrict to these collection IDs; `None` searches everything.
    pub collections: Option<Vec<String>>,
    pub limit: usize,
    /// Drop vector results with cosine distance above this value.
    pub max_distance: Option<f32>,
    /// Combine keyword and vector rankings (on by default).
    pub hybrid: bool,
    /// Re-score fused candidates with the independent re-rank model.
    pub rerank: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            collections: None,
            limit: DEFAULT_LIMIT,
            max_distance: None,
            hybrid: true,
            rerank: false,
        }
    }
}

/// What `find_related` measures similarity against.
#[derive(Debug, Clone, Copy)]
pub enum RelatedTarget<'a> {
    Document {
        collection: &'a str,
        doc_id: &'a str,
    },
    Chunk {
        chunk_id: &'a str,
    },
}

/// Run a hybrid search. `reranker` is consulted only when the request asks
/// for re-ranking.
pub async fn search(
    store: &DocStore,
    req: &SearchRequest,
    reranker: Option<&ProviderCell>,
) -> Result<Vec<SearchResultItem>> {
    if req.query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let candidate_count = if req.rerank {
        req.limit * RERANK_CANDIDATE_FACTOR
    } else {
        req.limit
    };

    let provider = store.embedder().get().await?;
    let query_vec = provider.embed_query(&req.query).await?;

    let collections = req.collections.as_deref();

    let mut vector_hits = store
        .vector_candidates(&query_vec, collections, candidate_count)
        .await?;
    if let Some(max_distance) = req.max_distance {
        vector_hits.retain(|hit| hit.distance.is_some_and(|d| d <= max_distance));
    }

    let keyword_hits = if req.hybrid {
        keyword_channel(store, &req.query, collections, candidate_count).await
    } else {
        Vec::new()
    };

    let fused = fuse(vector_hits, keyword_hits, candidate_count);

    let mut results: Vec<SearchResultItem> = fused
        .into_iter()
        .map(|(hit, score)| SearchResultItem {
            collection: hit.collection_id,
            doc_id: hit.doc_id,
            content: hit.content,
            distance: hit.distance,
            score,
        })
        .collect();

    if req.rerank {
        let reranker = match reranker {
            Some(cell) => cell,
            None => bail!("Re-ranking requested but no reranker is configured"),
        };
        rerank(&mut results, reranker, &req.query).await?;
    }

    results.truncate(req.limit);
    Ok(results)
}

/// Run several queries against the shared index, one fused result set per
/// query. Batch search never re-ranks; that pass is reserved for
/// interactive single queries.
pub async fn search_batch(
    store: &DocStore,
    queries: &[String],
    collections: Option<Vec<String>>,
    limit: usize,
) -> Result<Vec<Vec<SearchResultItem>>> {
    let mut all = Vec::with_capacity(queries.len());
    for query in queries {
        let req = SearchRequest {
            query: query.clone(),
            collections: collections.clone(),
            limit,
            ..SearchRequest::new("")
        };
        all.push(search(store, &req, None).await?);
    }
    Ok(all)
}

/// Locate chunks similar to an existing document or chunk.
pub async fn find_related(
    store: &DocStore,
    target: RelatedTarget<'_>,
    collections: Option<&[String]>,
    limit: usize,
    exclude_source: bool,
) -> Result<Vec<SearchResultItem>> {
    let (source_collection, source_doc, query_vec) = match target {
        RelatedTarget::Document { collection, doc_id } => {
            match store.document_vector(collection, doc_id).await? {
                Some(vec) => (collection.to_string(), doc_id.to_string(), vec),
                None => return Ok(Vec::new()),
            }
        }
        RelatedTarget::Chunk { chunk_id } => match store.chunk_vector(chunk_id).await? {
            Some((collection, doc_id, vec)) => (collection, doc_id, vec),
            None => return Ok(Vec::new()),
        },
    };

    // Over-fetch so filtering out the source still fills the limit.
    let headroom = if exclude_source {
        limit + store.chunk_count(&source_collection, &source_doc).await? as usize
    } else {
        limit
    };

    let hits = store
        .vector_candidates(&query_vec, collections, headroom)
        .await?;

    let results = hits
        .into_iter()
        .filter(|hit| {
            !(exclude_source
                && hit.collection_id == source_collection
                && hit.doc_id == source_doc)
        })
        .take(limit)
        .enumerate()
        .map(|(rank, hit)| SearchResultItem {
            collection: hit.collection_id,
            doc_id: hit.doc_id,
            content: hit.content,
            distance: hit.distance,
            score: 1.0 / (RRF_K + rank as f64),
        })
        .collect();

    Ok(results)
}

async fn keyword_channel(
    store: &DocStore,
    query: &str,
    collections: Option<&[String]>,
    limit: usize,
) -> Vec<ChunkHit> {
    let match_query = match build_match_query(query) {
        Some(q) => q,
        None => return Vec::new(),
    };

    match store.keyword_candidates(&match_query, collections, limit).await {
        Ok(hits) => hits,
        Err(e) => {
            // A malformed keyword query never fails the whole search.
            debug!(error = %e, "keyword search failed, continuing with vector results");
            Vec::new()
        }
    }
}

/// Build an FTS5 match expression: strip query-syntax characters from each
/// token, quote what remains, and OR the tokens together. Returns `None`
/// when nothing searchable is left.
fn build_match_query(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|token| {
            token
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{}\"", token))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

/// Reciprocal Rank Fusion of the vector and keyword rankings.
///
/// With no keyword results the vector ranking stands alone and each item
/// scores its single-list contribution. The sort is stable, so ties keep
/// the order the channels produced.
fn fuse(
    vector_hits: Vec<ChunkHit>,
    keyword_hits: Vec<ChunkHit>,
    limit: usize,
) -> Vec<(ChunkHit, f64)> {
    if keyword_hits.is_empty() {
        return vector_hits
            .into_iter()
            .enumerate()
            .map(|(rank, hit)| (hit, 1.0 / (RRF_K + rank as f64)))
            .collect();
    }

    let mut order: Vec<ChunkHit> = Vec::new();
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (rank, hit) in vector_hits.into_iter().enumerate() {
        scores.insert(hit.chunk_id.clone(), 1.0 / (RRF_K + rank as f64));
        seen.insert(hit.chunk_id.clone(), order.len());
        order.push(hit);
    }

    for (rank, hit) in keyword_hits.into_iter().enumerate() {
        let contribution = 1.0 / (RRF_K + rank as f64);
        match seen.get(&hit.chunk_id) {
            Some(_) => {
                *scores.entry(hit.chunk_id.clone()).or_insert(0.0) += contribution;
            }
            None => {
                scores.insert(hit.chunk_id.clone(), contribution);
                seen.insert(hit.chunk_id.clone(), order.len());
                order.push(hit);
            }
        }
    }

    let mut fused: Vec<(ChunkHit, f64)> = order
        .into_iter()
        .map(|hit| {
            let score = scores.get(&hit.chunk_id).copied().unwrap_or(0.0);
            (hit, score)
        })
        .collect();

    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(limit);
    fused
}

/// Re-score candidates with the independent re-rank model and sort by that
/// similarity. Membership is untouched; only order (and scores) change.
async fn rerank(
    results: &mut Vec<SearchResultItem>,
    reranker: &ProviderCell,
    query: &str,
) -> Result<()> {
    if results.is_empty() {
        return Ok(());
    }

    let provider = reranker.get().await?;
    let texts: Vec<String> = results.iter().map(|r| r.content.clone()).collect();
    let doc_vecs = provider.embed_documents(&texts).await?;
    let query_vec = provider.embed_query(query).await?;

    let mut scored: Vec<(SearchResultItem, f32)> = results
        .drain(..)
        .zip(doc_vecs.iter())
        .map(|(mut item, vec)| {
            let similarity = cosine_similarity(&query_vec, vec);
            item.score = similarity as f64;
            (item, similarity)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results.extend(scored.into_iter().map(|(item, _)| item));

    Ok(())
}
