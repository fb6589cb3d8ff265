//! Durable home for documents and chunks.
//!
//! [`DocStore`] owns the chunking and embedding pipeline triggered on
//! upsert: content is hashed, and only when the hash changes is the
//! document re-chunked, re-embedded, and its chunk set atomically replaced.
//! Unchanged content never reaches the embedding provider.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::chunk::{chunk_document, embedding_text, extract_title};
use crate::config::ChunkingConfig;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob, ProviderCell};
use crate::migrate;
use crate::models::{CollectionInfo, DocumentSummary, OutlineEntry, Section};
use crate::outline;

/// A candidate chunk returned from keyword or vector search.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub collection_id: String,
    pub doc_id: String,
    pub content: String,
    /// Cosine distance to the query vector; `None` for keyword hits.
    pub distance: Option<f32>,
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// SQLite-backed document and chunk store.
pub struct DocStore {
    pool: SqlitePool,
    embedder: ProviderCell,
    chunking: ChunkingConfig,
}

impl DocStore {
    /// Connect to (or create) the database at `db_path` and run migrations.
    pub async fn open(
        db_path: &Path,
        embedder: ProviderCell,
        chunking: ChunkingConfig,
    ) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            embedder,
            chunking,
        })
    }

    pub fn new(pool: SqlitePool, embedder: ProviderCell, chunking: ChunkingConfig) -> Self {
        Self {
            pool,
            embedder,
            chunking,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn embedder(&self) -> &ProviderCell {
        &self.embedder
    }

    /// Insert or update one document.
    ///
    /// Returns `false` without touching the database when the stored content
    /// hash already matches. Otherwise chunks, embeds, and replaces the
    /// document's chunk set in one transaction, returning `true`.
    pub async fn upsert(&self, collection_id: &str, doc_id: &str, content: &str) -> Result<bool> {
        let content_hash = sha256_hex(content.as_bytes());

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT content_hash FROM documents WHERE collection_id = ? AND doc_id = ?",
        )
        .bind(collection_id)
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;

        if existing.as_deref() == Some(content_hash.as_str()) {
            return Ok(false);
        }

        let chunks = chunk_document(
            collection_id,
            doc_id,
            content,
            self.chunking.max_tokens,
            self.chunking.overlap_tokens,
        );

        // Embed outside the transaction; the provider is a pure function and
        // the write must stay all-or-nothing.
        let vectors = if chunks.is_empty() {
            Vec::new()
        } else {
            let title = extract_title(content, doc_id);
            let texts: Vec<String> = chunks
                .iter()
                .map(|c| embedding_text(&title, c.heading.as_deref(), &c.content))
                .collect();
            let provider = self.embedder.get().await?;
            let vectors = provider.embed_documents(&texts).await?;
            if vectors.len() != chunks.len() {
                bail!(
                    "Embedding provider returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                );
            }
            vectors
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks_fts WHERE collection_id = ? AND doc_id = ?")
            .bind(collection_id)
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE collection_id = ? AND doc_id = ?")
            .bind(collection_id)
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO documents (collection_id, doc_id, content, content_hash)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(collection_id, doc_id) DO UPDATE SET
                content = excluded.content,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(collection_id)
        .bind(doc_id)
        .bind(content)
        .bind(&content_hash)
        .execute(&mut *tx)
        .await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                "INSERT INTO chunks (id, collection_id, doc_id, chunk_index, content, embedding) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.collection_id)
            .bind(&chunk.doc_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunks_fts (chunk_id, collection_id, doc_id, content) VALUES (?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.collection_id)
            .bind(&chunk.doc_id)
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Delete documents and their chunks in one transaction.
    ///
    /// Absent IDs are not errors; an empty list is a no-op. Returns the
    /// number of document rows actually removed.
    pub async fn delete_documents(&self, collection_id: &str, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;

        for doc_id in ids {
            sqlx::query("DELETE FROM chunks_fts WHERE collection_id = ? AND doc_id = ?")
                .bind(collection_id)
                .bind(doc_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunks WHERE collection_id = ? AND doc_id = ?")
                .bind(collection_id)
                .bind(doc_id)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM documents WHERE collection_id = ? AND doc_id = ?")
                .bind(collection_id)
                .bind(doc_id)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// All `(doc_id, content_hash)` pairs stored for a collection.
    pub async fn list_document_ids(&self, collection_id: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT doc_id, content_hash FROM documents WHERE collection_id = ? ORDER BY doc_id",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("doc_id"), row.get("content_hash")))
            .collect())
    }

    /// Full content of one document, or `None` when absent.
    pub async fn get_document(&self, collection_id: &str, doc_id: &str) -> Result<Option<String>> {
        let content: Option<String> = sqlx::query_scalar(
            "SELECT content FROM documents WHERE collection_id = ? AND doc_id = ?",
        )
        .bind(collection_id)
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(content)
    }

    /// Paginated document listing with byte sizes and extracted titles.
    /// Returns `(page, total_count)`.
    pub async fn list_documents(
        &self,
        collection_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<DocumentSummary>, i64)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection_id = ?")
                .bind(collection_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(
            "SELECT doc_id, content FROM documents WHERE collection_id = ? ORDER BY doc_id LIMIT ? OFFSET ?",
        )
        .bind(collection_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let summaries = rows
            .iter()
            .map(|row| {
                let doc_id: String = row.get("doc_id");
                let content: String = row.get("content");
                DocumentSummary {
                    title: extract_title(&content, &doc_id),
                    byte_size: content.len() as i64,
                    doc_id,
                }
            })
            .collect();

        Ok((summaries, total))
    }

    /// Heading outline for one document; `None` when the document is absent.
    pub async fn get_outline(
        &self,
        collection_id: &str,
        doc_id: &str,
        max_depth: u8,
    ) -> Result<Option<Vec<OutlineEntry>>> {
        Ok(self
            .get_document(collection_id, doc_id)
            .await?
            .map(|content| outline::outline(&content, max_depth)))
    }

    /// Section body by case-insensitive heading substring match. `None` when
    /// the document is absent or no heading matches.
    pub async fn get_section(
        &self,
        collection_id: &str,
        doc_id: &str,
        heading_query: &str,
        include_subsections: bool,
    ) -> Result<Option<Section>> {
        Ok(self
            .get_document(collection_id, doc_id)
            .await?
            .and_then(|content| outline::section(&content, heading_query, include_subsections)))
    }

    /// All registered collections with document counts.
    pub async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.name, c.locator, c.version, c.description,
                   c.manifest_hash, c.last_synced_at,
                   (SELECT COUNT(*) FROM documents d WHERE d.collection_id = c.id) AS document_count
            FROM collections c
            ORDER BY c.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(collection_from_row).collect())
    }

    pub async fn get_collection(&self, collection_id: &str) -> Result<Option<CollectionInfo>> {
        let row = sqlx::query(
            r#"
            SELECT c.id, c.name, c.locator, c.version, c.description,
                   c.manifest_hash, c.last_synced_at,
                   (SELECT COUNT(*) FROM documents d WHERE d.collection_id = c.id) AS document_count
            FROM collections c
            WHERE c.id = ?
            "#,
        )
        .bind(collection_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(collection_from_row))
    }

    /// Remove a collection and everything under it. Idempotent: returns
    /// `false` when no such collection existed.
    pub async fn drop_collection(&self, collection_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks_fts WHERE collection_id = ?")
            .bind(collection_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE collection_id = ?")
            .bind(collection_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE collection_id = ?")
            .bind(collection_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(collection_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Upsert the collection record after a successful sync.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_sync(
        &self,
        collection_id: &str,
        name: &str,
        locator: &str,
        version: &str,
        description: &str,
        manifest_hash: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO collections (id, name, locator, version, description, manifest_hash, last_synced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                locator = excluded.locator,
                version = excluded.version,
                description = excluded.description,
                manifest_hash = excluded.manifest_hash,
                last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(collection_id)
        .bind(name)
        .bind(locator)
        .bind(version)
        .bind(description)
        .bind(manifest_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Rank all chunks by cosine distance to `query_vec`, ascending.
    pub async fn vector_candidates(
        &self,
        query_vec: &[f32],
        collections: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let mut sql =
            String::from("SELECT id, collection_id, doc_id, content, embedding FROM chunks");
        if let Some(ids) = collections {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; ids.len()].join(", ");
            sql.push_str(&format!(" WHERE collection_id IN ({})", placeholders));
        }

        let mut query = sqlx::query(&sql);
        if let Some(ids) = collections {
            for id in ids {
                query = query.bind(id);
            }
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut hits: Vec<ChunkHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                ChunkHit {
                    chunk_id: row.get("id"),
                    collection_id: row.get("collection_id"),
                    doc_id: row.get("doc_id"),
                    content: row.get("content"),
                    distance: Some(cosine_distance(query_vec, &vec)),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        Ok(hits)
    }

    /// FTS5 keyword search ordered by the index's native relevance rank.
    /// `match_query` must already be sanitized FTS5 syntax.
    pub async fn keyword_candidates(
        &self,
        match_query: &str,
        collections: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let mut sql = String::from(
            "SELECT chunk_id, collection_id, doc_id, content FROM chunks_fts WHERE chunks_fts MATCH ?",
        );
        if let Some(ids) = collections {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; ids.len()].join(", ");
            sql.push_str(&format!(" AND collection_id IN ({})", placeholders));
        }
        sql.push_str(" ORDER BY rank LIMIT ?");

        let mut query = sqlx::query(&sql).bind(match_query);
        if let Some(ids) = collections {
            for id in ids {
                query = query.bind(id);
            }
        }
        query = query.bind(limit as i64);

        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| ChunkHit {
                chunk_id: row.get("chunk_id"),
                collection_id: row.get("collection_id"),
                doc_id: row.get("doc_id"),
                content: row.get("content"),
                distance: None,
            })
            .collect())
    }

    /// Mean of a document's chunk vectors, used as a similarity probe for
    /// related-content lookups. `None` when the document has no chunks.
    pub async fn document_vector(
        &self,
        collection_id: &str,
        doc_id: &str,
    ) -> Result<Option<Vec<f32>>> {
        let rows =
            sqlx::query("SELECT embedding FROM chunks WHERE collection_id = ? AND doc_id = ?")
                .bind(collection_id)
                .bind(doc_id)
                .fetch_all(&self.pool)
                .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut sum: Vec<f32> = Vec::new();
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vec = blob_to_vec(&blob);
            if sum.is_empty() {
                sum = vec;
            } else {
                for (s, v) in sum.iter_mut().zip(vec.iter()) {
                    *s += v;
                }
            }
        }
        let n = rows.len() as f32;
        for s in sum.iter_mut() {
            *s /= n;
        }

        Ok(Some(sum))
    }

    /// One chunk's vector plus its owning `(collection_id, doc_id)`.
    pub async fn chunk_vector(
        &self,
        chunk_id: &str,
    ) -> Result<Option<(String, String, Vec<f32>)>> {
        let row = sqlx::query("SELECT collection_id, doc_id, embedding FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            (
                row.get("collection_id"),
                row.get("doc_id"),
                blob_to_vec(&blob),
            )
        }))
    }

    /// Number of chunks stored for one document.
    pub async fn chunk_count(&self, collection_id: &str, doc_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE collection_id = ? AND doc_id = ?")
                .bind(collection_id)
                .bind(doc_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

fn collection_from_row(row: &sqlx::sqlite::SqliteRow) -> CollectionInfo {
    CollectionInfo {
        id: row.get("id"),
        name: row.get("name"),
        locator: row.get("locator"),
        version: row.get("version"),
        description: row.get("description"),
        manifest_hash: row.get("manifest_hash"),
        last_synced_at: row.get("last_synced_at"),
        document_count: row.get("document_count"),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Deterministic embedding provider for tests: a bag-of-words vector
    //! hashed into a fixed number of buckets, so shared vocabulary yields
    //! high cosine similarity without any model.

    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::embedding::EmbeddingProvider;

    pub const TEST_DIMS: usize = 32;

    #[derive(Default)]
    pub struct HashEmbedder {
        pub batch_calls: AtomicUsize,
    }

    fn bucket(word: &str) -> usize {
        // FNV-1a, folded into the vector length.
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in word.bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % TEST_DIMS as u64) as usize
    }

    pub fn embed_one(text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; TEST_DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vec[bucket(&word.to_lowercase())] += 1.0;
        }
        vec
    }

    #[async_trait]
    impl EmbeddingProvider for HashEmbedder {
        fn model_name(&self) -> &str {
            "hash-test"
        }
        fn dims(&self) -> usize {
            TEST_DIMS
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| embed_one(t)).collect())
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(embed_one(text))
        }
    }
}
