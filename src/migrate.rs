use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Collections table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            locator TEXT NOT NULL,
            version TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            manifest_hash TEXT,
            last_synced_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Documents table, keyed per collection
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection_id TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            PRIMARY KEY (collection_id, doc_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks table with embedded vector blobs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            collection_id TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table over chunk content
    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                collection_id UNINDEXED,
                doc_id UNINDEXED,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(collection_id, doc_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection_id)")
        .execute(pool)
        .await?;

    Ok(())
}
