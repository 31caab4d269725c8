use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema if it does not exist. Safe to run repeatedly.
///
/// - `documents`: one row per ingested document, keyed by its source id.
/// - `chunks`: chunk text, span, insertion sequence and embedding BLOB.
/// - `index_meta`: key/value pairs; holds the embedding model and dims.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            body TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            id TEXT NOT NULL,
            text TEXT NOT NULL,
            start_char INTEGER NOT NULL,
            end_char INTEGER NOT NULL,
            overlap INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_seq ON chunks(seq)")
        .execute(pool)
        .await?;

    Ok(())
}
