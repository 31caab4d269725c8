//! SQLite-backed [`IndexStore`].
//!
//! Each document write is one transaction: the document row, all of its
//! chunk rows (with embedding BLOBs and insertion sequence numbers) and, for
//! the first document, the index identity. A failure rolls everything back,
//! so no partial document is ever persisted.
//!
//! SQLite allows one writer at a time, and a deferred transaction that reads
//! before it writes fails with `SQLITE_BUSY` instead of waiting when another
//! connection commits first. Writes from this process therefore queue on
//! [`SqliteStore`]'s writer lock before opening their transaction.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;

use context_qa_core::embedding::{blob_to_vec, vec_to_blob};
use context_qa_core::index::{IndexIdentity, IndexedChunk, PreparedDocument};
use context_qa_core::models::{Chunk, Document, DocumentKind, ModelId};
use context_qa_core::store::{check_identity, DocumentSummary, IndexStore};
use context_qa_core::{Error, Result};

use crate::config::Config;
use crate::{db, migrate};

const META_MODEL: &str = "embedding_model";
const META_DIMS: &str = "embedding_dims";

pub struct SqliteStore {
    pool: SqlitePool,
    writes: Mutex<()>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            writes: Mutex::new(()),
        }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn read_identity(conn: &mut SqliteConnection) -> Result<Option<IndexIdentity>> {
    let rows = sqlx::query("SELECT key, value FROM index_meta WHERE key IN (?, ?)")
        .bind(META_MODEL)
        .bind(META_DIMS)
        .fetch_all(&mut *conn)
        .await
        .map_err(Error::storage)?;

    let mut model = None;
    let mut dims = None;
    for row in rows {
        let key: String = row.get("key");
        let value: String = row.get("value");
        match key.as_str() {
            META_MODEL => model = Some(value),
            META_DIMS => {
                dims = Some(value.parse::<usize>().map_err(|e| {
                    Error::storage(format!("corrupt {} value '{}': {}", META_DIMS, value, e))
                })?)
            }
            _ => {}
        }
    }

    Ok(match (model, dims) {
        (Some(model), Some(dims)) => Some(IndexIdentity::new(ModelId::new(model), dims)),
        _ => None,
    })
}

async fn write_identity(conn: &mut SqliteConnection, identity: &IndexIdentity) -> Result<()> {
    for (key, value) in [
        (META_MODEL, identity.model.to_string()),
        (META_DIMS, identity.dims.to_string()),
    ] {
        sqlx::query(
            "INSERT INTO index_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&mut *conn)
        .await
        .map_err(Error::storage)?;
    }
    Ok(())
}

async fn write_document(
    conn: &mut SqliteConnection,
    doc: &Document,
    prepared: &PreparedDocument,
) -> Result<()> {
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(&doc.id)
        .execute(&mut *conn)
        .await
        .map_err(Error::storage)?;

    sqlx::query(
        r#"
        INSERT INTO documents (id, kind, body, content_hash, ingested_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            kind = excluded.kind,
            body = excluded.body,
            content_hash = excluded.content_hash,
            ingested_at = excluded.ingested_at
        "#,
    )
    .bind(&doc.id)
    .bind(doc.kind.as_str())
    .bind(&doc.text)
    .bind(&doc.content_hash)
    .bind(doc.ingested_at.timestamp_millis())
    .execute(&mut *conn)
    .await
    .map_err(Error::storage)?;

    for entry in prepared.entries() {
        let c = &entry.chunk;
        sqlx::query(
            r#"
            INSERT INTO chunks (document_id, chunk_index, id, text, start_char, end_char, overlap, seq, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&c.document_id)
        .bind(c.index as i64)
        .bind(&c.id)
        .bind(&c.text)
        .bind(c.start as i64)
        .bind(c.end as i64)
        .bind(c.overlap as i64)
        .bind(entry.seq as i64)
        .bind(vec_to_blob(&entry.vector))
        .execute(&mut *conn)
        .await
        .map_err(Error::storage)?;
    }
    Ok(())
}

async fn delete_all(conn: &mut SqliteConnection) -> Result<()> {
    for table in ["chunks", "documents", "index_meta"] {
        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *conn)
            .await
            .map_err(Error::storage)?;
    }
    Ok(())
}

fn parse_kind(kind: &str) -> Result<DocumentKind> {
    DocumentKind::from_str(kind).map_err(Error::storage)
}

fn parse_timestamp(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::storage(format!("invalid ingestion timestamp: {}", ms)))
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn identity(&self) -> Result<Option<IndexIdentity>> {
        let mut conn = self.pool.acquire().await.map_err(Error::storage)?;
        read_identity(&mut conn).await
    }

    async fn save_document(&self, doc: &Document, prepared: &PreparedDocument) -> Result<()> {
        let _guard = self.writes.lock().await;
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let stored = read_identity(&mut tx).await?;
        check_identity(stored.as_ref(), prepared)?;
        if stored.is_none() {
            write_identity(&mut tx, prepared.identity()).await?;
        }
        write_document(&mut tx, doc, prepared).await?;

        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let _guard = self.writes.lock().await;
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;
        let deleted = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?
            .rows_affected();
        tx.commit().await.map_err(Error::storage)?;
        Ok(deleted > 0)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, kind, body, content_hash, ingested_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::storage)?;

        row.map(|row| -> Result<Document> {
            Ok(Document {
                id: row.get("id"),
                kind: parse_kind(row.get("kind"))?,
                text: row.get("body"),
                content_hash: row.get("content_hash"),
                ingested_at: parse_timestamp(row.get("ingested_at"))?,
            })
        })
        .transpose()
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.kind, d.content_hash, d.ingested_at, COUNT(c.chunk_index) AS chunk_count
            FROM documents d
            LEFT JOIN chunks c ON c.document_id = d.id
            GROUP BY d.id
            ORDER BY d.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;

        rows.iter()
            .map(|row| -> Result<DocumentSummary> {
                Ok(DocumentSummary {
                    id: row.get("id"),
                    kind: parse_kind(row.get("kind"))?,
                    chunk_count: row.get::<i64, _>("chunk_count") as usize,
                    ingested_at: parse_timestamp(row.get("ingested_at"))?,
                    content_hash: row.get("content_hash"),
                })
            })
            .collect()
    }

    async fn load_index(&self) -> Result<Vec<(String, Vec<IndexedChunk>)>> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, chunk_index, id, text, start_char, end_char, overlap, seq, embedding
            FROM chunks
            ORDER BY document_id, chunk_index
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;

        let mut documents: Vec<(String, Vec<IndexedChunk>)> = Vec::new();
        for row in rows {
            let document_id: String = row.get("document_id");
            let blob: Vec<u8> = row.get("embedding");
            let entry = IndexedChunk {
                chunk: Chunk {
                    id: row.get("id"),
                    document_id: document_id.clone(),
                    index: row.get::<i64, _>("chunk_index") as usize,
                    text: row.get("text"),
                    start: row.get::<i64, _>("start_char") as usize,
                    end: row.get::<i64, _>("end_char") as usize,
                    overlap: row.get::<i64, _>("overlap") as usize,
                },
                vector: blob_to_vec(&blob),
                seq: row.get::<i64, _>("seq") as u64,
            };
            match documents.last_mut() {
                Some((id, entries)) if *id == document_id => entries.push(entry),
                _ => documents.push((document_id, vec![entry])),
            }
        }
        Ok(documents)
    }

    async fn all_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, kind, body, content_hash, ingested_at FROM documents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::storage)?;

        rows.iter()
            .map(|row| -> Result<Document> {
                Ok(Document {
                    id: row.get("id"),
                    kind: parse_kind(row.get("kind"))?,
                    text: row.get("body"),
                    content_hash: row.get("content_hash"),
                    ingested_at: parse_timestamp(row.get("ingested_at"))?,
                })
            })
            .collect()
    }

    async fn replace_all(
        &self,
        documents: &[(Document, PreparedDocument)],
        identity: Option<IndexIdentity>,
    ) -> Result<()> {
        let _guard = self.writes.lock().await;
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        delete_all(&mut tx).await?;
        if let Some(identity) = &identity {
            write_identity(&mut tx, identity).await?;
        }
        for (doc, prepared) in documents {
            write_document(&mut tx, doc, prepared).await?;
        }
        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.writes.lock().await;
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        delete_all(&mut tx).await?;
        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }
}
