//! Persistence abstraction for documents and the vector index.
//!
//! The [`IndexStore`] trait lets the index survive restarts. The SQLite
//! implementation lives in the app crate; [`memory::InMemoryStore`] backs
//! tests and embedded use.
//!
//! Stores are the durable record and the [`VectorIndex`] is rebuilt from them
//! on startup with [`load_into`]. Writers always persist before swapping the
//! in-memory index, so a failed write leaves both unchanged.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::index::{IndexIdentity, IndexedChunk, PreparedDocument, VectorIndex};
use crate::models::{Document, DocumentKind};

/// Listing entry for an ingested document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub kind: DocumentKind,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
    pub content_hash: String,
}

/// Durable storage for documents, chunks, vectors and the index identity.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save_document`](IndexStore::save_document) | Replace a document and its chunks atomically |
/// | [`delete_document`](IndexStore::delete_document) | Remove a document and its chunks |
/// | [`load_index`](IndexStore::load_index) | Read every stored chunk for index restore |
/// | [`replace_all`](IndexStore::replace_all) | Swap the whole corpus (reindex) |
/// | [`clear`](IndexStore::clear) | Remove everything including the identity |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Identity recorded by the first saved document, if any.
    async fn identity(&self) -> Result<Option<IndexIdentity>>;

    /// Persist `doc` and its prepared chunks, replacing any previous version.
    ///
    /// Records the identity if none is stored; fails with a mismatch error
    /// if a different identity is stored.
    async fn save_document(&self, doc: &Document, prepared: &PreparedDocument) -> Result<()>;

    /// Returns `false` when the document did not exist.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// All documents, sorted by id.
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;

    /// Every stored document's chunks in chunk order.
    async fn load_index(&self) -> Result<Vec<(String, Vec<IndexedChunk>)>>;

    /// Every stored document including its text. Used by reindex.
    async fn all_documents(&self) -> Result<Vec<Document>>;

    /// Replace the whole corpus in one transaction.
    async fn replace_all(
        &self,
        documents: &[(Document, PreparedDocument)],
        identity: Option<IndexIdentity>,
    ) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Fill `index` from `store`.
///
/// `expected` is the identity of the configured embedder. A store built with
/// a different model or dimensionality is reported as a mismatch so the
/// caller can direct the user to reindex. Returns the number of chunks loaded.
pub async fn load_into(
    store: &dyn IndexStore,
    index: &VectorIndex,
    expected: &IndexIdentity,
) -> Result<usize> {
    let Some(stored) = store.identity().await? else {
        index.clear();
        return Ok(0);
    };
    stored.check(expected)?;

    let documents = store.load_index().await?;
    let count = documents.iter().map(|(_, e)| e.len()).sum();
    index.restore(stored, documents)?;
    tracing::debug!(chunks = count, "restored vector index from store");
    Ok(count)
}

/// Check a prepared document against the identity a store already holds.
pub fn check_identity(
    stored: Option<&IndexIdentity>,
    prepared: &PreparedDocument,
) -> Result<()> {
    match stored {
        Some(identity) => identity.check(prepared.identity()),
        None => Ok(()),
    }
}
