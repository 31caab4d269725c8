//! The ingestion path: chunk, embed, persist, then swap into the index.
//!
//! A document is written to the [`IndexStore`] in one transaction before its
//! entries are committed to the [`VectorIndex`]. If chunking, embedding, or
//! the store write fails, the previously ingested version stays in place in
//! both. Store writes and index commits happen under one writer lock, so the
//! two layers always agree on which version of a document is current.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::chunk::{chunk_text, drop_blank_chunks, ChunkParams};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::{PreparedDocument, VectorIndex};
use crate::models::{Document, DocumentKind, IndexEntry};
use crate::store::IndexStore;

/// Outcome of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks: usize,
    /// A previous version existed and was replaced.
    pub replaced: bool,
    /// Text was unchanged, nothing was re-embedded.
    pub skipped: bool,
}

/// Outcome of [`Ingestor::reindex`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub documents: usize,
    pub chunks: usize,
}

pub struct Ingestor {
    params: ChunkParams,
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    store: Arc<dyn IndexStore>,
    writes: Mutex<()>,
}

impl Ingestor {
    pub fn new(
        params: ChunkParams,
        embedder: Arc<dyn Embedder>,
        index: Arc<VectorIndex>,
        store: Arc<dyn IndexStore>,
    ) -> Self {
        Self {
            params,
            embedder,
            index,
            store,
            writes: Mutex::new(()),
        }
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// Ingest already-extracted text under `document_id`.
    pub async fn ingest_text(
        &self,
        document_id: &str,
        kind: DocumentKind,
        text: &str,
        force: bool,
    ) -> Result<IngestReport> {
        self.ingest_document(Document::new(document_id, kind, text), force)
            .await
    }

    /// Ingest `doc`, replacing any previous version with the same id.
    ///
    /// Unchanged text (same content hash) that is already indexed is skipped
    /// unless `force` is set.
    pub async fn ingest_document(&self, doc: Document, force: bool) -> Result<IngestReport> {
        if doc.text.trim().is_empty() {
            return Err(Error::EmptyDocument(doc.id));
        }

        let existing = self.store.get_document(&doc.id).await?;
        let replaced = existing.is_some();
        if let Some(existing) = existing {
            if !force && existing.content_hash == doc.content_hash && self.index.contains(&doc.id) {
                tracing::info!(document = %doc.id, "unchanged, skipping");
                return Ok(IngestReport {
                    chunks: self
                        .index
                        .documents()
                        .into_iter()
                        .find(|(id, _)| id == &doc.id)
                        .map(|(_, n)| n)
                        .unwrap_or(0),
                    document_id: doc.id,
                    replaced: false,
                    skipped: true,
                });
            }
        }

        let prepared = self.prepare(&doc, &self.index).await?;
        let chunks = prepared.entries().len();

        {
            let _guard = self.writes.lock().await;
            self.store.save_document(&doc, &prepared).await?;
            self.index.commit(prepared)?;
        }

        tracing::info!(document = %doc.id, chunks, replaced, "ingested");
        Ok(IngestReport {
            document_id: doc.id,
            chunks,
            replaced,
            skipped: false,
        })
    }

    /// Chunk and embed `doc`, validating against `target`'s identity.
    async fn prepare(&self, doc: &Document, target: &VectorIndex) -> Result<PreparedDocument> {
        let chunks = drop_blank_chunks(chunk_text(&doc.id, &doc.text, &self.params));
        if chunks.is_empty() {
            return Err(Error::EmptyDocument(doc.id.clone()));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry::new(chunk, embedding))
            .collect();
        target.prepare(&doc.id, entries)
    }

    /// Remove a document from the store and the index.
    pub async fn delete(&self, document_id: &str) -> Result<bool> {
        let _guard = self.writes.lock().await;
        let stored = self.store.delete_document(document_id).await?;
        let indexed = self.index.delete(document_id);
        if stored || indexed {
            tracing::info!(document = %document_id, "deleted");
        }
        Ok(stored || indexed)
    }

    /// Remove every document and reset the index identity.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.writes.lock().await;
        self.store.clear().await?;
        self.index.clear();
        tracing::info!("cleared all documents");
        Ok(())
    }

    /// Re-chunk and re-embed every stored document with the current
    /// parameters and embedder.
    ///
    /// The replacement is built off to the side and swapped in only after the
    /// store commits, so a failure part way through leaves the old index.
    /// Other writes wait until the reindex finishes.
    pub async fn reindex(&self) -> Result<ReindexReport> {
        let _guard = self.writes.lock().await;
        let documents = self.store.all_documents().await?;
        let fresh = VectorIndex::starting_at(self.index.next_seq());

        let mut prepared = Vec::with_capacity(documents.len());
        let mut report = ReindexReport::default();
        for doc in documents {
            let p = self.prepare(&doc, &fresh).await?;
            report.documents += 1;
            report.chunks += p.entries().len();
            fresh.commit(p.clone())?;
            prepared.push((doc, p));
        }

        self.store.replace_all(&prepared, fresh.identity()).await?;
        self.index.replace_all(fresh);
        tracing::info!(
            documents = report.documents,
            chunks = report.chunks,
            "reindexed"
        );
        Ok(report)
    }
}
