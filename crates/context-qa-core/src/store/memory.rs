//! In-memory [`IndexStore`] for tests and embedded use.
//!
//! Everything lives in one `RwLock`ed struct, so every operation is atomic
//! with respect to the others. Nothing survives the process.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::Result;
use crate::index::{IndexIdentity, IndexedChunk, PreparedDocument};
use crate::models::Document;

use super::{check_identity, DocumentSummary, IndexStore};

#[derive(Default)]
struct Inner {
    identity: Option<IndexIdentity>,
    docs: BTreeMap<String, (Document, Vec<IndexedChunk>)>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn identity(&self) -> Result<Option<IndexIdentity>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.identity.clone())
    }

    async fn save_document(&self, doc: &Document, prepared: &PreparedDocument) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        check_identity(inner.identity.as_ref(), prepared)?;
        if inner.identity.is_none() {
            inner.identity = Some(prepared.identity().clone());
        }
        inner.docs.insert(
            doc.id.clone(),
            (doc.clone(), prepared.entries().to_vec()),
        );
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.docs.remove(id).is_some())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.docs.get(id).map(|(d, _)| d.clone()))
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .docs
            .values()
            .map(|(d, chunks)| DocumentSummary {
                id: d.id.clone(),
                kind: d.kind,
                chunk_count: chunks.len(),
                ingested_at: d.ingested_at,
                content_hash: d.content_hash.clone(),
            })
            .collect())
    }

    async fn load_index(&self) -> Result<Vec<(String, Vec<IndexedChunk>)>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .docs
            .iter()
            .map(|(id, (_, chunks))| (id.clone(), chunks.clone()))
            .collect())
    }

    async fn all_documents(&self) -> Result<Vec<Document>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.docs.values().map(|(d, _)| d.clone()).collect())
    }

    async fn replace_all(
        &self,
        documents: &[(Document, PreparedDocument)],
        identity: Option<IndexIdentity>,
    ) -> Result<()> {
        let docs = documents
            .iter()
            .map(|(d, p)| (d.id.clone(), (d.clone(), p.entries().to_vec())))
            .collect();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *inner = Inner { identity, docs };
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *inner = Inner::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_text, ChunkParams};
    use crate::error::Error;
    use crate::index::VectorIndex;
    use crate::models::{DocumentKind, Embedding, IndexEntry, ModelId};
    use crate::store::load_into;

    fn prepare(index: &VectorIndex, doc: &Document, model: &str, dims: usize) -> PreparedDocument {
        let params = ChunkParams::new(20, 5).unwrap();
        let entries = chunk_text(&doc.id, &doc.text, &params)
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let mut v = vec![0.0; dims];
                v[i % dims] = 1.0;
                IndexEntry::new(c, Embedding::new(ModelId::new(model), v))
            })
            .collect();
        index.prepare(&doc.id, entries).unwrap()
    }

    #[tokio::test]
    async fn test_save_list_delete() {
        let store = InMemoryStore::new();
        let index = VectorIndex::new();
        let doc = Document::new("a.txt", DocumentKind::Txt, "some text that spans a few chunks");
        store.save_document(&doc, &prepare(&index, &doc, "m", 4)).await.unwrap();

        let listed = store.list_documents().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "a.txt");
        assert!(listed[0].chunk_count > 1);

        assert!(store.delete_document("a.txt").await.unwrap());
        assert!(!store.delete_document("a.txt").await.unwrap());
        assert!(store.get_document("a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_rejects_other_identity() {
        let store = InMemoryStore::new();
        let doc = Document::new("a.txt", DocumentKind::Txt, "hello");
        store
            .save_document(&doc, &prepare(&VectorIndex::new(), &doc, "m", 4))
            .await
            .unwrap();
        let err = store
            .save_document(&doc, &prepare(&VectorIndex::new(), &doc, "other", 4))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModelMismatch { .. }));
    }

    #[tokio::test]
    async fn test_load_into_restores_index() {
        let store = InMemoryStore::new();
        let source = VectorIndex::new();
        let doc = Document::new("a.txt", DocumentKind::Txt, "alpha beta gamma delta epsilon");
        let prepared = prepare(&source, &doc, "m", 4);
        let expected = prepared.identity().clone();
        store.save_document(&doc, &prepared).await.unwrap();

        let index = VectorIndex::new();
        let loaded = load_into(&store, &index, &expected).await.unwrap();
        assert_eq!(loaded, prepared.entries().len());
        assert!(index.contains("a.txt"));

        let wrong = IndexIdentity::new(ModelId::new("m"), 8);
        let err = load_into(&store, &VectorIndex::new(), &wrong).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }
}
