//! In-memory vector index with exact cosine top-k search.
//!
//! Vectors are stored normalized, so scoring is a dot product. All entries
//! must come from one embedding model with one dimensionality: the first
//! committed document fixes the index identity and later mismatches are
//! rejected until [`VectorIndex::clear`].
//!
//! # Concurrency
//!
//! The index holds a map of document id to an immutable, shared entry list
//! behind a single `RwLock`. Writers do all expensive work (validation,
//! normalization) in [`VectorIndex::prepare`] without the lock, then
//! [`VectorIndex::commit`] takes the write lock only to swap one map entry.
//! Queries take the read lock only long enough to clone the `Arc`s, then
//! score without holding it. A query therefore sees each document either
//! entirely before or entirely after a concurrent replacement, never a mix.
//!
//! Every entry gets a sequence number from a global counter when prepared.
//! Ties in score are broken by the higher sequence number, so more recently
//! ingested chunks win.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::embedding::{dot, normalized};
use crate::error::{Error, Result};
use crate::models::{Chunk, Embedding, IndexEntry, ModelId};

/// The embedding model and dimensionality every vector in an index shares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IndexIdentity {
    pub model: ModelId,
    pub dims: usize,
}

impl IndexIdentity {
    pub fn new(model: ModelId, dims: usize) -> Self {
        Self { model, dims }
    }

    pub fn of(embedding: &Embedding) -> Self {
        Self::new(embedding.model().clone(), embedding.dims())
    }

    /// Fail unless `other` is compatible with this identity. Model is checked first.
    pub fn check(&self, other: &IndexIdentity) -> Result<()> {
        if self.model != other.model {
            return Err(Error::ModelMismatch {
                expected: self.model.to_string(),
                found: other.model.to_string(),
            });
        }
        if self.dims != other.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                found: other.dims,
            });
        }
        Ok(())
    }
}

/// A chunk stored in the index with its unit-length vector.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub seq: u64,
}

/// A query hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
    pub seq: u64,
}

/// A validated, normalized document ready to be swapped into an index.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    document_id: String,
    identity: IndexIdentity,
    entries: Arc<Vec<IndexedChunk>>,
}

impl PreparedDocument {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn identity(&self) -> &IndexIdentity {
        &self.identity
    }

    pub fn entries(&self) -> &[IndexedChunk] {
        &self.entries
    }
}

#[derive(Default)]
struct IndexState {
    identity: Option<IndexIdentity>,
    documents: HashMap<String, Arc<Vec<IndexedChunk>>>,
}

/// Thread-safe exact-search vector index.
#[derive(Default)]
pub struct VectorIndex {
    state: RwLock<IndexState>,
    next_seq: AtomicU64,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current identity, or `None` while the index has never been populated.
    pub fn identity(&self) -> Option<IndexIdentity> {
        self.read().identity.clone()
    }

    /// Validate and normalize `entries` for `document_id` without touching the index.
    ///
    /// Every entry must belong to `document_id` and share one model and
    /// dimensionality, which must also match the index if it has an identity.
    pub fn prepare(&self, document_id: &str, entries: Vec<IndexEntry>) -> Result<PreparedDocument> {
        let first = entries
            .first()
            .ok_or_else(|| Error::EmptyDocument(document_id.to_string()))?;
        let identity = IndexIdentity::of(&first.embedding);
        if identity.dims == 0 {
            return Err(Error::DimensionMismatch {
                expected: 1,
                found: 0,
            });
        }

        for entry in &entries {
            identity.check(&IndexIdentity::of(&entry.embedding))?;
            if entry.chunk.document_id != document_id {
                return Err(Error::storage(format!(
                    "chunk '{}' belongs to '{}', not '{}'",
                    entry.chunk.id, entry.chunk.document_id, document_id
                )));
            }
        }
        if let Some(current) = self.identity() {
            current.check(&identity)?;
        }

        let base = self
            .next_seq
            .fetch_add(entries.len() as u64, Ordering::SeqCst);
        let indexed = entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| IndexedChunk {
                vector: normalized(entry.embedding.values()),
                chunk: entry.chunk,
                seq: base + i as u64,
            })
            .collect();

        Ok(PreparedDocument {
            document_id: document_id.to_string(),
            identity,
            entries: Arc::new(indexed),
        })
    }

    /// Swap a prepared document in, replacing any previous version.
    ///
    /// Identity is re-checked under the write lock in case another writer
    /// fixed it since [`prepare`](Self::prepare). Returns whether a previous
    /// version was replaced.
    pub fn commit(&self, prepared: PreparedDocument) -> Result<bool> {
        let mut state = self.write();
        match &state.identity {
            Some(current) => current.check(&prepared.identity)?,
            None => state.identity = Some(prepared.identity.clone()),
        }
        let replaced = state
            .documents
            .insert(prepared.document_id, prepared.entries)
            .is_some();
        Ok(replaced)
    }

    /// Insert or replace all chunks of one document.
    pub fn upsert(&self, document_id: &str, entries: Vec<IndexEntry>) -> Result<bool> {
        let prepared = self.prepare(document_id, entries)?;
        self.commit(prepared)
    }

    /// Remove a document. Returns `false` if it was not indexed.
    pub fn delete(&self, document_id: &str) -> bool {
        self.write().documents.remove(document_id).is_some()
    }

    /// Top-`k` chunks by cosine similarity to `query`, best first.
    ///
    /// Returns an empty list when `k == 0` or the index is empty. Fails when
    /// the query was produced by a different model or has a different length.
    pub fn query(&self, query: &Embedding, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let snapshot: Vec<Arc<Vec<IndexedChunk>>> = {
            let state = self.read();
            let Some(identity) = &state.identity else {
                return Ok(Vec::new());
            };
            identity.check(&IndexIdentity::of(query))?;
            state.documents.values().cloned().collect()
        };

        let q = normalized(query.values());
        let mut scored: Vec<ScoredChunk> = snapshot
            .iter()
            .flat_map(|entries| entries.iter())
            .map(|e| ScoredChunk {
                score: clamp_score(dot(&q, &e.vector)),
                chunk: e.chunk.clone(),
                seq: e.seq,
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| b.seq.cmp(&a.seq)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Load persisted entries, keeping their sequence numbers.
    ///
    /// Replaces the whole index content. The sequence counter advances past
    /// the largest restored value so later ingests still sort as newer.
    pub fn restore(
        &self,
        identity: IndexIdentity,
        documents: Vec<(String, Vec<IndexedChunk>)>,
    ) -> Result<()> {
        let mut max_seq = None;
        let mut map = HashMap::with_capacity(documents.len());
        for (id, entries) in documents {
            for e in &entries {
                if e.vector.len() != identity.dims {
                    return Err(Error::DimensionMismatch {
                        expected: identity.dims,
                        found: e.vector.len(),
                    });
                }
                max_seq = max_seq.max(Some(e.seq));
            }
            map.insert(id, Arc::new(entries));
        }

        if let Some(max) = max_seq {
            self.next_seq.fetch_max(max + 1, Ordering::SeqCst);
        }
        let mut state = self.write();
        state.identity = Some(identity);
        state.documents = map;
        Ok(())
    }

    /// Take over the content and identity of `other` in one swap.
    pub fn replace_all(&self, other: VectorIndex) {
        let other_next = other.next_seq.load(Ordering::SeqCst);
        let incoming = other
            .state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        self.next_seq.fetch_max(other_next, Ordering::SeqCst);
        *self.write() = incoming;
    }

    /// Remove everything, including the identity. Sequence numbers keep increasing.
    pub fn clear(&self) {
        *self.write() = IndexState::default();
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.read().documents.values().map(|e| e.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.read().documents.values().all(|e| e.is_empty())
    }

    pub fn document_count(&self) -> usize {
        self.read().documents.len()
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.read().documents.contains_key(document_id)
    }

    /// `(document id, chunk count)` pairs sorted by id.
    pub fn documents(&self) -> Vec<(String, usize)> {
        let mut docs: Vec<(String, usize)> = self
            .read()
            .documents
            .iter()
            .map(|(id, e)| (id.clone(), e.len()))
            .collect();
        docs.sort();
        docs
    }

    /// Next sequence number to be handed out. Used when building a replacement index.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }

    /// Create an empty index whose sequence numbers start at `seq`.
    pub fn starting_at(seq: u64) -> Self {
        Self {
            state: RwLock::default(),
            next_seq: AtomicU64::new(seq),
        }
    }
}

/// Cosine scores live in `[-1, 1]`. A NaN (from a NaN vector component)
/// ranks below every real score.
fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        -1.0
    } else {
        score.clamp(-1.0, 1.0)
    }
}
