//! Question → ranked, deduplicated passages.
//!
//! The [`Retriever`] embeds the question, over-fetches candidates from the
//! [`VectorIndex`], and drops near-duplicates greedily so the top `k` slots
//! are not spent on repeated boilerplate or overlapping spans.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::embedding::{tokenize, Embedder};
use crate::error::{Error, Result};
use crate::index::{ScoredChunk, VectorIndex};
use crate::models::{Chunk, SourceLabel};

/// Tunables for [`Retriever`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    /// Default number of passages when a query does not specify one.
    pub k: usize,
    /// Overlap ratio above which a candidate counts as a duplicate, in `(0, 1]`.
    pub dedup_threshold: f32,
    /// Candidates fetched per requested passage before deduplication.
    pub candidate_multiplier: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            k: 5,
            dedup_threshold: 0.9,
            candidate_multiplier: 2,
        }
    }
}

impl RetrievalParams {
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::configuration("retrieval.k must be > 0"));
        }
        if !(self.dedup_threshold > 0.0 && self.dedup_threshold <= 1.0) {
            return Err(Error::configuration(format!(
                "retrieval.dedup_threshold must be in (0, 1], got {}",
                self.dedup_threshold
            )));
        }
        if self.candidate_multiplier == 0 {
            return Err(Error::configuration(
                "retrieval.candidate_multiplier must be >= 1",
            ));
        }
        Ok(())
    }
}

/// A retrieved chunk with its similarity score and source label.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedPassage {
    pub label: SourceLabel,
    pub score: f32,
    pub chunk: Chunk,
    #[serde(skip)]
    pub seq: u64,
}

impl From<ScoredChunk> for RetrievedPassage {
    fn from(hit: ScoredChunk) -> Self {
        Self {
            label: hit.chunk.label(),
            score: hit.score,
            chunk: hit.chunk,
            seq: hit.seq,
        }
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<VectorIndex>, params: RetrievalParams) -> Self {
        Self {
            embedder,
            index,
            params,
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Up to `k` passages most similar to `question`, best first.
    ///
    /// An empty index yields an empty list without calling the embedder.
    /// Embedder failures propagate unchanged.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<RetrievedPassage>> {
        if question.trim().is_empty() {
            return Err(Error::EmptyQuestion);
        }
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(question).await?;
        let fetch = k.saturating_mul(self.params.candidate_multiplier);
        let candidates = self.index.query(&query, fetch)?;
        let fetched = candidates.len();

        let passages = deduplicate(
            candidates.into_iter().map(RetrievedPassage::from).collect(),
            k,
            self.params.dedup_threshold,
        );
        tracing::debug!(
            k,
            candidates = fetched,
            returned = passages.len(),
            "retrieved passages"
        );
        Ok(passages)
    }
}

/// Greedy near-duplicate removal over score-ordered candidates, capped at `k`.
pub fn deduplicate(
    candidates: Vec<RetrievedPassage>,
    k: usize,
    threshold: f32,
) -> Vec<RetrievedPassage> {
    let mut kept: Vec<(RetrievedPassage, WordBag)> = Vec::with_capacity(k);
    for candidate in candidates {
        if kept.len() == k {
            break;
        }
        let bag = WordBag::new(&candidate.chunk.text);
        let duplicate = kept.iter().any(|(p, kept_bag)| {
            span_overlap(&p.chunk, &candidate.chunk) > threshold
                || kept_bag.overlap(&bag) > threshold
        });
        if !duplicate {
            kept.push((candidate, bag));
        }
    }
    kept.into_iter().map(|(p, _)| p).collect()
}

/// Shared span of two chunks of the same document relative to the shorter one.
fn span_overlap(a: &Chunk, b: &Chunk) -> f32 {
    if a.document_id != b.document_id {
        return 0.0;
    }
    let shared = a.end.min(b.end).saturating_sub(a.start.max(b.start));
    let shorter = a.char_len().min(b.char_len());
    if shorter == 0 {
        return 0.0;
    }
    shared as f32 / shorter as f32
}

struct WordBag {
    counts: HashMap<String, usize>,
    total: usize,
}

impl WordBag {
    fn new(text: &str) -> Self {
        let mut counts = HashMap::new();
        let mut total = 0;
        for token in tokenize(text) {
            *counts.entry(token).or_insert(0) += 1;
            total += 1;
        }
        Self { counts, total }
    }

    /// Multiset intersection size relative to the larger bag.
    fn overlap(&self, other: &WordBag) -> f32 {
        let larger = self.total.max(other.total);
        if larger == 0 {
            return 0.0;
        }
        let shared: usize = self
            .counts
            .iter()
            .map(|(w, n)| (*n).min(other.counts.get(w).copied().unwrap_or(0)))
            .sum();
        shared as f32 / larger as f32
    }
}
