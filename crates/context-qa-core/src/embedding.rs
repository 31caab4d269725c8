//! Embedder trait, a deterministic hashing embedder, and vector utilities.
//!
//! The [`Embedder`] trait is the seam between the pipeline and whatever
//! service turns text into vectors. Network-backed implementations (Ollama,
//! OpenAI, fastembed) live in the `context-qa` app crate; this module ships
//! [`HashEmbedder`], which needs no external service and is used for tests
//! and offline operation.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Embedding, ModelId};

/// Produces embeddings for text.
///
/// Every vector returned by one embedder has the same length and carries the
/// same [`ModelId`]. Implementations fail with [`Error::EmptyInput`] on blank
/// text and with [`Error::EmbeddingUnavailable`] or
/// [`Error::CollaboratorTimeout`] when the backing service cannot answer.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &ModelId;

    fn dims(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed several texts. The default embeds them one at a time.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Feature-hashing bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed (FNV-1a) into one of `dims`
/// buckets. Texts sharing vocabulary get high cosine similarity; the output
/// depends only on the input text.
pub struct HashEmbedder {
    model: ModelId,
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(Error::configuration("embedding dims must be > 0"));
        }
        Ok(Self {
            model: ModelId::new(format!("hash-{}", dims)),
            dims,
        })
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dims as u64) as usize;
            values[bucket] += 1.0;
        }
        values
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &ModelId {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            return Err(Error::EmptyInput);
        }
        Ok(Embedding::new(self.model.clone(), self.vector(text)))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Lowercase alphanumeric tokens of `text`.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use context_qa_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0)
}

/// Scale `values` to unit length. A zero vector is returned unchanged.
pub fn normalized(values: &[f32]) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return values.to_vec();
    }
    values.iter().map(|v| v / norm).collect()
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
