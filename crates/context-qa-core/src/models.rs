//! Core data models used throughout Context QA.
//!
//! These types represent the documents, chunks, embeddings, and source
//! labels that flow through the ingestion and query paths.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ExtractError;

/// File format a document was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Txt,
    Docx,
    Markdown,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Txt => "txt",
            DocumentKind::Docx => "docx",
            DocumentKind::Markdown => "markdown",
        }
    }

    /// Map a file extension (without the dot, any case) to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "txt" | "text" => Some(DocumentKind::Txt),
            "md" | "markdown" => Some(DocumentKind::Markdown),
            "docx" => Some(DocumentKind::Docx),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentKind::from_extension(s).ok_or_else(|| ExtractError::UnsupportedKind(s.to_string()))
    }
}

/// An ingested document. Replaced wholesale when the same id is ingested again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable source identifier (file name or relative path).
    pub id: String,
    pub kind: DocumentKind,
    pub text: String,
    pub ingested_at: DateTime<Utc>,
    /// SHA-256 of `text`, used to skip re-embedding unchanged documents.
    pub content_hash: String,
}

impl Document {
    pub fn new(id: impl Into<String>, kind: DocumentKind, text: impl Into<String>) -> Self {
        let text = text.into();
        let content_hash = content_hash(&text);
        Self {
            id: id.into(),
            kind,
            text,
            ingested_at: Utc::now(),
            content_hash,
        }
    }
}

/// Hex SHA-256 of a document's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A contiguous span of a document's text, the unit of embedding and retrieval.
///
/// `start` and `end` are character offsets into the document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// Characters shared with the preceding chunk (0 for the first chunk).
    pub overlap: usize,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }

    pub fn label(&self) -> SourceLabel {
        SourceLabel {
            document_id: self.document_id.clone(),
            chunk_index: self.index,
        }
    }
}

/// Attribution tag for a passage, rendered as `<document id>#<chunk index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLabel {
    pub document_id: String,
    pub chunk_index: usize,
}

impl fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document_id, self.chunk_index)
    }
}

/// Identifier of the embedding model that produced a vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An embedding vector tagged with the model that produced it.
///
/// Vectors are only comparable when their model ids match; the vector index
/// rejects anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    model: ModelId,
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(model: ModelId, values: Vec<f32>) -> Self {
        Self { model, values }
    }

    pub fn model(&self) -> &ModelId {
        &self.model
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dims(&self) -> usize {
        self.values.len()
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

/// A chunk paired with its embedding, ready for the vector index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Embedding,
}

impl IndexEntry {
    pub fn new(chunk: Chunk, embedding: Embedding) -> Self {
        Self { chunk, embedding }
    }
}
