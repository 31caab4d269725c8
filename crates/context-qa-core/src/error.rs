//! Error taxonomy for ingestion and query.
//!
//! Transient collaborator failures ([`Error::EmbeddingUnavailable`],
//! [`Error::GenerationUnavailable`], [`Error::CollaboratorTimeout`]) are
//! surfaced per call and never retried here; retrieval is idempotent, so the
//! caller may retry the whole query. Index identity errors
//! ([`Error::DimensionMismatch`], [`Error::ModelMismatch`]) are fatal until
//! the index is rebuilt.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// External collaborator that a call was waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    Embedder,
    Generator,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collaborator::Embedder => write!(f, "embedding service"),
            Collaborator::Generator => write!(f, "generation service"),
        }
    }
}

/// Failure to turn raw file content into plain text.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document kind: {0}")]
    UnsupportedKind(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("content is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("file exceeds the {limit} byte limit ({size} bytes)")]
    TooLarge { size: u64, limit: u64 },
    #[error("failed to read file: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("extraction failed for '{document_id}': {source}")]
    Extraction {
        document_id: String,
        #[source]
        source: ExtractError,
    },

    #[error("document '{0}' is empty after extraction")]
    EmptyDocument(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(
        "embedding dimension mismatch: the index holds {expected}-dimensional vectors but got {found}; \
         rebuild the index with `cqa reindex` after changing embedding models"
    )]
    DimensionMismatch { expected: usize, found: usize },

    #[error(
        "embedding model mismatch: the index was built with '{expected}' but got vectors from '{found}'; \
         rebuild the index with `cqa reindex` after changing embedding models"
    )]
    ModelMismatch { expected: String, found: String },

    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("generation service unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("{collaborator} did not respond within {timeout:?}")]
    CollaboratorTimeout {
        collaborator: Collaborator,
        timeout: Duration,
    },

    #[error("cannot embed empty text")]
    EmptyInput,

    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("unknown template: '{0}'")]
    UnknownTemplate(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    pub fn storage(err: impl fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::EmbeddingUnavailable(_)
                | Error::GenerationUnavailable(_)
                | Error::CollaboratorTimeout { .. }
        )
    }
}
