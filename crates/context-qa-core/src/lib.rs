//! # Context QA Core
//!
//! The retrieval pipeline behind Context QA: data models, chunking, the
//! in-memory vector index, retrieval with deduplication, budgeted context
//! assembly, and the collaborator traits (embedder, generator, index store).
//!
//! This crate performs no network, filesystem, or database I/O. Concrete
//! collaborators (Ollama/OpenAI adapters, SQLite persistence, file
//! extraction) live in the `context-qa` application crate.
//!
//! ```text
//! ingestion:  text ─▶ chunk ─▶ Embedder ─▶ VectorIndex (+ IndexStore)
//! query:      question ─▶ Embedder ─▶ VectorIndex ─▶ Retriever
//!                 ─▶ ContextAssembler ─▶ Generator ─▶ Answer
//! ```

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod index;
pub mod ingest;
pub mod models;
pub mod qa;
pub mod retrieve;
pub mod store;

pub use error::{Collaborator, Error, ExtractError, Result};
