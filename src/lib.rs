//! # Context QA
//!
//! Retrieval-augmented question answering over a local document corpus.
//!
//! The retrieval pipeline itself (chunking, the vector index, retrieval and
//! context assembly) lives in the `context-qa-core` crate. This crate wires
//! it to the outside world: file extraction, HTTP embedding and generation
//! services, SQLite persistence, the `cqa` CLI and the JSON server.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Extractor │──▶│   Chunker   │──▶│   Embedder   │──▶│  Vector  │
//! │ pdf/docx  │   │  (overlap)  │   │ ollama/openai│   │  Index   │◀─┐
//! └───────────┘   └─────────────┘   └──────────────┘   └────┬─────┘  │
//!                                                           │     SQLite
//!            question ──▶ Retriever ──▶ Context Assembler ──▶ Generator
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`extract`] | PDF, DOCX, Markdown and TXT text extraction |
//! | [`embedding`] | Embedding service adapters |
//! | [`generation`] | Answer generation adapters |
//! | [`collaborator`] | Retry and timeout guards for model services |
//! | [`sqlite_store`] | SQLite persistence for documents and vectors |
//! | [`app`] | Wiring from configuration to pipelines |
//! | [`ingest`] | `cqa ingest` |
//! | [`query`] | `cqa query` |
//! | [`documents`] | `cqa list`, `delete`, `clear`, `reindex`, `templates` |
//! | [`stats`] | `cqa stats` |
//! | [`server`] | JSON HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod collaborator;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod query;
pub mod server;
pub mod sqlite_store;
pub mod stats;
