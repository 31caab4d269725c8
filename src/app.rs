//! Process wiring: one place that turns a [`Config`] into a working pipeline.
//!
//! The CLI and the HTTP server both open an [`App`], which owns the SQLite
//! store, the in-memory vector index, the configured collaborators, and the
//! ingestion and query pipelines built on top of them.

use std::sync::Arc;

use anyhow::{Context, Result};
use context_qa_core::embedding::Embedder;
use context_qa_core::index::{IndexIdentity, VectorIndex};
use context_qa_core::ingest::Ingestor;
use context_qa_core::qa::QaPipeline;
use context_qa_core::retrieve::Retriever;
use context_qa_core::store::{load_into, IndexStore};
use context_qa_core::Error;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::sqlite_store::SqliteStore;

/// Whether to populate the vector index from the store on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLoad {
    /// Restore persisted vectors; fails if they were built by another model.
    Restore,
    /// Start empty. Used by `reindex`, which rebuilds everything anyway.
    Skip,
}

pub struct App {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub index: Arc<VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub ingestor: Arc<Ingestor>,
    pub pipeline: Arc<QaPipeline>,
}

impl App {
    pub async fn open(config: &Config, load: IndexLoad) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(config).await?);
        let index = Arc::new(VectorIndex::new());
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;

        if load == IndexLoad::Restore {
            let expected = IndexIdentity::new(embedder.model_id().clone(), embedder.dims());
            let chunks = load_into(store.as_ref(), &index, &expected)
                .await
                .map_err(|e| match e {
                    Error::ModelMismatch { .. } | Error::DimensionMismatch { .. } => {
                        anyhow::Error::new(e).context(
                            "the stored index does not match the configured embedder; \
                             run `cqa reindex` to rebuild it",
                        )
                    }
                    other => anyhow::Error::new(other),
                })?;
            tracing::info!(
                chunks,
                documents = index.document_count(),
                model = %embedder.model_id(),
                "vector index ready"
            );
        }

        let ingestor = Ingestor::new(
            config.chunking.params()?,
            embedder.clone(),
            index.clone(),
            store.clone() as Arc<dyn IndexStore>,
        );

        let retriever = Retriever::new(embedder.clone(), index.clone(), config.retrieval.params());
        let pipeline = QaPipeline::new(
            retriever,
            config.context.assembler()?,
            generator,
            config.template_set()?,
        )
        .with_temperature(config.generation.temperature)
        .with_no_context_response(config.context.no_context_response.clone());

        Ok(Self {
            config: config.clone(),
            store,
            index,
            embedder,
            ingestor: Arc::new(ingestor),
            pipeline: Arc::new(pipeline),
        })
    }

    /// Release the database pool so all WAL writes land before exit.
    pub async fn close(&self) {
        self.store.close().await;
    }
}

/// Open the store only, for commands that never embed or generate.
pub async fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(config)
        .await
        .with_context(|| format!("Failed to open database at {}", config.db.path.display()))
}
