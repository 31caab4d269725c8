//! Embedding service adapters.
//!
//! Implements the core [`Embedder`] trait for the configured provider:
//!
//! | `embedding.provider` | Adapter |
//! |----------------------|---------|
//! | `"hash"` | core `HashEmbedder` (offline, deterministic) |
//! | `"ollama"` | [`RemoteEmbedder`] calling `POST /api/embed` |
//! | `"openai"` | [`RemoteEmbedder`] calling `POST /v1/embeddings` |
//! | `"local"` | `LocalEmbedder` (fastembed, behind `local-embeddings-fastembed`) |
//!
//! Remote adapters split input into `embedding.batch_size` batches, retry
//! transient HTTP failures (see [`crate::collaborator`]) and bound each
//! batch with `embedding.timeout_secs`. Every returned vector is checked
//! against the configured dimensionality.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use context_qa_core::embedding::{Embedder, HashEmbedder};
use context_qa_core::models::{Embedding, ModelId};
use context_qa_core::{Collaborator, Error, Result};

use crate::collaborator::{base_url, post_json_with_retry, with_timeout, JsonRequest};
use crate::config::EmbeddingConfig;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const OPENAI_URL: &str = "https://api.openai.com";
const DEFAULT_HASH_DIMS: usize = 256;

/// Build the embedder named by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        )?)),
        "ollama" => Ok(Arc::new(RemoteEmbedder::ollama(config)?)),
        "openai" => Ok(Arc::new(RemoteEmbedder::openai(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(local::LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

enum Api {
    Ollama { url: String },
    OpenAI { url: String, api_key: String },
}

/// Embedder backed by an HTTP embedding service.
pub struct RemoteEmbedder {
    api: Api,
    client: reqwest::Client,
    model: ModelId,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    timeout: Duration,
}

impl RemoteEmbedder {
    /// Embedder for a local Ollama instance (default `http://localhost:11434`).
    pub fn ollama(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Self::build(config, Api::Ollama { url })
    }

    /// Embedder for the OpenAI API. Requires `OPENAI_API_KEY`.
    pub fn openai(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        let url = config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string());
        Self::build(config, Api::OpenAI { url, api_key })
    }

    fn build(config: &EmbeddingConfig, api: Api) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .context("embedding.model required for remote embedding providers")?;
        let dims = config
            .dims
            .context("embedding.dims required for remote embedding providers")?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;

        Ok(Self {
            api,
            client,
            model: ModelId::new(model),
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            timeout,
        })
    }

    async fn call(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let (url, token, service, parse): (String, Option<&str>, &str, Parser) = match &self.api {
            Api::Ollama { url } => (
                format!("{}/api/embed", base_url(url)),
                None,
                "Ollama",
                parse_ollama_response,
            ),
            Api::OpenAI { url, api_key } => (
                format!("{}/v1/embeddings", base_url(url)),
                Some(api_key.as_str()),
                "OpenAI",
                parse_openai_response,
            ),
        };
        let body = serde_json::json!({
            "model": self.model.as_str(),
            "input": texts,
        });

        let json = post_json_with_retry(
            &self.client,
            JsonRequest {
                url: &url,
                body: &body,
                bearer_token: token,
                max_retries: self.max_retries,
                service,
            },
        )
        .await
        .map_err(Error::EmbeddingUnavailable)?;

        parse(&json).map_err(Error::EmbeddingUnavailable)
    }

    fn wrap(&self, vectors: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Embedding>> {
        if vectors.len() != expected {
            return Err(Error::EmbeddingUnavailable(format!(
                "service returned {} vectors for {} inputs",
                vectors.len(),
                expected
            )));
        }
        vectors
            .into_iter()
            .map(|values| {
                if values.len() != self.dims {
                    return Err(Error::DimensionMismatch {
                        expected: self.dims,
                        found: values.len(),
                    });
                }
                Ok(Embedding::new(self.model.clone(), values))
            })
            .collect()
    }
}

type Parser = fn(&serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, String>;

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn model_id(&self) -> &ModelId {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::EmptyInput);
        }

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors =
                with_timeout(Collaborator::Embedder, self.timeout, self.call(batch)).await?;
            out.extend(self.wrap(vectors, batch.len())?);
        }
        tracing::debug!(model = %self.model, count = out.len(), "embedded batch");
        Ok(out)
    }
}

fn json_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Extract `embeddings[]` from an Ollama `/api/embed` response.
fn parse_ollama_response(json: &serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, String> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or("Invalid Ollama response: missing embeddings array")?
        .iter()
        .map(|e| json_vector(e).ok_or_else(|| "Invalid Ollama response: bad embedding".to_string()))
        .collect()
}

/// Extract `data[].embedding` from an OpenAI response, ordered by `index`.
fn parse_openai_response(json: &serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, String> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or("Invalid OpenAI response: missing data array")?;

    let mut indexed = data
        .iter()
        .enumerate()
        .map(|(pos, item)| {
            let index = item
                .get("index")
                .and_then(|i| i.as_u64())
                .unwrap_or(pos as u64);
            let vector = item
                .get("embedding")
                .and_then(json_vector)
                .ok_or_else(|| "Invalid OpenAI response: missing embedding".to_string())?;
            Ok((index, vector))
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    //! In-process embeddings via fastembed. Models are downloaded from
    //! Hugging Face on first use and cached; later runs are offline.

    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::bail;
    use async_trait::async_trait;
    use context_qa_core::embedding::Embedder;
    use context_qa_core::models::{Embedding, ModelId};
    use context_qa_core::{Collaborator, Error, Result};

    use crate::collaborator::with_timeout;
    use crate::config::EmbeddingConfig;

    const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

    pub struct LocalEmbedder {
        model: ModelId,
        dims: usize,
        variant: fastembed::EmbeddingModel,
        batch_size: usize,
        timeout: Duration,
        engine: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
            let name = config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
            let variant = config_to_fastembed_model(&name)?;
            let dims = config.dims.unwrap_or_else(|| default_dims(&name));
            Ok(Self {
                model: ModelId::new(name),
                dims,
                variant,
                batch_size: config.batch_size.max(1),
                timeout: Duration::from_secs(config.timeout_secs),
                engine: Arc::new(Mutex::new(None)),
            })
        }
    }

    fn default_dims(name: &str) -> usize {
        match name {
            "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
            "multilingual-e5-base" => 768,
            "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
            _ => 384,
        }
    }

    fn config_to_fastembed_model(name: &str) -> anyhow::Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
            "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1, nomic-embed-text-v1.5, \
                 multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
                other
            ),
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_id(&self) -> &ModelId {
            &self.model
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            let mut out = self.embed_batch(&[text.to_string()]).await?;
            out.pop()
                .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding output".to_string()))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            if texts.iter().any(|t| t.trim().is_empty()) {
                return Err(Error::EmptyInput);
            }

            let engine = Arc::clone(&self.engine);
            let variant = self.variant.clone();
            let batch_size = self.batch_size;
            let inputs = texts.to_vec();

            let task = async move {
                let handle = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                    let mut guard = engine
                        .lock()
                        .map_err(|_| Error::EmbeddingUnavailable("model lock poisoned".into()))?;
                    if guard.is_none() {
                        let model = fastembed::TextEmbedding::try_new(
                            fastembed::InitOptions::new(variant)
                                .with_show_download_progress(true),
                        )
                        .map_err(|e| {
                            Error::EmbeddingUnavailable(format!(
                                "failed to initialize local embedding model: {}",
                                e
                            ))
                        })?;
                        *guard = Some(model);
                    }
                    let model = guard.as_mut().ok_or_else(|| {
                        Error::EmbeddingUnavailable("local model not initialized".into())
                    })?;
                    model.embed(inputs, Some(batch_size)).map_err(|e| {
                        Error::EmbeddingUnavailable(format!("local embedding failed: {}", e))
                    })
                });
                match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(Error::EmbeddingUnavailable(e.to_string())),
                }
            };

            let vectors = with_timeout(Collaborator::Embedder, self.timeout, task).await?;
            vectors
                .into_iter()
                .map(|values| {
                    if values.len() != self.dims {
                        return Err(Error::DimensionMismatch {
                            expected: self.dims,
                            found: values.len(),
                        });
                    }
                    Ok(Embedding::new(self.model.clone(), values))
                })
                .collect()
        }
    }
}
