//! Answer generation adapters.
//!
//! `generation.provider` selects one of:
//! - `"ollama"`: `POST /api/generate` on a local Ollama (default model
//!   `gemma:2b`), non-streaming.
//! - `"openai"`: `POST /v1/chat/completions` with the prompt as a single user
//!   message. Requires `OPENAI_API_KEY`.
//! - `"disabled"`: every call fails with `GenerationUnavailable`. Useful with
//!   `cqa query --dry-run` and for retrieval-only deployments.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use context_qa_core::generate::Generator;
use context_qa_core::{Collaborator, Error, Result};

use crate::collaborator::{base_url, post_json_with_retry, with_timeout, JsonRequest};
use crate::config::GenerationConfig;
use crate::embedding::DEFAULT_OLLAMA_URL;

const OPENAI_URL: &str = "https://api.openai.com";

pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(RemoteGenerator::ollama(config)?)),
        "openai" => Ok(Arc::new(RemoteGenerator::openai(config)?)),
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// Generator that refuses every call.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_id(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
        Err(Error::GenerationUnavailable(
            "generation is disabled (generation.provider = \"disabled\")".to_string(),
        ))
    }
}

enum Api {
    Ollama { url: String },
    OpenAI { url: String, api_key: String },
}

pub struct RemoteGenerator {
    api: Api,
    client: reqwest::Client,
    model: String,
    max_retries: u32,
    timeout: Duration,
}

impl RemoteGenerator {
    pub fn ollama(config: &GenerationConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Self::build(config, Api::Ollama { url })
    }

    pub fn openai(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        let url = config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string());
        Self::build(config, Api::OpenAI { url, api_key })
    }

    fn build(config: &GenerationConfig, api: Api) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            api,
            client,
            model: config.model.clone(),
            max_retries: config.max_retries,
            timeout,
        })
    }

    async fn call(&self, prompt: &str, temperature: f32) -> Result<String> {
        let (url, token, service, body) = match &self.api {
            Api::Ollama { url } => (
                format!("{}/api/generate", base_url(url)),
                None,
                "Ollama",
                serde_json::json!({
                    "model": self.model,
                    "prompt": prompt,
                    "stream": false,
                    "options": { "temperature": temperature },
                }),
            ),
            Api::OpenAI { url, api_key } => (
                format!("{}/v1/chat/completions", base_url(url)),
                Some(api_key.as_str()),
                "OpenAI",
                serde_json::json!({
                    "model": self.model,
                    "messages": [{ "role": "user", "content": prompt }],
                    "temperature": temperature,
                }),
            ),
        };

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
        .map_err(Error::GenerationUnavailable)?;

        let text = match self.api {
            Api::Ollama { .. } => json.get("response").and_then(|r| r.as_str()),
            Api::OpenAI { .. } => json
                .pointer("/choices/0/message/content")
                .and_then(|c| c.as_str()),
        };
        text.map(str::to_string).ok_or_else(|| {
            Error::GenerationUnavailable(format!("{} response has no generated text", service))
        })
    }
}

#[async_trait]
impl Generator for RemoteGenerator {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        tracing::debug!(model = %self.model, prompt_chars = prompt.chars().count(), "generating");
        with_timeout(
            Collaborator::Generator,
            self.timeout,
            self.call(prompt, temperature),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn ollama_config(url: String, timeout_secs: u64) -> GenerationConfig {
        GenerationConfig {
            url: Some(url),
            max_retries: 0,
            timeout_secs,
            ..GenerationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_ollama_generate_echoes_request() {
        async fn generate(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
            let reply = format!(
                "{}|{}|{}",
                body["model"].as_str().unwrap_or(""),
                body["stream"],
                body["options"]["temperature"]
            );
            Json(serde_json::json!({ "response": reply, "done": true }))
        }
        let url = serve(Router::new().route("/api/generate", post(generate))).await;

        let generator = RemoteGenerator::ollama(&ollama_config(url, 5)).unwrap();
        let text = generator.generate("prompt", 0.5).await.unwrap();
        assert_eq!(text, "gemma:2b|false|0.5");
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        async fn reject() -> (axum::http::StatusCode, &'static str) {
            (axum::http::StatusCode::NOT_FOUND, "model not found")
        }
        let url = serve(Router::new().route("/api/generate", post(reject))).await;

        let mut config = ollama_config(url, 5);
        config.max_retries = 3;
        let generator = RemoteGenerator::ollama(&config).unwrap();
        let started = std::time::Instant::now();
        let err = generator.generate("prompt", 0.1).await.unwrap_err();
        assert!(matches!(err, Error::GenerationUnavailable(ref m) if m.contains("model not found")));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_slow_generator_times_out() {
        async fn slow() -> Json<serde_json::Value> {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(serde_json::json!({ "response": "late" }))
        }
        let url = serve(Router::new().route("/api/generate", post(slow))).await;

        let generator = RemoteGenerator::ollama(&ollama_config(url, 1)).unwrap();
        let err = generator.generate("prompt", 0.1).await.unwrap_err();
        assert!(matches!(
            err,
            Error::CollaboratorTimeout {
                collaborator: Collaborator::Generator,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_disabled_generator() {
        let config = GenerationConfig {
            provider: "disabled".to_string(),
            ..GenerationConfig::default()
        };
        let generator = create_generator(&config).unwrap();
        assert_eq!(generator.model_id(), "disabled");
        assert!(matches!(
            generator.generate("x", 0.1).await,
            Err(Error::GenerationUnavailable(_))
        ));
    }
}
