//! Answer generator trait.
//!
//! Adapters for Ollama and OpenAI-compatible chat endpoints live in the
//! `context-qa` app crate.

use async_trait::async_trait;

use crate::error::Result;

/// Language model that turns a filled prompt into answer text.
///
/// Implementations fail with [`Error::GenerationUnavailable`](crate::Error::GenerationUnavailable)
/// when the backing service cannot be reached.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String>;
}
