//! Configuration parsing and validation.
//!
//! Configuration is a TOML file (default `./config/cqa.toml`). Every section
//! except `[db]` has defaults, so a minimal file only names the database.
//! [`load_config`] validates everything at startup and fails fast on values
//! the pipeline cannot honour.
//!
//! ```toml
//! [db]
//! path = "./data/cqa.sqlite"
//!
//! [chunking]
//! size = 800
//! overlap = 100
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [generation]
//! provider = "ollama"
//! model = "gemma:2b"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use context_qa_core::chunk::{ChunkParams, CHARS_PER_TOKEN};
use context_qa_core::context::{ContextAssembler, PromptTemplate, TemplateSet};
use context_qa_core::qa::DEFAULT_NO_CONTEXT_RESPONSE;
use context_qa_core::retrieve::RetrievalParams;
use context_qa_core::Error;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default = "default_templates")]
    pub templates: BTreeMap<String, TemplateConfig>,
    #[serde(default)]
    pub presets: BTreeMap<String, String>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Unit for sizes in `[chunking]` and `[context]`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    #[default]
    Chars,
    Tokens,
}

impl SizeUnit {
    pub fn to_chars(self, n: usize) -> usize {
        match self {
            SizeUnit::Chars => n,
            SizeUnit::Tokens => n * CHARS_PER_TOKEN,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
    #[serde(default)]
    pub unit: SizeUnit,
    /// How far before `size` a natural break may be taken. Defaults to `size / 10`.
    #[serde(default)]
    pub boundary_window: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
            unit: SizeUnit::Chars,
            boundary_window: None,
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    100
}

impl ChunkingConfig {
    pub fn params(&self) -> Result<ChunkParams, Error> {
        let params = ChunkParams::new(self.unit.to_chars(self.size), self.unit.to_chars(self.overlap))?;
        Ok(match self.boundary_window {
            Some(w) => params.with_boundary_window(self.unit.to_chars(w)),
            None => params,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            dedup_threshold: default_dedup_threshold(),
            candidate_multiplier: default_candidate_multiplier(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_dedup_threshold() -> f32 {
    0.9
}
fn default_candidate_multiplier() -> usize {
    2
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            k: self.k,
            dedup_threshold: self.dedup_threshold,
            candidate_multiplier: self.candidate_multiplier,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_budget")]
    pub budget: usize,
    #[serde(default)]
    pub unit: SizeUnit,
    #[serde(default = "default_template_name")]
    pub default_template: String,
    /// Returned instead of calling the generator when nothing is retrieved.
    #[serde(default = "default_no_context_response")]
    pub no_context_response: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            unit: SizeUnit::Chars,
            default_template: default_template_name(),
            no_context_response: default_no_context_response(),
        }
    }
}

fn default_budget() -> usize {
    6000
}
fn default_template_name() -> String {
    "general".to_string()
}
fn default_no_context_response() -> String {
    DEFAULT_NO_CONTEXT_RESPONSE.to_string()
}

impl ContextConfig {
    pub fn assembler(&self) -> Result<ContextAssembler, Error> {
        ContextAssembler::new(self.unit.to_chars(self.budget))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TemplateConfig {
    pub body: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_templates() -> BTreeMap<String, TemplateConfig> {
    let mut templates = BTreeMap::new();
    templates.insert(
        "general".to_string(),
        TemplateConfig {
            body: "Answer the question using only the context below. \
                   Cite sources by their [label].\n\n\
                   Context:\n{context}\n\nQuestion: {question}\nAnswer: "
                .to_string(),
            description: Some("General question answering".to_string()),
        },
    );
    templates
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash`, `ollama`, `openai`, or `local`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `ollama`, `openai`, or `disabled`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "ollama".to_string()
}
fn default_generation_model() -> String {
    "gemma:2b".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Documents processed in parallel during directory ingestion.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            concurrency: default_concurrency(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.pdf", "**/*.docx", "**/*.txt", "**/*.md"]
        .iter()
        .map(|g| g.to_string())
        .collect()
}
fn default_concurrency() -> usize {
    4
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// Build the template set from `[templates]` and `context.default_template`.
    pub fn template_set(&self) -> Result<TemplateSet, Error> {
        let templates = self
            .templates
            .iter()
            .map(|(name, t)| PromptTemplate::new(name.clone(), t.body.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        TemplateSet::new(templates, self.context.default_template.clone())
    }

    /// Check every value the pipeline depends on.
    pub fn validate(&self) -> Result<(), Error> {
        self.chunking.params()?;
        self.retrieval.params().validate()?;
        self.context.assembler()?;
        self.template_set()?;

        match self.embedding.provider.as_str() {
            "hash" | "ollama" | "openai" | "local" => {}
            other => {
                return Err(Error::configuration(format!(
                    "unknown embedding provider '{}'; expected hash, ollama, openai, or local",
                    other
                )))
            }
        }
        if self.embedding.dims == Some(0) {
            return Err(Error::configuration("embedding.dims must be > 0"));
        }
        if matches!(self.embedding.provider.as_str(), "ollama" | "openai") {
            if self.embedding.model.is_none() {
                return Err(Error::configuration(format!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                )));
            }
            if self.embedding.dims.is_none() {
                return Err(Error::configuration(format!(
                    "embedding.dims must be specified when provider is '{}'",
                    self.embedding.provider
                )));
            }
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::configuration("embedding.batch_size must be > 0"));
        }

        match self.generation.provider.as_str() {
            "ollama" | "openai" | "disabled" => {}
            other => {
                return Err(Error::configuration(format!(
                    "unknown generation provider '{}'; expected ollama, openai, or disabled",
                    other
                )))
            }
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(Error::configuration(
                "generation.temperature must be in [0.0, 2.0]",
            ));
        }
        if self.embedding.timeout_secs == 0 || self.generation.timeout_secs == 0 {
            return Err(Error::configuration("timeout_secs must be > 0"));
        }

        if self.ingest.concurrency == 0 {
            return Err(Error::configuration("ingest.concurrency must be >= 1"));
        }
        for (name, question) in &self.presets {
            if question.trim().is_empty() {
                return Err(Error::configuration(format!("preset '{}' is empty", name)));
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/cqa.sqlite"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.chunking.size, 800);
        assert_eq!(config.chunking.overlap, 100);
        assert_eq!(config.retrieval.k, 5);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.generation.model, "gemma:2b");
        assert!((config.generation.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.template_set().unwrap().default_name(), "general");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse_config(&format!("{}\n[chunking]\nsize = 100\noverlap = 100\n", MINIMAL))
            .unwrap_err();
        let core = err.downcast_ref::<Error>().unwrap();
        assert!(matches!(core, Error::Configuration(_)));
    }

    #[test]
    fn test_token_units_convert() {
        let config = parse_config(&format!(
            "{}\n[chunking]\nsize = 200\noverlap = 25\nunit = \"tokens\"\n",
            MINIMAL
        ))
        .unwrap();
        let params = config.chunking.params().unwrap();
        assert_eq!(params.size(), 800);
        assert_eq!(params.overlap(), 100);
    }

    #[test]
    fn test_rejects_template_without_placeholders() {
        let toml = format!(
            "{}\n[templates.general]\nbody = \"no slots here\"\n",
            MINIMAL
        );
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_rejects_missing_default_template() {
        let toml = format!("{}\n[context]\ndefault_template = \"match\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_rejects_unknown_providers() {
        assert!(parse_config(&format!("{}\n[embedding]\nprovider = \"magic\"\n", MINIMAL)).is_err());
        assert!(parse_config(&format!("{}\n[generation]\nprovider = \"magic\"\n", MINIMAL)).is_err());
    }

    #[test]
    fn test_remote_embedder_needs_model_and_dims() {
        let toml = format!("{}\n[embedding]\nprovider = \"ollama\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
        let toml = format!(
            "{}\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n",
            MINIMAL
        );
        assert!(parse_config(&toml).is_ok());
    }

    #[test]
    fn test_rejects_bad_retrieval_values() {
        assert!(parse_config(&format!("{}\n[retrieval]\nk = 0\n", MINIMAL)).is_err());
        assert!(parse_config(&format!("{}\n[retrieval]\ndedup_threshold = 1.5\n", MINIMAL)).is_err());
        assert!(parse_config(&format!("{}\n[context]\nbudget = 10\n", MINIMAL)).is_err());
    }
}
