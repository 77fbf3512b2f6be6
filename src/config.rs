//! TOML configuration parsing and validation.
//!
//! A single [`Config`] is loaded once by the binary and passed explicitly to
//! every component that needs it. Service credentials are resolved from the
//! environment variable named in `[llm] api_key_env` when the HTTP client is
//! built; nothing is kept in global state.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub keywords: KeywordsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub token_path: Option<PathBuf>,
}

impl DbConfig {
    /// Token log path; defaults to `tokens.sqlite` next to the main database.
    pub fn token_path(&self) -> PathBuf {
        match &self.token_path {
            Some(p) => p.clone(),
            None => self
                .path
                .parent()
                .map(|p| p.join("tokens.sqlite"))
                .unwrap_or_else(|| PathBuf::from("tokens.sqlite")),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            text_model: default_text_model(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_text_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_dims(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_max_input_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_vector_weight() -> f64 {
    0.6
}
fn default_keyword_weight() -> f64 {
    0.4
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_raw_fallback_chars")]
    pub raw_fallback_chars: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            raw_fallback_chars: default_raw_fallback_chars(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec![
        "pptx".to_string(),
        "md".to_string(),
        "txt".to_string(),
        "pdf".to_string(),
    ]
}
fn default_raw_fallback_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeywordsConfig {
    #[serde(default = "default_keywords_path")]
    pub path: PathBuf,
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            path: default_keywords_path(),
        }
    }
}

fn default_keywords_path() -> PathBuf {
    PathBuf::from("./data/keyword_mappings.json")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.max_input_chars == 0 {
        anyhow::bail!("embedding.max_input_chars must be > 0");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    for (name, w) in [
        ("vector_weight", config.retrieval.vector_weight),
        ("keyword_weight", config.retrieval.keyword_weight),
    ] {
        if !w.is_finite() || w < 0.0 {
            anyhow::bail!("retrieval.{} must be a finite, non-negative number", name);
        }
    }

    if config.llm.max_retries > 10 {
        anyhow::bail!("llm.max_retries must be <= 10");
    }
    if config.llm.base_url.trim().is_empty() {
        anyhow::bail!("llm.base_url must not be empty");
    }

    if config.ingest.extensions.is_empty() {
        anyhow::bail!("ingest.extensions must list at least one extension");
    }

    Ok(())
}
