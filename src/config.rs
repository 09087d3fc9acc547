//! TOML configuration parsing and validation.
//!
//! All settings have working defaults so the CLI runs without a config file;
//! `load_config` layers a TOML file on top when one exists.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{CoragError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory holding one subdirectory per document fingerprint.
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/vector_cache"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks. Must be < chunk_size.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Chunks fetched per retrieval, for the seed query and each follow-up.
    pub top_k: usize,
    /// Follow-up retrieval budget of the iterative loop.
    pub max_iterations: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 2,
            max_iterations: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings API.
    pub base_url: String,
    /// Model identifier; stored in every index built with it.
    pub model: String,
    /// Vector dimensionality the model produces.
    pub dims: usize,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "text-embedding-3-small".to_string(),
            dims: 1536,
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    /// Max output token ceiling per completion.
    pub max_tokens: u32,
    /// Character ceiling applied to the synthesis prompt before sending.
    pub input_char_limit: usize,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            input_char_limit: 4000,
            timeout_secs: 60,
        }
    }
}

/// Load configuration from a TOML file, falling back to defaults when the
/// file does not exist. A file that exists but cannot be read or parsed is a
/// configuration error.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoragError::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            CoragError::Config(format!("failed to parse config file {}: {}", path.display(), e))
        })?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        return Err(CoragError::Config("chunking.chunk_size must be > 0".to_string()));
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        return Err(CoragError::Config(format!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap, config.chunking.chunk_size
        )));
    }
    if config.retrieval.top_k == 0 {
        return Err(CoragError::Config("retrieval.top_k must be >= 1".to_string()));
    }
    if config.embedding.dims == 0 {
        return Err(CoragError::Config("embedding.dims must be > 0".to_string()));
    }
    if config.embedding.model.is_empty() {
        return Err(CoragError::Config("embedding.model must not be empty".to_string()));
    }
    if config.model.model.is_empty() {
        return Err(CoragError::Config("model.model must not be empty".to_string()));
    }
    Ok(())
}
