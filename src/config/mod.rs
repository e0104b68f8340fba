//! Layered application configuration.
//!
//! Sources, lowest precedence first: built-in defaults, an optional
//! `citesearch.toml` (or an explicit file), then `CITESEARCH__*` environment
//! variables with `__` between nesting levels, e.g.
//! `CITESEARCH__CHUNKING__CHUNK_SIZE=500`. The binaries apply CLI flags on
//! top of the loaded value.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunking::ChunkingConfig;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "citesearch";

pub const ENV_PREFIX: &str = "CITESEARCH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub query: QuerySettings,
    pub viewer: ViewerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub papers_dir: PathBuf,
    pub bibliography: PathBuf,
    pub index_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingSettings {
    pub fn to_config(&self) -> ConfigResult<ChunkingConfig> {
        ChunkingConfig::new(self.chunk_size, self.chunk_overlap)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Local ONNX model via fastembed
    Fastembed,
    /// OpenAI-compatible embeddings API
    Openai,
    /// Deterministic feature hashing, no model download
    Hashing,
}

impl EmbeddingProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingProviderKind::Fastembed => "fastembed",
            EmbeddingProviderKind::Openai => "openai",
            EmbeddingProviderKind::Hashing => "hashing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    /// Provider-specific model name; each provider has its own default
    #[serde(default)]
    pub model: Option<String>,
    /// Model cache for fastembed; defaults to `<cache dir>/fastembed`
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Vector size. Sets the hashing provider's size and is required for
    /// OpenAI-compatible models of unknown size.
    #[serde(default)]
    pub dimension: Option<usize>,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub api_base: String,
}

impl EmbeddingSettings {
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("fastembed")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    pub top_k: usize,
    pub rewrite: bool,
    pub rewrite_model: String,
    pub rewrite_instruction: String,
    pub rewrite_timeout_secs: u64,
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerSettings {
    pub program: String,
    pub page_arg: String,
}

impl AppConfig {
    /// Load configuration from defaults, `file` (or `citesearch.toml` if
    /// present) and the environment.
    pub fn load(file: Option<&Path>) -> ConfigResult<Self> {
        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let builder = Config::builder()
            .set_default("paths.papers_dir", "./papers")?
            .set_default("paths.bibliography", "./papers/citations.bib")?
            .set_default("paths.index_dir", "./db")?
            .set_default("chunking.chunk_size", 1000)?
            .set_default("chunking.chunk_overlap", 100)?
            .set_default("embedding.provider", "fastembed")?
            .set_default("embedding.batch_size", 64)?
            .set_default("embedding.timeout_secs", 60)?
            .set_default("embedding.api_base", "https://api.openai.com/v1")?
            .set_default("query.top_k", 3)?
            .set_default("query.rewrite", false)?
            .set_default("query.rewrite_model", "gpt-3.5-turbo")?
            .set_default("query.rewrite_instruction", "")?
            .set_default("query.rewrite_timeout_secs", 30)?
            .set_default("query.api_base", "https://api.openai.com/v1")?
            .set_default("viewer.program", "evince")?
            .set_default("viewer.page_arg", crate::viewer::DEFAULT_PAGE_ARG)?
            .add_source(file_source)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );

        let cfg: AppConfig = builder.build()?.try_deserialize()?;
        Ok(cfg)
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> ConfigResult<()> {
        self.chunking.to_config()?;
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be at least 1".to_string()));
        }
        if self.embedding.timeout_secs == 0 {
            return Err(ConfigError::Invalid("embedding.timeout_secs must be at least 1".to_string()));
        }
        if self.embedding.dimension == Some(0) {
            return Err(ConfigError::Invalid("embedding.dimension must be at least 1".to_string()));
        }
        if self.query.top_k == 0 {
            return Err(ConfigError::Invalid("query.top_k must be at least 1".to_string()));
        }
        if self.query.rewrite_timeout_secs == 0 {
            return Err(ConfigError::Invalid("query.rewrite_timeout_secs must be at least 1".to_string()));
        }
        if self.viewer.program.trim().is_empty() {
            return Err(ConfigError::Invalid("viewer.program must not be empty".to_string()));
        }
        Ok(())
    }
}
