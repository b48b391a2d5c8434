//! Application configuration.
//!
//! Settings come from an optional TOML file, then environment variables fill
//! in secrets and endpoints the file leaves out. Command-line flags in the
//! binaries override both.
//!
//! ```toml
//! database_path = "/home/me/.local/share/paper-critique/papers.db"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-5.2"
//!
//! [chunking]
//! chunk_size = 800
//! overlap = 120
//!
//! [analysis]
//! tone = "critical"
//! privacyMode = "snippets"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::chunking::{ChunkingOptions, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::embedding::{EmbeddingConfig, EmbeddingProviderKind};
use crate::generation::{AnalysisBounds, GenerationConfig, GenerationProviderKind};
use crate::models::AnalysisOptions;
use crate::retrieval::TaskRetrievalTable;

const APP_DIR: &str = "paper-critique";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file exists but could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    /// Config file is not valid TOML for this schema
    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Chunk sizing, measured by the default token estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE, overlap: DEFAULT_OVERLAP }
    }
}

impl ChunkingSettings {
    pub fn options(&self) -> ChunkingOptions {
        ChunkingOptions::new(self.chunk_size, self.overlap)
    }
}

/// Top-level settings shared by the binaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub chunking: ChunkingSettings,
    pub analysis: AnalysisOptions,
    pub bounds: AnalysisBounds,
    pub retrieval: TaskRetrievalTable,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            chunking: ChunkingSettings::default(),
            analysis: AnalysisOptions::default(),
            bounds: AnalysisBounds::default(),
            retrieval: TaskRetrievalTable::default(),
        }
    }
}

/// `<data dir>/paper-critique/papers.db`, or `papers.db` when no data dir exists.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join("papers.db"))
        .unwrap_or_else(|| PathBuf::from("papers.db"))
}

/// `<config dir>/paper-critique/config.toml`, if a config dir exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

impl AppConfig {
    /// Load settings from `path` (or the default location) and the environment.
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file exists but cannot be read or parsed
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: AppConfig = toml::from_str(&raw)
            .map_err(|e| ConfigError::Parse { path: path.to_path_buf(), message: e.to_string() })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Fill missing secrets and endpoints from environment-style lookups.
    ///
    /// `OPENAI_API_KEY` applies to OpenAI-backed providers without a key;
    /// `OLLAMA_BASE_URL` to Ollama-backed providers without a base URL.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let openai_key = lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty());
        let ollama_url = lookup("OLLAMA_BASE_URL").filter(|v| !v.trim().is_empty());

        match self.embedding.provider {
            EmbeddingProviderKind::OpenAi if self.embedding.api_key.is_none() => {
                self.embedding.api_key = openai_key.clone();
            }
            EmbeddingProviderKind::Ollama if self.embedding.base_url.is_none() => {
                self.embedding.base_url = ollama_url.clone();
            }
            _ => {}
        }
        match self.generation.provider {
            GenerationProviderKind::OpenAi if self.generation.api_key.is_none() => {
                self.generation.api_key = openai_key;
            }
            GenerationProviderKind::Ollama if self.generation.base_url.is_none() => {
                self.generation.base_url = ollama_url;
            }
            _ => {}
        }
    }
}
