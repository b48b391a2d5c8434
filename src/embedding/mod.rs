//! Embedding provider abstraction and implementations.
//!
//! This module defines the interface for text embedding generation and provides
//! implementations for the supported backends:
//!
//! - [`openai::OpenAIEmbedding`]: batch-capable, one request for N texts
//! - [`ollama::OllamaEmbedding`]: sequential-only, one request per text
//! - `fastembed::FastEmbedProvider`: local ONNX models (feature `local-embed`)
//!
//! Backends are selected at runtime through [`EmbeddingConfig`] and the closed
//! [`AnyEmbeddingProvider`] enum, so the pipeline stays generic over a single
//! provider type.

pub mod centroid;
#[cfg(feature = "local-embed")]
pub mod fastembed;
pub mod ollama;
pub mod openai;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use centroid::{compute_centroid, mean_vector};

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Network or API communication error
    #[error("API request failed: {0}")]
    Api(String),

    /// Invalid input text or vectors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (e.g., missing API key)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider exists in configuration but cannot embed
    #[error("Unsupported embedding provider: {0}")]
    UnsupportedProvider(String),

    /// Operation needs at least one input
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// Other unexpected errors
    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for text embedding providers.
///
/// Implementors of this trait can generate vector embeddings from text inputs.
/// The trait is async to support API-based embedding services.
///
/// # Example Usage
/// ```ignore
/// let provider = OpenAIEmbedding::new(api_key, None)?;
/// let vectors = provider.embed_batch(&["first chunk", "second chunk"]).await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Errors
    /// Returns `EmbeddingError` if the embedding generation fails
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order.
    ///
    /// Batch-capable backends send a single request; others loop over
    /// `embed`. An empty slice returns an empty vector.
    ///
    /// # Errors
    /// Returns `EmbeddingError` if any embedding generation fails
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Get the dimension of embeddings produced by this provider.
    ///
    /// Returns 0 when the dimension is not known until the first response.
    fn dimension(&self) -> usize;

    /// Get the model name/identifier for this provider.
    fn model_name(&self) -> &str;
}

/// Embedding backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    OpenAi,
    Anthropic,
    Ollama,
    Local,
}

impl EmbeddingProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingProviderKind::OpenAi => "openai",
            EmbeddingProviderKind::Anthropic => "anthropic",
            EmbeddingProviderKind::Ollama => "ollama",
            EmbeddingProviderKind::Local => "local",
        }
    }
}

impl FromStr for EmbeddingProviderKind {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(EmbeddingProviderKind::OpenAi),
            "anthropic" => Ok(EmbeddingProviderKind::Anthropic),
            "ollama" => Ok(EmbeddingProviderKind::Ollama),
            "local" | "fastembed" => Ok(EmbeddingProviderKind::Local),
            other => Err(EmbeddingError::UnsupportedProvider(format!("unknown provider '{}'", other))),
        }
    }
}

/// Embedding backend configuration.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl EmbeddingConfig {
    pub fn new(provider: EmbeddingProviderKind) -> Self {
        Self { provider, ..Self::default() }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Runtime-selected embedding provider.
#[derive(Debug)]
pub enum AnyEmbeddingProvider {
    OpenAi(openai::OpenAIEmbedding),
    Ollama(ollama::OllamaEmbedding),
    #[cfg(feature = "local-embed")]
    Local(fastembed::FastEmbedProvider),
}

impl AnyEmbeddingProvider {
    /// Build the provider described by `config`.
    ///
    /// # Errors
    /// - `EmbeddingError::Config` when a required API key is missing
    /// - `EmbeddingError::UnsupportedProvider` for Anthropic (no embeddings
    ///   endpoint) or the local backend in builds without `local-embed`
    pub fn from_config(config: &EmbeddingConfig) -> EmbeddingResult<Self> {
        let provider = match config.provider {
            EmbeddingProviderKind::OpenAi => {
                let api_key = config
                    .api_key
                    .clone()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| EmbeddingError::Config("OpenAI API key required".to_string()))?;
                let mut provider = openai::OpenAIEmbedding::new(api_key, config.model.clone())?;
                if let Some(base_url) = &config.base_url {
                    provider = provider.with_base_url(base_url);
                }
                AnyEmbeddingProvider::OpenAi(provider)
            }
            EmbeddingProviderKind::Ollama => AnyEmbeddingProvider::Ollama(ollama::OllamaEmbedding::new(
                config.base_url.clone(),
                config.model.clone(),
            )?),
            EmbeddingProviderKind::Anthropic => {
                return Err(EmbeddingError::UnsupportedProvider(
                    "Anthropic embeddings not supported. Use OpenAI or Ollama.".to_string(),
                ))
            }
            #[cfg(feature = "local-embed")]
            EmbeddingProviderKind::Local => {
                AnyEmbeddingProvider::Local(fastembed::FastEmbedProvider::from_name(config.model.as_deref(), None)?)
            }
            #[cfg(not(feature = "local-embed"))]
            EmbeddingProviderKind::Local => {
                return Err(EmbeddingError::UnsupportedProvider(
                    "local embeddings require the `local-embed` feature".to_string(),
                ))
            }
        };

        info!(
            "Embedding provider initialized: provider={}, model={}",
            config.provider.as_str(),
            provider.model_name()
        );
        Ok(provider)
    }
}

#[async_trait]
impl EmbeddingProvider for AnyEmbeddingProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        match self {
            AnyEmbeddingProvider::OpenAi(p) => p.embed(text).await,
            AnyEmbeddingProvider::Ollama(p) => p.embed(text).await,
            #[cfg(feature = "local-embed")]
            AnyEmbeddingProvider::Local(p) => p.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        match self {
            AnyEmbeddingProvider::OpenAi(p) => p.embed_batch(texts).await,
            AnyEmbeddingProvider::Ollama(p) => p.embed_batch(texts).await,
            #[cfg(feature = "local-embed")]
            AnyEmbeddingProvider::Local(p) => p.embed_batch(texts).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            AnyEmbeddingProvider::OpenAi(p) => p.dimension(),
            AnyEmbeddingProvider::Ollama(p) => p.dimension(),
            #[cfg(feature = "local-embed")]
            AnyEmbeddingProvider::Local(p) => p.dimension(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            AnyEmbeddingProvider::OpenAi(p) => p.model_name(),
            AnyEmbeddingProvider::Ollama(p) => p.model_name(),
            #[cfg(feature = "local-embed")]
            AnyEmbeddingProvider::Local(p) => p.model_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_requires_api_key() {
        let result = AnyEmbeddingProvider::from_config(&EmbeddingConfig::new(EmbeddingProviderKind::OpenAi));
        assert!(matches!(result, Err(EmbeddingError::Config(_))));

        let blank = EmbeddingConfig::new(EmbeddingProviderKind::OpenAi).with_api_key("  ");
        assert!(matches!(AnyEmbeddingProvider::from_config(&blank), Err(EmbeddingError::Config(_))));
    }

    #[test]
    fn test_anthropic_is_unsupported() {
        let config = EmbeddingConfig::new(EmbeddingProviderKind::Anthropic).with_api_key("sk-ant");
        assert!(matches!(
            AnyEmbeddingProvider::from_config(&config),
            Err(EmbeddingError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_unknown_provider_name() {
        assert!(matches!(
            "cohere".parse::<EmbeddingProviderKind>(),
            Err(EmbeddingError::UnsupportedProvider(_))
        ));
        assert_eq!("Ollama".parse::<EmbeddingProviderKind>().unwrap(), EmbeddingProviderKind::Ollama);
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let provider = AnyEmbeddingProvider::from_config(&EmbeddingConfig::new(EmbeddingProviderKind::Ollama)).unwrap();
        assert_eq!(provider.model_name(), ollama::DEFAULT_OLLAMA_EMBEDDING_MODEL);
    }

    #[test]
    fn test_openai_default_model() {
        let config = EmbeddingConfig::new(EmbeddingProviderKind::OpenAi).with_api_key("sk-test");
        let provider = AnyEmbeddingProvider::from_config(&config).unwrap();
        assert_eq!(provider.model_name(), "text-embedding-3-small");
        assert_eq!(provider.dimension(), 1536);
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = EmbeddingConfig::new(EmbeddingProviderKind::OpenAi).with_api_key("sk-secret");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
