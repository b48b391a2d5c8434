//! Critique generation backends.
//!
//! A backend turns a paper description plus per-task evidence into an
//! [`Analysis`]. Backends only implement [`GenerationProvider::complete`]; the
//! provided [`GenerationProvider::generate_analysis`] builds the prompt,
//! sends it, and runs the two-stage parse and validation from [`response`].
//!
//! Supported backends:
//!
//! - [`openai::OpenAIGeneration`]: chat completions in JSON-object mode
//! - [`ollama::OllamaGeneration`]: `/api/generate` with `format: json`

pub mod ollama;
pub mod openai;
pub mod prompt;
pub mod response;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{Analysis, AnalysisOptions};
use crate::retrieval::TaskChunks;

pub use prompt::{build_analysis_prompt, PaperPrompt, PromptTarget};
pub use response::{parse_analysis_response, validate_analysis, AnalysisBounds};

/// System message sent with every analysis request.
pub const SYSTEM_PROMPT: &str = "You are an expert research paper reviewer. Generate structured, evidence-based critiques. Always output valid JSON only, no markdown.";

/// Errors that can occur while generating an analysis.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Missing API key or unusable settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider exists in configuration but cannot generate
    #[error("Unsupported generation provider: {0}")]
    UnsupportedProvider(String),

    /// Network failure or non-success status
    #[error("API request failed: {0}")]
    Api(String),

    /// Backend answered without any content
    #[error("Empty response from LLM")]
    EmptyResponse,

    /// Content is not JSON, even after fenced-block extraction
    #[error("Invalid JSON response: {0}")]
    InvalidResponse(String),

    /// JSON does not satisfy the analysis schema
    #[error("Analysis failed schema validation: {}", .0.join("; "))]
    SchemaValidation(Vec<String>),
}

/// Result type for generation operations.
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Trait for analysis generation backends.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Send one system + user message pair and return the raw reply text.
    ///
    /// # Errors
    /// - `GenerationError::Api` on transport failures or non-2xx statuses
    /// - `GenerationError::EmptyResponse` when the reply has no content
    async fn complete(&self, system: &str, prompt: &str) -> GenerationResult<String>;

    /// Short provider identifier recorded in `modelMeta.provider`.
    fn provider_name(&self) -> &str;

    /// Model identifier recorded in `modelMeta.model`.
    fn model_name(&self) -> &str;

    /// Generate and validate a critique from retrieved evidence.
    ///
    /// # Errors
    /// Any error from [`complete`](Self::complete), or
    /// `InvalidResponse`/`SchemaValidation` from parsing the reply
    async fn generate_analysis(
        &self,
        paper: &PaperPrompt,
        retrieved: &[TaskChunks],
        options: &AnalysisOptions,
        bounds: &AnalysisBounds,
    ) -> GenerationResult<Analysis> {
        let target = PromptTarget::new(self.provider_name(), self.model_name(), *bounds);
        let prompt = build_analysis_prompt(paper, retrieved, options, &target);
        debug!("Analysis prompt is {} characters", prompt.len());

        let raw = self.complete(SYSTEM_PROMPT, &prompt).await?;
        parse_analysis_response(&raw, bounds)
    }
}

/// Generation backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProviderKind {
    #[default]
    OpenAi,
    Anthropic,
    Ollama,
}

impl GenerationProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationProviderKind::OpenAi => "openai",
            GenerationProviderKind::Anthropic => "anthropic",
            GenerationProviderKind::Ollama => "ollama",
        }
    }
}

impl FromStr for GenerationProviderKind {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(GenerationProviderKind::OpenAi),
            "anthropic" => Ok(GenerationProviderKind::Anthropic),
            "ollama" => Ok(GenerationProviderKind::Ollama),
            other => Err(GenerationError::UnsupportedProvider(format!("unknown provider '{}'", other))),
        }
    }
}

/// Generation backend configuration.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: GenerationProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl GenerationConfig {
    pub fn new(provider: GenerationProviderKind) -> Self {
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

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Runtime-selected generation backend.
#[derive(Debug)]
pub enum AnyGenerationProvider {
    OpenAi(openai::OpenAIGeneration),
    Ollama(ollama::OllamaGeneration),
}

impl AnyGenerationProvider {
    /// Build the backend described by `config`.
    ///
    /// # Errors
    /// - `GenerationError::Config` when the OpenAI key is missing
    /// - `GenerationError::UnsupportedProvider` for Anthropic
    pub fn from_config(config: &GenerationConfig) -> GenerationResult<Self> {
        let provider = match config.provider {
            GenerationProviderKind::OpenAi => {
                let api_key = config
                    .api_key
                    .clone()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| GenerationError::Config("OpenAI API key required".to_string()))?;
                let mut provider = openai::OpenAIGeneration::new(api_key, config.model.clone())?;
                if let Some(base_url) = &config.base_url {
                    provider = provider.with_base_url(base_url);
                }
                AnyGenerationProvider::OpenAi(provider)
            }
            GenerationProviderKind::Ollama => AnyGenerationProvider::Ollama(ollama::OllamaGeneration::new(
                config.base_url.clone(),
                config.model.clone(),
            )?),
            GenerationProviderKind::Anthropic => {
                return Err(GenerationError::UnsupportedProvider(
                    "Anthropic generation not supported. Use OpenAI or Ollama.".to_string(),
                ))
            }
        };

        info!(
            "Generation provider initialized: provider={}, model={}",
            provider.provider_name(),
            provider.model_name()
        );
        Ok(provider)
    }
}

#[async_trait]
impl GenerationProvider for AnyGenerationProvider {
    async fn complete(&self, system: &str, prompt: &str) -> GenerationResult<String> {
        match self {
            AnyGenerationProvider::OpenAi(p) => p.complete(system, prompt).await,
            AnyGenerationProvider::Ollama(p) => p.complete(system, prompt).await,
        }
    }

    fn provider_name(&self) -> &str {
        match self {
            AnyGenerationProvider::OpenAi(p) => p.provider_name(),
            AnyGenerationProvider::Ollama(p) => p.provider_name(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            AnyGenerationProvider::OpenAi(p) => p.model_name(),
            AnyGenerationProvider::Ollama(p) => p.model_name(),
        }
    }
}
