//! Ollama embedding provider.
//!
//! Ollama's `/api/embeddings` endpoint takes one prompt per request, so
//! `embed_batch` issues one sequential round-trip per text. Large papers
//! therefore take time proportional to their chunk count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};

/// Default local Ollama server.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Default Ollama embedding model.
pub const DEFAULT_OLLAMA_EMBEDDING_MODEL: &str = "nomic-embed-text";

#[derive(Debug)]
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    /// Known up front for common models, otherwise learned from the first response
    dimension: AtomicUsize,
}

impl OllamaEmbedding {
    /// Create a provider for the given server and model.
    ///
    /// # Errors
    /// Returns `EmbeddingError::Config` if the HTTP client cannot be built
    pub fn new(base_url: Option<String>, model: Option<String>) -> EmbeddingResult<Self> {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let model = model.unwrap_or_else(|| DEFAULT_OLLAMA_EMBEDDING_MODEL.to_string());
        let dimension = match model.as_str() {
            "nomic-embed-text" => 768,
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            _ => 0,
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| EmbeddingError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url, model, dimension: AtomicUsize::new(dimension) })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&OllamaEmbeddingRequest { model: &self.model, prompt: text })
            .send()
            .await
            .map_err(|e| EmbeddingError::Api(format!("Ollama embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api(format!("Ollama embedding failed ({}): {}", status, body)));
        }

        let parsed: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Api(format!("failed to parse Ollama response: {}", e)))?;
        if parsed.embedding.is_empty() {
            return Err(EmbeddingError::Api("Ollama returned an empty embedding".to_string()));
        }

        self.dimension.store(parsed.embedding.len(), Ordering::Relaxed);
        Ok(parsed.embedding)
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        debug!("Embedding {} texts sequentially via Ollama model {}", texts.len(), self.model);
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}
