//! FastEmbed embedding provider implementation.
//!
//! Runs ONNX embedding models locally through the fastembed library, so chunk
//! text never leaves the machine. Model weights are downloaded into the cache
//! directory on first use. Only compiled with the `local-embed` feature.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::Mutex;

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};

/// FastEmbed embedding provider.
#[derive(Clone)]
pub struct FastEmbedProvider {
    /// The embedding model instance (wrapped in Arc<Mutex> for thread-safety)
    model: Arc<Mutex<TextEmbedding>>,

    model_name: String,

    embedding_dimension: usize,
}

impl FastEmbedProvider {
    /// Create a provider for `model` (defaults to AllMiniLML6V2).
    ///
    /// # Errors
    /// Returns `EmbeddingError::Config` if model initialization fails
    pub fn new(model: Option<EmbeddingModel>, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let model_type = model.unwrap_or(EmbeddingModel::AllMiniLML6V2);
        let model_name = format!("{:?}", model_type);
        let embedding_dimension = match model_type {
            EmbeddingModel::AllMiniLML6V2 => 384,
            EmbeddingModel::BGESmallENV15 => 384,
            EmbeddingModel::BGEBaseENV15 => 768,
            EmbeddingModel::BGELargeENV15 => 1024,
            EmbeddingModel::NomicEmbedTextV15 => 768,
            _ => 384,
        };

        let cache_dir = cache_dir.unwrap_or_else(default_cache_dir);
        let init_options = InitOptions::new(model_type).with_cache_dir(cache_dir);
        let text_embedding = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::Config(format!("Failed to initialize FastEmbed model: {}", e)))?;

        Ok(Self { model: Arc::new(Mutex::new(text_embedding)), model_name, embedding_dimension })
    }

    /// Create a provider from a short model name as used in config files.
    ///
    /// # Errors
    /// Returns `EmbeddingError::Config` for unknown names or failed initialization
    pub fn from_name(name: Option<&str>, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let model = match name.map(|n| n.to_ascii_lowercase()) {
            None => None,
            Some(n) => Some(match n.as_str() {
                "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
                "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
                "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
                "bge-large-en-v1.5" => EmbeddingModel::BGELargeENV15,
                "nomic-embed-text-v1.5" => EmbeddingModel::NomicEmbedTextV15,
                other => return Err(EmbeddingError::Config(format!("unknown local model '{}'", other))),
            }),
        };
        Self::new(model, cache_dir)
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|p| p.join("fastembed"))
        .unwrap_or_else(|| PathBuf::from(".cache/fastembed"))
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Other("No embedding generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("All texts must be non-empty".to_string()));
        }

        let mut model = self.model.lock().await;
        let owned: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        model
            .embed(owned, None)
            .map_err(|e| EmbeddingError::Other(format!("Batch embedding generation failed: {}", e)))
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("embedding_dimension", &self.embedding_dimension)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_name_rejected() {
        let result = FastEmbedProvider::from_name(Some("word2vec"), None);
        assert!(matches!(result, Err(EmbeddingError::Config(_))));
    }

    // Downloads model weights; run with `--features local-embed -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_embed_batch_dimensions() {
        let provider = FastEmbedProvider::new(None, None).expect("model loads");
        let vectors = provider.embed_batch(&["first chunk", "second chunk"]).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == provider.dimension()));
        assert!(provider.embed_batch(&["ok", " "]).await.is_err());
    }
}
