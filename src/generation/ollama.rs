//! Ollama generation backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationError, GenerationProvider, GenerationResult};
use crate::embedding::ollama::DEFAULT_OLLAMA_BASE_URL;

/// Default Ollama generation model.
pub const DEFAULT_OLLAMA_GENERATION_MODEL: &str = "llama2";

#[derive(Debug, Clone)]
pub struct OllamaGeneration {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaGeneration {
    /// # Errors
    /// Returns `GenerationError::Config` if the HTTP client cannot be built
    pub fn new(base_url: Option<String>, model: Option<String>) -> GenerationResult<Self> {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| GenerationError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            model: model.unwrap_or_else(|| DEFAULT_OLLAMA_GENERATION_MODEL.to_string()),
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaGeneration {
    /// Ollama's generate endpoint has no system role; the system text is
    /// prepended to the prompt.
    async fn complete(&self, system: &str, prompt: &str) -> GenerationResult<String> {
        let combined = format!("{}\n\n{}", system, prompt);
        debug!("Requesting Ollama generation with model {}", self.model);

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest { model: &self.model, prompt: &combined, stream: false, format: "json" })
            .send()
            .await
            .map_err(|e| GenerationError::Api(format!("Ollama request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Api(format!(
                "Ollama request failed: {}",
                status.canonical_reason().unwrap_or(status.as_str())
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Api(format!("failed to parse Ollama response: {}", e)))?;

        if parsed.response.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(parsed.response)
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let provider = OllamaGeneration::new(None, None).unwrap();
        assert_eq!(provider.base_url, DEFAULT_OLLAMA_BASE_URL);
        assert_eq!(provider.model_name(), "llama2");
        assert_eq!(provider.provider_name(), "ollama");
    }

    #[test]
    fn test_request_body_shape() {
        let value = serde_json::to_value(GenerateRequest { model: "llama2", prompt: "p", stream: false, format: "json" })
            .unwrap();
        assert_eq!(value, serde_json::json!({"model": "llama2", "prompt": "p", "stream": false, "format": "json"}));
    }
}
