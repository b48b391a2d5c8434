//! OpenAI chat-completions generation backend.
//!
//! Requests JSON-object output mode so the reply is a bare JSON document.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationError, GenerationProvider, GenerationResult};
use crate::embedding::openai::DEFAULT_OPENAI_BASE_URL;

/// Default chat model.
pub const DEFAULT_OPENAI_GENERATION_MODEL: &str = "gpt-5.2";

const SAMPLING_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone)]
pub struct OpenAIGeneration {
    client: Client,

    /// Full `/chat/completions` endpoint URL
    endpoint: String,

    model: String,
}

impl OpenAIGeneration {
    /// Create a chat backend.
    ///
    /// # Errors
    /// Returns `GenerationError::Config` if the key is blank or not a valid
    /// header value, or the HTTP client cannot be built
    pub fn new(api_key: String, model: Option<String>) -> GenerationResult<Self> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::Config("OpenAI API key required".to_string()));
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|e| GenerationError::Config(format!("invalid OpenAI API key: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .default_headers(headers)
            .build()
            .map_err(|e| GenerationError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", DEFAULT_OPENAI_BASE_URL),
            model: model.unwrap_or_else(|| DEFAULT_OPENAI_GENERATION_MODEL.to_string()),
        })
    }

    /// Point the backend at an OpenAI-compatible API root.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        self
    }
}

#[async_trait]
impl GenerationProvider for OpenAIGeneration {
    async fn complete(&self, system: &str, prompt: &str) -> GenerationResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "system", content: system }, ChatMessage { role: "user", content: prompt }],
            response_format: ResponseFormat { kind: "json_object" },
            temperature: SAMPLING_TEMPERATURE,
        };
        debug!("Requesting chat completion from model {}", self.model);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Api(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::Api(format!("OpenAI chat request failed ({}): {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Api(format!("failed to parse chat response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}
