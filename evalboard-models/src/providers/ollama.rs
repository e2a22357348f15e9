//! Ollama local model provider.
//!
//! Connects to a local Ollama instance for running models like Llama, Mistral, etc.
//!
//! # Example
//!
//! ```ignore
//! use evalboard_models::providers::OllamaProvider;
//!
//! let provider = OllamaProvider::new();  // Uses localhost:11434
//! let provider = OllamaProvider::with_base_url("http://192.168.1.100:11434");
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Completion, ModelProvider, Usage};
use crate::{Error, Pricing, Result};

/// Default Ollama API base URL.
const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

// ────────────────────────────────────────────────────────────────────────────
// Ollama API Types
// ────────────────────────────────────────────────────────────────────────────

/// Request body for Ollama's `/api/generate` endpoint.
#[derive(Debug, Serialize)]
pub struct OllamaGenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

/// Response from Ollama's `/api/generate` endpoint.
#[derive(Debug, Deserialize)]
pub struct OllamaGenerateResponse {
    #[allow(dead_code)]
    pub model: String,
    pub response: String,
    #[allow(dead_code)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
}

impl From<OllamaGenerateResponse> for Completion {
    fn from(response: OllamaGenerateResponse) -> Self {
        Completion::new(
            response.response,
            Usage::new(
                response.prompt_eval_count.unwrap_or(0),
                response.eval_count.unwrap_or(0),
            ),
            0.0,
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OllamaProvider
// ────────────────────────────────────────────────────────────────────────────

/// Ollama local model provider.
///
/// Local inference is free, so completions always carry zero cost.
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider with default URL (localhost:11434).
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a new Ollama provider with a custom base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL for this provider.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a transport-level failure to a provider error.
fn classify_transport(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::Transient(err.to_string())
    } else {
        Error::Request(err.to_string())
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    #[instrument(skip(self, prompt), level = "debug")]
    async fn invoke(&self, model: &str, prompt: &str) -> Result<Completion> {
        let url = format!("{}/api/generate", self.base_url);
        let request = OllamaGenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status, &body));
        }

        let body = response.text().await.map_err(classify_transport)?;
        let parsed: OllamaGenerateResponse = serde_json::from_str(&body)?;
        debug!(
            model,
            prompt_tokens = parsed.prompt_eval_count,
            output_tokens = parsed.eval_count,
            "ollama generate complete"
        );
        Ok(parsed.into())
    }

    fn pricing(&self, _model: &str) -> Option<Pricing> {
        Some(Pricing::free())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_default_url() {
        let provider = OllamaProvider::new();
        assert_eq!(provider.base_url(), "http://localhost:11434");
    }

    #[test]
    fn with_base_url_strips_trailing_slash() {
        let provider = OllamaProvider::with_base_url("http://gpu-box:11434/");
        assert_eq!(provider.base_url(), "http://gpu-box:11434");
    }

    #[test]
    fn generate_request_serializes_without_streaming() {
        let request = OllamaGenerateRequest {
            model: "llama3.2".to_string(),
            prompt: "hi".to_string(),
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "llama3.2");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn generate_response_converts_to_completion() {
        let json = r#"{
            "model": "llama3.2",
            "created_at": "2025-01-01T00:00:00Z",
            "response": "Paris",
            "done": true,
            "prompt_eval_count": 26,
            "eval_count": 2
        }"#;
        let response: OllamaGenerateResponse = serde_json::from_str(json).unwrap();
        let completion: Completion = response.into();

        assert_eq!(completion.output, "Paris");
        assert_eq!(completion.usage, Usage::new(26, 2));
        assert_eq!(completion.cost, 0.0);
    }

    #[test]
    fn generate_response_tolerates_missing_counts() {
        let json = r#"{"model": "m", "response": "", "done": true}"#;
        let response: OllamaGenerateResponse = serde_json::from_str(json).unwrap();
        let completion: Completion = response.into();

        assert_eq!(completion.usage.total_tokens, 0);
    }

    #[test]
    fn ollama_pricing_is_free() {
        let provider = OllamaProvider::new();
        assert_eq!(provider.pricing("llama3.2"), Some(Pricing::free()));
    }
}
