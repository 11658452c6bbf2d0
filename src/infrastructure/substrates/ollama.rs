//! Local Ollama provider.
//!
//! Ollama's `/api/generate` endpoint needs no API key, so this adapter
//! is the simplest of the three — grounded on the same request/response
//! handling pattern as [`super::anthropic`] and [`super::openai`], with
//! authentication removed and `base_url` defaulting to the local daemon.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::ports::model_provider::{
    ModelProvider, ModelProviderError, ModelRequest, ModelResponse, SubstrateHealth, TokenUsage,
};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

/// Adapter for a local Ollama daemon.
pub struct OllamaProvider {
    config: OllamaConfig,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Result<Self, ModelProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelProviderError::ExecutionFailed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn provider_id(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelProviderError> {
        let body = GenerateRequest {
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            stream: false,
            options: GenerateOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.config.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelProviderError::ExecutionFailed(format!("ollama error {status}: {body}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelProviderError::ExecutionFailed(format!("failed to parse ollama response: {e}")))?;

        Ok(ModelResponse {
            content: parsed.response,
            usage: Some(TokenUsage {
                input_tokens: parsed.prompt_eval_count,
                output_tokens: parsed.eval_count,
            }),
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> Result<SubstrateHealth, ModelProviderError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.config.base_url))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(SubstrateHealth::Healthy),
            Ok(_) => Ok(SubstrateHealth::Degraded),
            Err(_) => Ok(SubstrateHealth::Unavailable),
        }
    }
}

fn classify_transport_error(err: &reqwest::Error) -> ModelProviderError {
    if err.is_timeout() {
        ModelProviderError::Timeout(300)
    } else {
        ModelProviderError::Unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_is_ollama() {
        let provider = OllamaProvider::new(OllamaConfig::default()).unwrap();
        assert_eq!(provider.provider_id(), "ollama");
    }

    #[test]
    fn default_base_url_points_at_local_daemon() {
        assert_eq!(OllamaConfig::default().base_url, "http://localhost:11434");
    }
}
