//! OpenAI Chat Completions API provider.
//!
//! Not present in the teacher (which only ships Claude-family substrates),
//! so this is grounded on the same shape as [`super::anthropic`] —
//! sunwell's `ModelProvider` trait is provider-agnostic by design, and
//! the chat-completions wire format differs from Anthropic's mainly in
//! its flat `messages` array (no separate `system` field) and its
//! `choices[0].message.content` response shape.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::ports::model_provider::{
    ModelProvider, ModelProviderError, ModelRequest, ModelResponse, SubstrateHealth, TokenUsage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 120,
        }
    }
}

impl OpenAiConfig {
    fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<Choice>,
    usage: Option<ChatCompletionsUsage>,
}

/// Direct HTTP adapter for the OpenAI Chat Completions API.
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, ModelProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelProviderError::ExecutionFailed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelProviderError> {
        let api_key = self
            .config
            .resolved_api_key()
            .ok_or_else(|| ModelProviderError::NotConfigured("OPENAI_API_KEY not set".to_string()))?;

        let body = ChatCompletionsRequest {
            model: request.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ModelProviderError::RateLimited("openai returned 429".to_string()));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelProviderError::ExecutionFailed(format!("openai api error {status}: {body}")));
        }

        let mut parsed: ChatCompletionsResponse = response
            .json()
            .await
            .map_err(|e| ModelProviderError::ExecutionFailed(format!("failed to parse openai response: {e}")))?;

        let content = parsed
            .choices
            .pop()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ModelProviderError::ExecutionFailed("openai response had no choices".to_string()))?;

        let usage = parsed.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        Ok(ModelResponse {
            content,
            usage,
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> Result<SubstrateHealth, ModelProviderError> {
        if self.config.resolved_api_key().is_none() {
            return Ok(SubstrateHealth::Unavailable);
        }
        Ok(SubstrateHealth::Healthy)
    }
}

fn classify_transport_error(err: &reqwest::Error) -> ModelProviderError {
    if err.is_timeout() {
        ModelProviderError::Timeout(120)
    } else {
        ModelProviderError::Unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_id_is_openai() {
        let provider = OpenAiProvider::new(OpenAiConfig::default()).unwrap();
        assert_eq!(provider.provider_id(), "openai");
    }
}
