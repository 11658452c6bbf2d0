//! Model substrate port (spec §3 ModelRouter, §4.3).
//!
//! Mirrors the teacher's `LlmSubstrate` abstraction: the router never
//! talks to a provider's wire format directly, only through this trait,
//! so mock/HTTP/future local-model adapters are interchangeable.

use async_trait::async_trait;
use std::collections::HashMap;

/// A single model invocation request.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub prompt: String,
    pub category: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Token accounting returned alongside a completion, when the provider
/// reports it.
#[derive(Debug, Clone, Copy)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstrateHealth {
    Healthy,
    Degraded,
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelProviderError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("provider returned an error: {0}")]
    ExecutionFailed(String),
}

/// Port trait a model provider adapter implements. Retries and
/// per-provider rate limiting are applied by callers in
/// `services::model_router`, not inside the adapter itself, so the
/// trait stays a thin transport abstraction.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelProviderError>;

    async fn health_check(&self) -> Result<SubstrateHealth, ModelProviderError>;
}
