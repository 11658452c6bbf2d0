//! Model gateway: the single place compound patterns and the planner
//! call through to reach a [`ModelProvider`] (spec §4.3, §5).
//!
//! Combines [`ModelRouter`]'s category → model selection with
//! per-provider rate limiting (`governor`, grounded on the teacher's
//! `infrastructure::claude::rate_limiter`) and retry-with-backoff-and-
//! jitter (`backoff`, grounded on `infrastructure::claude::retry`), so
//! neither patterns nor the planner re-implement the retry ladder spec
//! §5 describes: "on a rate-limit error, exponential backoff with
//! jitter, up to 3 retries, after which the error propagates."

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use governor::state::{InMemoryState, NotKeyed};
use governor::clock::DefaultClock;

use crate::domain::models::Lens;
use crate::domain::ports::{ModelProvider, ModelProviderError, ModelRequest, ModelResponse};
use crate::services::event_bus::EventBus;
use crate::services::model_router::{ModelRouter, TaskCategory};
use crate::domain::models::EventPayload;

type ProviderRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Maps a model id to the provider that serves it, e.g. `claude-sonnet-4-5
/// -> "anthropic"`, `gpt-4o-mini -> "openai"`, `ollama-llama3 -> "ollama"`.
/// Resolution is by prefix match against registered providers' declared
/// model families, falling back to the first registered provider if no
/// family matches (keeps local-dev single-provider setups simple).
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    model_prefixes: Vec<(String, String)>,
    limiters: HashMap<String, Arc<ProviderRateLimiter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            model_prefixes: Vec::new(),
            limiters: HashMap::new(),
        }
    }

    /// Register a provider, the model-id prefixes it serves, and its
    /// requests-per-minute quota (spec §5 "Model providers are treated
    /// as rate-limited").
    pub fn register(&mut self, provider: Arc<dyn ModelProvider>, model_prefixes: &[&str], requests_per_minute: u32) {
        let id = provider.provider_id().to_string();
        for prefix in model_prefixes {
            self.model_prefixes.push((prefix.to_string(), id.clone()));
        }
        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute.max(1)).unwrap());
        self.limiters.insert(id.clone(), Arc::new(RateLimiter::direct(quota)));
        self.providers.insert(id, provider);
    }

    fn resolve(&self, model: &str) -> Option<(Arc<dyn ModelProvider>, Arc<ProviderRateLimiter>)> {
        let provider_id = self
            .model_prefixes
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix.as_str()))
            .map(|(_, id)| id.clone())
            .or_else(|| self.providers.keys().next().cloned())?;
        let provider = self.providers.get(&provider_id)?.clone();
        let limiter = self.limiters.get(&provider_id)?.clone();
        Some((provider, limiter))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ModelGatewayConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ModelGatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 15_000,
        }
    }
}

pub struct ModelGateway {
    router: ModelRouter,
    registry: ProviderRegistry,
    event_bus: Option<Arc<EventBus>>,
    config: ModelGatewayConfig,
}

impl ModelGateway {
    pub fn new(router: ModelRouter, registry: ProviderRegistry, event_bus: Option<Arc<EventBus>>, config: ModelGatewayConfig) -> Self {
        Self { router, registry, event_bus, config }
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Select a model for `category`, then call it with retry-with-
    /// backoff-and-jitter on rate limit / timeout / unavailable (spec
    /// §5), propagating the error after `max_retries` is exhausted.
    pub async fn complete(
        &self,
        category: TaskCategory,
        lens: Option<&Lens>,
        prompt: impl Into<String>,
        goal_id: Option<&str>,
    ) -> Result<ModelResponse, ModelProviderError> {
        let selection = self
            .router
            .select_model(category, lens)
            .await
            .map_err(|e| ModelProviderError::ExecutionFailed(e.to_string()))?;

        let Some((provider, limiter)) = self.registry.resolve(&selection.model) else {
            return Err(ModelProviderError::NotConfigured(selection.model));
        };

        let prompt = prompt.into();
        let request = ModelRequest {
            model: selection.model.clone(),
            prompt,
            category: category.as_str().to_string(),
            max_tokens: None,
            temperature: None,
        };

        if let Some(bus) = &self.event_bus {
            bus.publish(
                goal_id,
                EventPayload::ModelCallStarted {
                    provider: provider.provider_id().to_string(),
                    model: selection.model.clone(),
                    category: category.as_str().to_string(),
                },
            )
            .await;
        }

        let start = std::time::Instant::now();
        let mut attempt = 0u32;
        let mut backoff_ms = self.config.initial_backoff_ms;

        loop {
            attempt += 1;
            limiter.until_ready().await;
            match provider.complete(request.clone()).await {
                Ok(response) => {
                    if let Some(bus) = &self.event_bus {
                        bus.publish(
                            goal_id,
                            EventPayload::ModelCallCompleted {
                                provider: provider.provider_id().to_string(),
                                model: selection.model.clone(),
                                latency_ms: start.elapsed().as_millis() as u64,
                                success: true,
                            },
                        )
                        .await;
                    }
                    return Ok(response);
                }
                Err(err) if attempt <= self.config.max_retries && is_retriable(&err) => {
                    let jitter = fastrand_jitter(backoff_ms);
                    tokio::time::sleep(Duration::from_millis(jitter)).await;
                    backoff_ms = (backoff_ms * 2).min(self.config.max_backoff_ms);
                    continue;
                }
                Err(err) => {
                    if let Some(bus) = &self.event_bus {
                        bus.publish(
                            goal_id,
                            EventPayload::ModelCallFailed {
                                provider: provider.provider_id().to_string(),
                                model: selection.model.clone(),
                                reason: err.to_string(),
                            },
                        )
                        .await;
                    }
                    return Err(err);
                }
            }
        }
    }
}

const fn is_retriable(err: &ModelProviderError) -> bool {
    matches!(
        err,
        ModelProviderError::RateLimited(_) | ModelProviderError::Timeout(_) | ModelProviderError::Unavailable(_)
    )
}

/// Add up to 25% jitter to a backoff duration without pulling in a
/// dedicated RNG crate dependency the teacher doesn't already carry.
fn fastrand_jitter(base_ms: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let jitter_fraction = f64::from(nanos % 1000) / 1000.0 * 0.25;
    base_ms + (base_ms as f64 * jitter_fraction) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::SubstrateHealth;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        id: String,
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl ModelProvider for FlakyProvider {
        fn provider_id(&self) -> &str {
            &self.id
        }

        async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelProviderError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(ModelProviderError::RateLimited("slow down".to_string()));
            }
            Ok(ModelResponse {
                content: format!("handled {}", request.prompt),
                usage: None,
                metadata: HashMap::new(),
            })
        }

        async fn health_check(&self) -> Result<SubstrateHealth, ModelProviderError> {
            Ok(SubstrateHealth::Healthy)
        }
    }

    #[tokio::test]
    async fn retries_on_rate_limit_then_succeeds() {
        let mut registry = ProviderRegistry::new();
        registry.register(
            Arc::new(FlakyProvider { id: "anthropic".into(), fail_times: AtomicU32::new(2) }),
            &["claude"],
            6000,
        );
        let router = ModelRouter::new(crate::services::model_router::ModelRouterConfig::default(), None);
        let gateway = ModelGateway::new(
            router,
            registry,
            None,
            ModelGatewayConfig { max_retries: 3, initial_backoff_ms: 1, max_backoff_ms: 5 },
        );
        let response = gateway.complete(TaskCategory::CodeGeneration, None, "hello", None).await.unwrap();
        assert!(response.content.contains("hello"));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let mut registry = ProviderRegistry::new();
        registry.register(
            Arc::new(FlakyProvider { id: "anthropic".into(), fail_times: AtomicU32::new(99) }),
            &["claude"],
            6000,
        );
        let router = ModelRouter::new(crate::services::model_router::ModelRouterConfig::default(), None);
        let gateway = ModelGateway::new(
            router,
            registry,
            None,
            ModelGatewayConfig { max_retries: 2, initial_backoff_ms: 1, max_backoff_ms: 2 },
        );
        let result = gateway.complete(TaskCategory::CodeGeneration, None, "hello", None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unconfigured_model_prefix_falls_back_to_first_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register(
            Arc::new(FlakyProvider { id: "ollama".into(), fail_times: AtomicU32::new(0) }),
            &["ollama-"],
            6000,
        );
        let mut config = crate::services::model_router::ModelRouterConfig::default();
        config.session_default = "some-unmapped-model".to_string();
        let router = ModelRouter::new(config, None);
        let gateway = ModelGateway::new(router, registry, None, ModelGatewayConfig::default());
        let result = gateway.complete(TaskCategory::Default, None, "hi", None).await;
        assert!(result.is_ok());
    }
}
