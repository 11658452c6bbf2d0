//! The service layer: stateful orchestration built on top of the pure
//! `domain` types and the `domain::ports` traits. Nothing here knows
//! about `sqlx`, `figment`, or wire formats directly — adapters under
//! `infrastructure` supply the concrete repository/provider
//! implementations these services depend on.

pub mod backlog;
pub mod event_bus;
pub mod execution_manager;
pub mod identity;
pub mod memory;
pub mod mirror;
pub mod model_gateway;
pub mod model_router;
pub mod patterns;
pub mod planner;
pub mod tool_executor;

pub use backlog::{Backlog, ClaimOutcome};
pub use event_bus::{EventBus, EventBusConfig, EventSubscriber};
pub use execution_manager::{ExecutionManager, ExecutionResult};
pub use identity::IdentityService;
pub use memory::Memory;
pub use mirror::Mirror;
pub use model_gateway::{ModelGateway, ModelGatewayConfig, ProviderRegistry};
pub use model_router::{ModelRouter, TaskCategory};
pub use patterns::{run_pattern, PatternContext};
pub use planner::{PlanOutcome, Planner, PlannerConfig};
pub use tool_executor::ToolExecutor;

/// Extract a JSON value (object or array) from LLM text output. Handles
/// markdown code fences and JSON embedded in surrounding prose. Grounded
/// on the teacher's `services::extract_json_from_response`, generalized
/// to also recognize a top-level `[...]` array since the planner asks
/// for an array of artifacts rather than a single object.
pub fn extract_json_from_response(response: &str) -> String {
    let trimmed = response.trim();

    if trimmed.starts_with("```json") {
        if let Some(end) = trimmed.rfind("```") {
            if end > 7 {
                return trimmed[7..end].trim().to_string();
            }
        }
    }

    if trimmed.starts_with("```") {
        if let Some(end) = trimmed.rfind("```") {
            let start = if trimmed.starts_with("```\n") { 4 } else { 3 };
            if end > start {
                return trimmed[start..end].trim().to_string();
            }
        }
    }

    if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find('[') {
        if let Some(end) = trimmed.rfind(']') {
            if end > start {
                return trimmed[start..=end].to_string();
            }
        }
    }

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return trimmed[start..=end].to_string();
            }
        }
    }

    trimmed.to_string()
}
