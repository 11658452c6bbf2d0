//! Port traits: the seams through which `services` reaches out to
//! persistence and external model providers. Every trait here is
//! `Send + Sync` and async, implemented by adapters under
//! `infrastructure`.

pub mod backlog_repository;
pub mod identity_repository;
pub mod memory_repository;
pub mod model_provider;

pub use backlog_repository::{BacklogRepository, GoalFilter};
pub use identity_repository::IdentityRepository;
pub use memory_repository::{MemoryRepository, PerformanceSummary};
pub use model_provider::{ModelProvider, ModelProviderError, ModelRequest, ModelResponse, SubstrateHealth, TokenUsage};
