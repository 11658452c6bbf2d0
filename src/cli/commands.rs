//! Command handlers: one function per [`Commands`] variant, wiring the
//! service graph (Backlog, Memory, ModelGateway, ExecutionManager) from
//! a loaded [`Config`] and dispatching the parsed CLI arguments into it.
//!
//! Grounded on the teacher's `cli::commands` split — each handler owns
//! its own slice of setup (open the pool, build the services it needs,
//! run, print) rather than a single god-function — adapted from the
//! teacher's task-queue/agent commands to sunwell's goal-execution
//! surface (spec §6).

use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::output;
use crate::cli::types::{Cli, Commands, MemoryCommands, ProviderArg, TrustArg};
use crate::domain::models::{Config, ErrorCategory, Goal, Lens, SunwellError, TrustLevel};
use crate::infrastructure::database::{DatabaseConnection, SqliteBacklogRepository, SqliteIdentityRepository, SqliteMemoryRepository};
use crate::infrastructure::substrates::{AnthropicConfig, AnthropicProvider, OllamaConfig, OllamaProvider, OpenAiConfig, OpenAiProvider};
use crate::services::mirror::{Mirror, MirrorConfig};
use crate::services::model_gateway::{ModelGateway, ModelGatewayConfig, ProviderRegistry};
use crate::services::model_router::{ModelRouter, ModelRouterConfig, TaskCategory};
use crate::services::tool_executor::{ToolExecutor, ToolExecutorConfig};
use crate::services::{Backlog, ExecutionManager, EventBus};
use crate::services::execution_manager::ExecutionManagerConfig;

/// Dispatch a parsed [`Cli`] invocation, returning the process exit code
/// on success or a [`SunwellError`] the caller prints to stderr (spec
/// §6: `0` success, `1` goal failure, `2` configuration error).
pub async fn dispatch(cli: Cli, config: Config) -> Result<u8, SunwellError> {
    match cli.command {
        Commands::Run {
            goal,
            plan,
            provider,
            model,
            time,
            trust,
            mirror,
            model_routing,
            lens,
            no_identity,
        } => run_goal(config, cli.json, goal, plan, provider, model, time, trust, mirror, model_routing, lens, no_identity).await,
        Commands::Init { force } => init(force),
        Commands::Reclaim => reclaim(config).await,
        Commands::Memory(MemoryCommands::Summary) => memory_summary(config, cli.json).await,
    }
}

/// `sunwell init`: write `.sunwell/config.yaml` with the programmatic
/// defaults serialized to YAML, and create the directories the rest of
/// the commands assume exist.
fn init(force: bool) -> Result<u8, SunwellError> {
    let sunwell_dir = PathBuf::from(".sunwell");
    let config_path = sunwell_dir.join("config.yaml");

    if config_path.exists() && !force {
        return Err(SunwellError::new(ErrorCategory::Config, 10, format!("{} already exists", config_path.display()))
            .with_hint("pass --force to overwrite")
            .recoverable());
    }

    std::fs::create_dir_all(&sunwell_dir)
        .map_err(|e| SunwellError::new(ErrorCategory::Io, 1, format!("failed to create .sunwell/: {e}")))?;
    std::fs::create_dir_all(".backlog")
        .map_err(|e| SunwellError::new(ErrorCategory::Io, 2, format!("failed to create .backlog/: {e}")))?;

    let yaml = serde_yaml::to_string(&Config::default())
        .map_err(|e| SunwellError::new(ErrorCategory::Config, 11, format!("failed to serialize default config: {e}")))?;
    std::fs::write(&config_path, yaml)
        .map_err(|e| SunwellError::new(ErrorCategory::Io, 3, format!("failed to write {}: {e}", config_path.display())))?;

    println!("wrote {}", config_path.display());
    Ok(0)
}

/// `sunwell reclaim`: release claims held past `backlog.claim_timeout_seconds`
/// (spec §4.2, §9 Open Question resolved by this config knob).
async fn reclaim(config: Config) -> Result<u8, SunwellError> {
    let connection = open_database(&config).await?;
    let repository = Arc::new(SqliteBacklogRepository::new(connection.pool().clone()));
    let backlog = Backlog::new(repository);

    let reclaimed = backlog
        .reclaim_stale(config.backlog.claim_timeout_seconds)
        .await
        .map_err(|e| SunwellError::new(ErrorCategory::Runtime, 1, e.to_string()))?;

    if reclaimed.is_empty() {
        println!("no stale claims to reclaim");
    } else {
        println!("reclaimed {} stale claim(s): {}", reclaimed.len(), reclaimed.join(", "));
    }
    Ok(0)
}

/// `sunwell memory summary`: print per-model performance for the
/// session-default and local-provider models across every task category
/// (spec §4.3 Performance Tracker).
async fn memory_summary(config: Config, json: bool) -> Result<u8, SunwellError> {
    use crate::domain::ports::MemoryRepository;

    let connection = open_database(&config).await?;
    let repository = SqliteMemoryRepository::new(connection.pool().clone());

    let categories = [
        TaskCategory::Introspection,
        TaskCategory::Analysis,
        TaskCategory::CodeGeneration,
        TaskCategory::QuickAnalysis,
        TaskCategory::DeepReasoning,
        TaskCategory::Conversation,
        TaskCategory::Default,
    ];
    let candidates = [config.model_routing.session_default.as_str(), "ollama-llama3"];

    let mut rows = Vec::new();
    for category in categories {
        for model in candidates {
            if let Some(summary) = repository
                .performance_summary(model, category.as_str(), 1)
                .await
                .map_err(|e| SunwellError::new(ErrorCategory::Runtime, 2, e.to_string()))?
            {
                rows.push((model.to_string(), category.as_str().to_string(), summary));
            }
        }
    }

    if json {
        let payload: Vec<_> = rows
            .iter()
            .map(|(model, category, summary)| {
                serde_json::json!({
                    "model": model,
                    "category": category,
                    "sample_count": summary.sample_count,
                    "success_rate": summary.success_rate,
                    "mean_latency_ms": summary.mean_latency_ms,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
    } else if rows.is_empty() {
        println!("no performance observations recorded yet");
    } else {
        for (model, category, summary) in rows {
            println!(
                "{model:<24} {category:<16} samples={:<4} success_rate={:.2} mean_latency_ms={:.0}",
                summary.sample_count, summary.success_rate, summary.mean_latency_ms
            );
        }
    }
    Ok(0)
}

/// `sunwell run "<goal>"` (spec §6, §4.8): the single-entry execution
/// path. Builds the full service graph, then either prints the planned
/// DAG (`--plan`) or executes the goal end to end.
#[allow(clippy::too_many_arguments)]
async fn run_goal(
    config: Config,
    json: bool,
    description: String,
    plan_only: bool,
    provider: Option<ProviderArg>,
    model: Option<String>,
    time: Option<u64>,
    trust: TrustArg,
    mirror: bool,
    model_routing: bool,
    lens_path: Option<PathBuf>,
    no_identity: bool,
) -> Result<u8, SunwellError> {
    let connection = open_database(&config).await?;
    let event_bus = Arc::new(EventBus::default());

    let backlog_repo = Arc::new(SqliteBacklogRepository::new(connection.pool().clone()));
    let backlog = Arc::new(Backlog::new(backlog_repo));

    let memory_repo: Arc<dyn crate::domain::ports::MemoryRepository> =
        Arc::new(SqliteMemoryRepository::new(connection.pool().clone()));
    let memory = Arc::new(crate::services::Memory::new(memory_repo.clone(), config.memory.entity_similarity_threshold));

    let mut router_config = ModelRouterConfig {
        session_default: model.clone().unwrap_or(config.model_routing.session_default.clone()),
        min_samples: config.model_routing.min_samples,
        keep_local: config.privacy.keep_local.clone(),
        ..ModelRouterConfig::default()
    };
    if config.privacy.local_only {
        router_config.keep_local = vec![
            TaskCategory::Introspection.as_str().to_string(),
            TaskCategory::Analysis.as_str().to_string(),
            TaskCategory::CodeGeneration.as_str().to_string(),
            TaskCategory::QuickAnalysis.as_str().to_string(),
            TaskCategory::DeepReasoning.as_str().to_string(),
            TaskCategory::Conversation.as_str().to_string(),
            TaskCategory::Default.as_str().to_string(),
        ];
    }
    let mut router = ModelRouter::new(router_config, if config.model_routing.enabled { Some(memory_repo.clone()) } else { None });
    if let Some(model) = &model {
        for category in [
            TaskCategory::Introspection,
            TaskCategory::Analysis,
            TaskCategory::CodeGeneration,
            TaskCategory::QuickAnalysis,
            TaskCategory::DeepReasoning,
            TaskCategory::Conversation,
            TaskCategory::Default,
        ] {
            router.set_override(category, model.clone());
        }
    }

    let registry = build_provider_registry(provider)?;
    let gateway = Arc::new(ModelGateway::new(
        router,
        registry,
        Some(event_bus.clone()),
        ModelGatewayConfig {
            max_retries: config.retry.max_retries,
            initial_backoff_ms: config.retry.initial_backoff_ms,
            max_backoff_ms: config.retry.max_backoff_ms,
        },
    ));

    let trust_level = match trust {
        TrustArg::ReadOnly => TrustLevel::ReadOnly,
        TrustArg::Workspace => TrustLevel::Workspace,
        TrustArg::Shell => TrustLevel::Shell,
    };
    let tool_executor = Arc::new(ToolExecutor::new(ToolExecutorConfig {
        trust_level,
        allowed_paths: vec![std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))],
        timeout: std::time::Duration::from_secs(time.unwrap_or(120)),
        max_output_bytes: 64 * 1024,
    }));

    let mut manager = ExecutionManager::new(
        backlog,
        memory,
        gateway.clone(),
        tool_executor,
        event_bus.clone(),
        ExecutionManagerConfig {
            parallelism_cap: config.parallelism_cap,
            ..ExecutionManagerConfig::default()
        },
    );
    if mirror {
        manager = manager.with_mirror(Arc::new(Mirror::new(MirrorConfig::default(), Some(gateway.clone()), Some(event_bus.clone()))));
    }

    let mut lens = match &lens_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| SunwellError::new(ErrorCategory::Lens, 1, format!("failed to read {}: {e}", path.display())))?;
            Lens::from_yaml(&text).map_err(|e| SunwellError::new(ErrorCategory::Lens, 2, format!("invalid lens file: {e}")))?
        }
        None => Lens::default(),
    };
    // `--model-routing` forces Lens-driven routing on even if the Lens
    // file itself leaves `model_routing.enabled: false` (spec §6).
    if model_routing {
        lens.model_routing.enabled = true;
    }

    let goal = Goal::new(description);

    if !no_identity && config.identity.enabled {
        extract_identity(&connection, &gateway, &event_bus, &goal.description).await;
    }

    if plan_only {
        return plan_dry_run(&manager, &goal, Some(&lens), json).await;
    }

    let result = manager
        .run_goal(goal, Some(&lens))
        .await
        .map_err(|e| SunwellError::new(ErrorCategory::Runtime, 10, e.to_string()))?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "goal_id": result.goal_id,
                "success": result.success,
                "partial": result.partial,
                "summary": result.result.summary,
                "artifacts_created": result.result.artifacts_created,
                "artifacts_failed": result.result.artifacts_failed,
                "error": result.error,
            })
        );
    } else {
        println!("{}", output::format_execution_result(&result));
    }

    Ok(u8::from(!result.success))
}

/// `--plan`: compute the DAG and print it without running anything. This
/// borrows the manager's planner indirectly by reaching into its
/// constituent services rather than executing `run_goal`, since a dry
/// run must never claim the goal or invoke tool execution (spec §6).
async fn plan_dry_run(
    manager: &ExecutionManager,
    goal: &Goal,
    lens: Option<&Lens>,
    json: bool,
) -> Result<u8, SunwellError> {
    let dag = manager
        .plan_only(goal, lens)
        .await
        .map_err(|e| SunwellError::new(ErrorCategory::Runtime, 11, e.to_string()))?;

    if json {
        let waves: Vec<Vec<String>> = dag
            .execution_waves()
            .into_iter()
            .map(|wave| wave.into_iter().map(|id| id.to_string()).collect())
            .collect();
        println!("{}", serde_json::json!({ "goal_id": goal.id, "waves": waves }));
    } else {
        println!("{}", output::format_plan(&dag));
    }
    Ok(0)
}

async fn open_database(config: &Config) -> Result<DatabaseConnection, SunwellError> {
    let url = format!("sqlite:{}", config.database.path);
    if let Some(parent) = PathBuf::from(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SunwellError::new(ErrorCategory::Io, 4, format!("failed to create {}: {e}", parent.display())))?;
        }
    }
    let connection = DatabaseConnection::new(&url)
        .await
        .map_err(|e| SunwellError::new(ErrorCategory::Config, 20, format!("failed to open database: {e}")))?;
    connection
        .migrate()
        .await
        .map_err(|e| SunwellError::new(ErrorCategory::Config, 21, format!("migration failed: {e}")))?;
    Ok(connection)
}

/// Registers whichever providers have credentials/endpoints available.
/// `--provider` restricts registration to a single explicit choice;
/// otherwise every provider with a usable configuration is registered so
/// the router's model-prefix resolution can pick between them (spec §6).
fn build_provider_registry(provider: Option<ProviderArg>) -> Result<ProviderRegistry, SunwellError> {
    let mut registry = ProviderRegistry::new();
    let include = |candidate: ProviderArg| provider.is_none_or(|p| p == candidate);

    if include(ProviderArg::Anthropic) {
        if let Ok(adapter) = AnthropicProvider::new(AnthropicConfig::default()) {
            registry.register(Arc::new(adapter), &["claude"], 4000);
        }
    }
    if include(ProviderArg::Openai) {
        if let Ok(adapter) = OpenAiProvider::new(OpenAiConfig::default()) {
            registry.register(Arc::new(adapter), &["gpt-", "o1", "o3"], 3500);
        }
    }
    if include(ProviderArg::Ollama) {
        if let Ok(adapter) = OllamaProvider::new(OllamaConfig::default()) {
            registry.register(Arc::new(adapter), &["ollama-", "llama"], 6000);
        }
    }

    Ok(registry)
}

/// Two-tier fact/behavior extraction over the goal description, then an
/// adaptive digest rebuild forced by `session_end = true` since a CLI
/// invocation is a one-shot session (spec §4.10). Extraction failures
/// degrade silently — identity is an enrichment, never a precondition
/// for `run_goal`.
async fn extract_identity(connection: &DatabaseConnection, gateway: &Arc<ModelGateway>, event_bus: &Arc<EventBus>, message: &str) {
    let repository: Arc<dyn crate::domain::ports::IdentityRepository> =
        Arc::new(SqliteIdentityRepository::new(connection.pool().clone()));
    let identity = crate::services::IdentityService::new(repository, Some(gateway.clone()), Some(event_bus.clone()));

    let observations = match identity.extract(message).await {
        Ok(observations) => observations,
        Err(err) => {
            tracing::warn!(error = %err, "identity extraction failed, continuing without it");
            return;
        }
    };

    let mut session = crate::domain::models::SessionIdentity::new(uuid::Uuid::new_v4());
    if let Err(err) = identity.observe_and_maybe_digest(&mut session, observations, true).await {
        tracing::warn!(error = %err, "identity digest failed, continuing without it");
        return;
    }

    if let Err(err) = identity.promote_session(&mut session).await {
        tracing::warn!(error = %err, "identity promotion failed, continuing without it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_provider_registry_with_no_restriction_does_not_error() {
        let registry = build_provider_registry(None);
        assert!(registry.is_ok());
    }

    #[test]
    fn build_provider_registry_restricted_to_ollama_does_not_error() {
        let registry = build_provider_registry(Some(ProviderArg::Ollama));
        assert!(registry.is_ok());
    }
}
