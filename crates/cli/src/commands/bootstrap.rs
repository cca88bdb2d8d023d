use std::sync::Arc;

use tokio::runtime::Runtime;

use brainstorm_agent::{
    default_registry, AgentGraph, ChatCompletionsClient, HttpPageFetcher, LlmClient, PrdService,
    ResearchPipeline, ResearchSettings, SearchProvider, SessionManager, TavilySearch, ToolDeps,
    TurnGuard, Workspace,
};
use brainstorm_core::config::{AppConfig, LoadOptions, LogFormat};
use brainstorm_db::repositories::{SqlCheckpointRepository, SqlPrdRepository};
use brainstorm_db::{connect_with_config, migrations, DbPool};

use super::{CommandResult, EXIT_CONFIG, EXIT_DB, EXIT_MIGRATION, EXIT_RUNTIME};

/// Logs go to stderr so stdout stays a single JSON document.
pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr);

    // Repeated initialization (tests run several commands per process) is ignored.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub(crate) fn load_config(
    command: &str,
    options: &LoadOptions,
) -> Result<AppConfig, CommandResult> {
    let config = AppConfig::load(options.clone()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            EXIT_CONFIG,
        )
    })?;
    init_logging(&config);
    Ok(config)
}

pub(crate) fn runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            EXIT_RUNTIME,
        )
    })
}

pub(crate) async fn open_database(
    command: &str,
    config: &AppConfig,
) -> Result<DbPool, CommandResult> {
    let pool = connect_with_config(&config.database).await.map_err(|error| {
        CommandResult::failure(command, "db_connectivity", error.to_string(), EXIT_DB)
    })?;
    migrations::run_pending(&pool).await.map_err(|error| {
        CommandResult::failure(command, "migration", error.to_string(), EXIT_MIGRATION)
    })?;
    Ok(pool)
}

pub(crate) fn llm_client(
    command: &str,
    config: &AppConfig,
) -> Result<Arc<dyn LlmClient>, CommandResult> {
    let client = ChatCompletionsClient::from_config(&config.llm).map_err(|error| {
        CommandResult::failure(command, "llm_client", error.to_string(), EXIT_RUNTIME)
    })?;
    Ok(Arc::new(client))
}

pub(crate) fn research_pipeline(config: &AppConfig) -> ResearchPipeline {
    let search: Arc<dyn SearchProvider> = Arc::new(TavilySearch::from_config(&config.search));
    ResearchPipeline::new(
        search,
        Arc::new(HttpPageFetcher::from_config(&config.research)),
        ResearchSettings::from_config(&config.research, &config.search),
    )
}

/// Wires the full agent: tools, graph and checkpointed sessions over `pool`.
pub(crate) fn session_manager(
    command: &str,
    config: &AppConfig,
    pool: &DbPool,
) -> Result<SessionManager, CommandResult> {
    let llm = llm_client(command, config)?;
    let workspace = Workspace::new(&config.agent.workspace_root).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("workspace root is unusable: {error}"),
            EXIT_CONFIG,
        )
    })?;

    let prd_repo = Arc::new(SqlPrdRepository::new(pool.clone()));
    let prds = Arc::new(PrdService::new(prd_repo, llm.clone()));
    let registry = default_registry(ToolDeps {
        search: Arc::new(TavilySearch::from_config(&config.search)),
        research: Arc::new(research_pipeline(config)),
        prds,
        workspace,
    });
    let graph = AgentGraph::new(llm, Arc::new(registry))
        .with_guard(TurnGuard::from_config(&config.agent));
    let checkpoints = Arc::new(SqlCheckpointRepository::new(pool.clone()));

    Ok(SessionManager::new(Arc::new(graph), checkpoints))
}
