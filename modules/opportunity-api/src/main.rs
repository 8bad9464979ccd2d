use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use opportunity_api::{build_router, AppState, RunRegistry};
use opportunity_common::{load_config, AppConfig, PipelineConfig};
use opportunity_scout::infra::{build_embedders, ChatModel, RedditSearcher, RedditThreads, SubredditDirectory};
use opportunity_scout::store::PgPostStore;
use opportunity_scout::{PipelineDeps, PipelineOrchestrator};
use reddit_client::RedditClient;

#[derive(Parser)]
#[command(name = "opportunity-api", about = "Reddit opportunity search API")]
struct Cli {
    /// Path to the pipeline config TOML file. Defaults apply when omitted.
    #[arg(long, env = "OPPORTUNITY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting opportunity-api");

    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => {
            let path = path.canonicalize().with_context(|| {
                format!(
                    "Config file not found: {}. Create one or omit --config",
                    path.display()
                )
            })?;
            tracing::info!(config = %path.display(), "Loading config");
            load_config(&path)?
        }
        None => {
            tracing::info!("No config file given, using defaults");
            PipelineConfig::default()
        }
    }
    .with_env_overrides();
    file_config.validate()?;

    let config = AppConfig::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("connect to database")?;
    tracing::info!("Connected to database");

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Migrations complete");

    // Reddit
    let mut reddit = RedditClient::new();
    if let Some(ua) = &config.reddit_user_agent {
        reddit = reddit.with_user_agent(ua);
    }
    let reddit = Arc::new(reddit);
    let directory = Arc::new(SubredditDirectory::new(reddit.clone()));

    // Models
    let keyword_llm = Arc::new(ChatModel::from_config(&config, &file_config.models.keyword));
    let gate_llm = Arc::new(ChatModel::from_config(&config, &file_config.models.classifier));
    let embedders = build_embedders(&config, &file_config.models);
    tracing::info!(
        providers = ?embedders.keys().map(|p| p.as_str()).collect::<Vec<_>>(),
        default = %file_config.pipeline.embed_provider,
        "Embedding providers ready"
    );

    let mut deps = PipelineDeps::new(Arc::new(RedditSearcher::new(reddit.clone())))
        .with_keyword_llm(keyword_llm)
        .with_gate_llm(gate_llm)
        .with_threads(Arc::new(RedditThreads::new(reddit, directory)))
        .with_store(Arc::new(PgPostStore::new(pool)));
    deps.embedders = embedders;

    let state = Arc::new(AppState {
        orchestrator: Arc::new(PipelineOrchestrator::new(deps, file_config)),
        registry: Arc::new(RunRegistry::default()),
    });

    let app = build_router(state);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    tracing::info!("Opportunity API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
