//! flyer-resolver - Flyer image resolution service
//!
//! Resolves an image for every product of a retail flyer project: certified
//! bank first, then web search candidates checked by an image validator.
//! HTTP REST for projects and the bank, SSE for progress.

use anyhow::{Context, Result};
use clap::Parser;
use flyer_common::config::{
    default_config_path, load_toml_config, RootFolderInitializer, RootFolderResolver,
};
use flyer_common::events::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use flyer_resolver::config::ResolverConfig;
use flyer_resolver::{AppState, CollaboratorSource};

const MODULE_NAME: &str = "flyer-resolver";

#[derive(Parser, Debug)]
#[command(name = "flyer-resolver")]
#[command(about = "Image resolution service for retail flyer projects")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5780", env = "FLYER_PORT")]
    port: u16,

    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML config file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| default_config_path(MODULE_NAME));
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Default::default(),
    };

    // RUST_LOG wins over the configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "{},tower_http=info",
            toml_config.logging.level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!(
        "Starting flyer-resolver v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let mut resolver = RootFolderResolver::new(MODULE_NAME).with_cli_arg(args.root_folder.clone());
    if let Some(path) = &config_path {
        resolver = resolver.with_config_path(path.clone());
    }
    let root_folder = resolver.resolve();

    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = flyer_resolver::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    let resolver_config = ResolverConfig::from_settings(&toml_config.resolver)
        .map_err(|e| anyhow::anyhow!("Invalid [resolver] config: {}", e))?;
    info!(
        threshold = resolver_config.acceptance_threshold,
        max_candidates = resolver_config.max_candidates,
        product_timeout_secs = resolver_config.product_timeout.as_secs(),
        "Resolver configured"
    );

    let toml_config = Arc::new(toml_config);
    if let Err(e) = flyer_resolver::config::build_collaborators(&db_pool, &toml_config).await {
        warn!("Collaborators not ready, runs will be refused until configured: {}", e);
    }

    let event_bus = EventBus::new(1000);

    let mut state = AppState::new(
        db_pool,
        event_bus,
        CollaboratorSource::Configured(toml_config),
        resolver_config,
    );
    if let Some(path) = config_path {
        state = state.with_config_path(path);
    }

    let app = flyer_resolver::build_router(state);

    let address = format!("127.0.0.1:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on http://{}", address);
    info!("Health check: http://{}/health", address);

    axum::serve(listener, app).await?;

    Ok(())
}
