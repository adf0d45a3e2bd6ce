//! cvr-finalizer - conversation response finalization service
//!
//! Accepts finalization triggers, dispatches them to its own internal
//! worker endpoint, and runs the finalization pipeline there.

use anyhow::{Context, Result};
use clap::Parser;
use cvr_common::config::TomlConfig;
use cvr_common::db::init_database;
use cvr_finalizer::db::SqliteStore;
use cvr_finalizer::services::ChatCompletionsClient;
use cvr_finalizer::{build_router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Command-line arguments (highest configuration priority)
#[derive(Parser, Debug)]
#[command(name = "cvr-finalizer", version, about = "Conversation response finalization service")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (e.g. 127.0.0.1:5740)
    #[arg(short, long)]
    bind: Option<String>,

    /// SQLite database path
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "CVR_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration is read before tracing so the configured level applies
    let (mut config, config_path) = TomlConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting CVR Finalizer (cvr-finalizer) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match &config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => warn!("No configuration file found, using compiled defaults"),
    }
    info!("Database path: {}", config.database_path.display());

    let pool = match init_database(&config.database_path).await {
        Ok(pool) => {
            info!("✓ Database ready");
            pool
        }
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };

    let llm = ChatCompletionsClient::new(&config.llm).context("Failed to build LLM client")?;
    let state = AppState::assemble(&config, Arc::new(SqliteStore::new(pool)), Arc::new(llm))?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("cvr-finalizer listening on http://{}", config.bind_addr);
    info!("Health check: http://{}/health", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
