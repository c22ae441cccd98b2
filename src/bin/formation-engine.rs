//! # Formation Engine Server
//!
//! Runs the notification engine over the in-memory stores behind the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! formation-engine --config-dir config --environment production
//! FORMATION_ENGINE__WEB__BIND_ADDRESS=127.0.0.1:9090 formation-engine
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use formation_engine::config::ConfigManager;
use formation_engine::logging;
use formation_engine::orchestration::{EngineStores, FormationEngine};
use formation_engine::web::{create_app, AppState};

#[derive(Debug, Parser)]
#[command(name = "formation-engine")]
#[command(about = "Formation assignment notification engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Directory holding base.toml and <environment>.toml
    #[arg(short, long, env = "FORMATION_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Environment overlay to load (development, test, production)
    #[arg(short, long, env = "FORMATION_ENV")]
    environment: Option<String>,

    /// Override web.bind_address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let manager = match &cli.environment {
        Some(environment) => {
            ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        }
        None => ConfigManager::load_from_directory(cli.config_dir.clone()),
    }
    .context("failed to load configuration")?;

    let mut config = manager.config().clone();
    if let Some(bind) = cli.bind {
        config.web.bind_address = bind;
    }
    config.validate().context("invalid configuration")?;

    logging::init_logging(&config.logging);

    info!("🚀 Starting Formation Engine...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   Environment: {}", manager.environment());

    let engine = FormationEngine::from_config(&config, EngineStores::in_memory())
        .context("failed to build the engine")?;

    if !config.web.enabled {
        warn!("Web API disabled; nothing to serve");
        return Ok(());
    }

    let bind_address = config.web.bind_address.clone();
    let app = create_app(AppState::new(Arc::new(engine), config.web));
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;

    info!("🎉 Formation Engine listening on {}", bind_address);
    info!("   Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("👋 Formation Engine shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(error = %error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!(error = %error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("🛑 Received Ctrl+C"),
        _ = terminate => info!("🛑 Received SIGTERM"),
    }
}
