//! Aquarium server binary.

use anyhow::{Context, Result};
use aquarium_core::config::AppConfig;
use aquarium_server::state::spawn_session_cleanup;
use aquarium_server::{AppState, create_router};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired sessions are purged from the store.
const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Aquarium - offline-first idea sync server
#[derive(Parser, Debug)]
#[command(name = "aquariumd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "AQUARIUM_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration: defaults, then the TOML file if present, then
/// `AQUARIUM_` environment variables (`__` separates nested keys).
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("AQUARIUM_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Aquarium v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    let store = aquarium_store::from_config(&config.store)
        .await
        .context("failed to initialize record store")?;
    store
        .health_check()
        .await
        .context("record store health check failed")?;
    tracing::info!("Record store initialized");

    let _cleanup_handle = spawn_session_cleanup(store.clone(), SESSION_CLEANUP_INTERVAL);

    let state = AppState::new(config.clone(), store);
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!(api_prefix = %config.server.api_prefix, "Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
