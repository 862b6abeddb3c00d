// ============================================================================
// Portico Gateway - service entry point
// ============================================================================

use anyhow::{Context, Result};
use portico_config::Config;
use portico_gateway::auth::HttpTokenValidator;
use portico_gateway::{routes, AppState};
use portico_kv::RedisStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bound on the in-flight drain after a shutdown signal
const DRAIN_PERIOD: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Portico Gateway Starting ===");
    info!("Port: {}", config.port);

    info!("Connecting to Redis...");
    let kv = RedisStore::connect(&config.redis_url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis");

    let http_client = AppState::build_http_client()?;
    let validator = Arc::new(HttpTokenValidator::new(
        http_client.clone(),
        config.auth_service_url.clone(),
    ));

    let state = AppState::new(config.clone(), Arc::new(kv), validator, http_client)
        .context("Failed to build gateway state")?;
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!("Listening on {}", config.bind_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGTERM or SIGINT, then arms a watchdog that bounds the
/// drain period: a hung drain exits non-zero instead of blocking forever.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining in-flight requests");

    tokio::spawn(async {
        tokio::time::sleep(DRAIN_PERIOD).await;
        tracing::error!(
            drain_secs = DRAIN_PERIOD.as_secs(),
            "Drain period elapsed with requests still in flight, exiting"
        );
        std::process::exit(1);
    });
}
