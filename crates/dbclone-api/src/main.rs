//! dbclone HTTP API server.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dbclone_api::{router, AppState, ServerConfig};
use dbclone_core::defaults;
use dbclone_db::{PgConnector, PoolConfig};
use dbclone_jobs::{ClonerOrchestrator, OrchestratorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "dbclone_api=debug,dbclone_jobs=debug,dbclone_db=debug,tower_http=debug".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("dbclone-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let server_config = ServerConfig::from_env();
    let orchestrator_config = OrchestratorConfig::from_env();

    let max_connections = std::env::var("CLONER_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(defaults::MAX_CONNECTIONS)
        .max(1);
    let pool_config = PoolConfig::new()
        .max_connections(max_connections)
        .connect_timeout(orchestrator_config.connect_timeout);

    info!(
        batch_size = orchestrator_config.default_batch_size,
        write_retries = orchestrator_config.write_retries,
        stall_timeout_secs = orchestrator_config.stall_timeout.as_secs(),
        max_connections,
        "Orchestrator configured"
    );

    let sessions = server_config.session_provider()?;
    let orchestrator = Arc::new(ClonerOrchestrator::new(
        Arc::new(PgConnector::new(pool_config)),
        orchestrator_config,
    ));
    let _sweeper = orchestrator.spawn_sweeper();

    let app = router(AppState::new(orchestrator, sessions), &server_config);

    let addr: SocketAddr = server_config.bind_addr().parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
