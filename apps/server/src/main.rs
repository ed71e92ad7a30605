//! Phenotype library server - entry point

use std::net::SocketAddr;

use anyhow::Context;
use phenolib_server::{api::create_router, config::Config, logging, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let _telemetry_guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging/telemetry")?;

    let addr = config
        .socket_addr()
        .context("Failed to determine socket address")?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = config.logging.deployment_environment,
        mode = config.server.mode(),
        storage = ?config.storage.backend,
        audit = config.audit.enabled,
        "Starting phenotype library server"
    );

    let state = AppState::new(config)
        .await
        .context("Failed to initialize application state")?;
    let brands: Vec<String> = state
        .brands
        .resolver()
        .names()
        .map(str::to_string)
        .collect();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind TCP listener on {addr}"))?;
    tracing::info!(listen_addr = %addr, brands = ?brands, "Serving /api/v1/ and /healthcheck/");

    // ConnectInfo is the audit trail's last-resort client address.
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    logging::shutdown_telemetry();
    match served {
        Ok(()) => {
            tracing::info!("Server stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Server terminated unexpectedly");
            Err(e.into())
        }
    }
}

/// Resolves on SIGTERM or SIGINT.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
    let sigint = tokio::signal::ctrl_c();

    tokio::select! {
        _ = sigint => {
            tracing::info!(signal = "SIGINT", "Draining connections");
        }
        _ = sigterm.recv() => {
            tracing::info!(signal = "SIGTERM", "Draining connections");
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    tracing::info!(signal = "ctrl-c", "Draining connections");
}
