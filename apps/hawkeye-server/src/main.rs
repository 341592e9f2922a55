use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

mod backend;
mod config;
mod registry;
mod session;
mod telemetry;
mod websocket;

use config::{Cli, ServerConfig};
use registry::SessionRegistry;

pub struct AppState {
    registry: SessionRegistry,
    metrics: PrometheusHandle,
}

#[tokio::main]
async fn main() {
    if let Err(err) = start().await {
        error!(error = ?err, "hawkeye-server failed");
        eprintln!("hawkeye-server: {err:#}");
        std::process::exit(1);
    }
}

async fn start() -> Result<()> {
    let telemetry = telemetry::Telemetry::init()?;
    let config = ServerConfig::try_from(Cli::parse())?;
    info!(
        listen_addr = %config.listen_addr,
        backend = ?config.backend,
        gateway = %config.settings.program,
        socket_dir = %config.settings.socket_dir.display(),
        "starting hawkeye server"
    );
    run(config, telemetry.metrics_handle()).await
}

async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let launcher = backend::launcher(config.backend, config.settings.clone());
    let registry = SessionRegistry::new(launcher);
    let state = Arc::new(AppState {
        registry: registry.clone(),
        metrics,
    });

    let router = Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route("/healthz", get(health_handler))
        .route("/sessions", get(sessions_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("hawkeye server listening on {}", config.listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    let report = registry.remove_all().await;
    info!(
        removed = report.removed,
        failed = report.failed,
        "shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received"),
        _ = terminate => info!("terminate received"),
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "sessions": state.registry.len() }))
}

async fn sessions_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.registry.snapshot().await;
    Json(json!({ "active": sessions.len(), "sessions": sessions }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
