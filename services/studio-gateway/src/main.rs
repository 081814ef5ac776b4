//! Studio Gateway
//!
//! Single-binary Rust service that:
//! 1. Holds a pool of Gemini API keys
//! 2. Accepts generation and batch requests over HTTP
//! 3. Spreads them across the keys by current-window usage, paced under the rate limits
//! 4. Retries quota errors with backoff and fails over past invalid keys

mod admin;
mod api;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use key_pool::{FailoverExecutor, Session, TaskScheduler};
use metrics_exporter_prometheus::PrometheusHandle;
use provider::{GeminiProvider, Provider};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminState;
use crate::config::Config;
use crate::error::json_response;

/// How long in-flight requests may run after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    executor: Arc<FailoverExecutor>,
    scheduler: Arc<TaskScheduler>,
    /// Held for the whole of one generation or batch
    dispatch: Arc<Mutex<()>>,
    max_batch_tasks: usize,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the public router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/generate", post(api::generate))
        .route("/v1/batches", post(api::batch))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting studio-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_listen_addr = %config.server.admin_listen_addr,
        base_url = %config.upstream.base_url,
        credentials = config.credentials.len(),
        rate_limit_overrides = config.rate_limit.models.len(),
        "configuration loaded"
    );

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let provider: Arc<dyn Provider> = Arc::new(GeminiProvider::new(
        client,
        config.upstream.base_url.clone(),
        Duration::from_secs(config.upstream.timeout_secs),
    ));

    let session = Arc::new(Session::new(config.rate_limits()));
    let loaded = session
        .load_credentials(config.credentials.iter().map(|key| key.expose().as_str()))
        .await;
    if loaded == 0 {
        warn!(
            admin_listen_addr = %config.server.admin_listen_addr,
            "no API keys configured, load them with PUT /admin/credentials"
        );
    }

    let app_state = AppState {
        executor: Arc::new(FailoverExecutor::new(
            session.clone(),
            provider.clone(),
            config.retry_policy(),
        )),
        scheduler: Arc::new(TaskScheduler::new(session.clone())),
        dispatch: Arc::new(Mutex::new(())),
        max_batch_tasks: config.batch.max_tasks,
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let app = build_router(
        app_state,
        config.server.max_connections,
        config.server.max_body_bytes,
    );
    let admin_app = admin::build_admin_router(AdminState::new(session, provider));

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    let admin_addr = config.server.admin_listen_addr;
    let admin_listener = TcpListener::bind(admin_addr)
        .await
        .with_context(|| format!("failed to bind admin listener to {admin_addr}"))?;

    info!(addr = %listen_addr, admin_addr = %admin_addr, "accepting requests");

    // The drain timeout starts at signal receipt, not at server start: both
    // servers are told to drain, then the drain races the timeout.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(serve(listener, app, shutdown_rx.clone()));
    let admin_server = tokio::spawn(serve(admin_listener, admin_app, shutdown_rx));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(DRAIN_TIMEOUT, async { tokio::join!(server, admin_server) }).await
    {
        Ok((public, admin)) => {
            for (name, result) in [("public", public), ("admin", admin)] {
                match result {
                    Ok(Ok(())) => info!(listener = name, "all in-flight requests drained"),
                    Ok(Err(e)) => error!(listener = name, error = %e, "server error during shutdown"),
                    Err(e) => error!(listener = name, error = %e, "server task panicked"),
                }
            }
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

/// Health endpoint: pool health plus uptime.
/// Returns 200 while any key is usable, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> Response {
    let pool = state.executor.session().health().await;
    let status_code = if pool["status"] == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    json_response(
        status_code,
        &serde_json::json!({
            "status": pool["status"],
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "pool": pool,
        }),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
