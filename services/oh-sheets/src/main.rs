//! Oh Sheets integration service
//!
//! Single-binary service that:
//! 1. Runs the Google and Monday.com OAuth consent flows
//! 2. Stores and refreshes each subject's credentials
//! 3. Calls Sheets, Drive, and Monday GraphQL on the subject's behalf
//! 4. Refreshes expiring tokens in the background

mod api;
mod config;
mod error;
mod metrics;
mod oauth;
mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use credential_manager::spawn_refresh_task;
use sheets_auth::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::state::{AppState, DRAIN_TIMEOUT};

/// Build the axum router with all routes and shared state.
///
/// Request tracking runs as a route layer so it sees the matched path;
/// the concurrency limit wraps everything.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/oauth/{provider}/start", post(oauth::start))
        .route(
            "/oauth/{provider}/callback",
            get(oauth::callback_redirect).post(oauth::callback),
        )
        .route("/oauth/{provider}/status", post(oauth::status))
        .route("/oauth/{provider}/disconnect", post(oauth::disconnect))
        .route("/google/spreadsheets", post(api::google_spreadsheets))
        .route("/google/sheets", post(api::google_sheets))
        .route("/google/append-row", post(api::google_append_row))
        .route("/monday/query", post(api::monday_query))
        .route("/monday/boards", post(api::monday_boards))
        .route("/monday/columns", post(api::monday_columns))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .fallback(not_found)
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

    info!("starting oh-sheets");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

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
        google = config.google.is_some(),
        monday = config.monday.is_some(),
        timeout_secs = config.http.timeout_secs,
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let store: Arc<dyn CredentialStore> = match &config.credentials.path {
        Some(path) => Arc::new(
            FileCredentialStore::load(path.clone())
                .await
                .with_context(|| format!("failed to load credentials from {}", path.display()))?,
        ),
        None => {
            warn!("credentials.path not set, credentials are kept in memory only");
            Arc::new(MemoryCredentialStore::new())
        }
    };

    let app_state = AppState::from_config(&config, http, store, prometheus_handle)
        .context("failed to initialize providers")?;

    let cancel = CancellationToken::new();
    let refresh_handle = config.refresh.enabled.then(|| {
        spawn_refresh_task(
            app_state.managers(),
            Duration::from_secs(config.refresh.interval_secs),
            Duration::from_secs(config.refresh.threshold_secs),
            cancel.clone(),
        )
    });

    let in_flight = app_state.metrics.in_flight.clone();
    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: cancel first, then race the drain against the timer.
    let server_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
        }
    });

    shutdown_signal().await;
    cancel.cancel();

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    if let Some(handle) = refresh_handle
        && let Err(e) = handle.await
    {
        error!(error = %e, "refresh task panicked");
    }

    info!("shutdown complete");
    Ok(())
}

/// One slot of the in-flight gauge, released on drop so a request whose
/// future is cancelled (client disconnect, shutdown) still leaves the count.
struct InFlight(Arc<AtomicU64>);

impl InFlight {
    fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Count, time, and log every routed request.
async fn track_requests(
    State(state): State<AppState>,
    matched: MatchedPath,
    request: Request,
    next: Next,
) -> Response {
    let route = matched.as_str().to_owned();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let counters = &state.metrics;
    counters.requests_total.fetch_add(1, Ordering::Relaxed);
    let in_flight = InFlight::enter(&counters.in_flight);
    let started = Instant::now();

    let span = info_span!("request", request_id = %request_id, route = %route);
    let mut response = next.run(request).instrument(span).await;

    drop(in_flight);
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        counters.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    let elapsed = started.elapsed();
    metrics::record_request(&route, status.as_u16(), elapsed.as_secs_f64());
    info!(
        request_id,
        route,
        status = status.as_u16(),
        duration_ms = elapsed.as_millis() as u64,
        "request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Health endpoint: status, uptime, request counters, and stored
/// connections per provider. 503 when the credential store is unreadable.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);

    let mut connections = serde_json::Map::new();
    let mut store_error = None;
    for manager in state.managers() {
        match manager.subjects().await {
            Ok(subjects) => {
                connections.insert(manager.provider().to_string(), subjects.len().into());
            }
            Err(e) => store_error = Some(e.to_string()),
        }
    }

    let (status_code, status) = match &store_error {
        None => (StatusCode::OK, "ok"),
        Some(_) => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
    };
    let mut body = serde_json::json!({
        "status": status,
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
        "connections": connections,
    });
    if let Some(e) = store_error {
        body["error"] = e.into();
    }

    (status_code, axum::Json(body))
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

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({ "error": "no such route", "code": "not_found" })),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
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
