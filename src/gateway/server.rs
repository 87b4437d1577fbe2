use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::event::LifecycleEvent;
use crate::pipeline::{FixRunner, JobOptions};

use super::bus::EventBus;
use super::ws;

/// Configuration for the gateway server.
pub struct ServerConfig {
    pub port: u16,
    /// Permissive CORS and all-interface bind for local development.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            dev_mode: false,
        }
    }
}

/// Shared state behind every handler.
pub struct AppState {
    pub bus: Arc<EventBus>,
    pub runner: Arc<FixRunner>,
}

/// Build the full application router: event ingestion, broadcast
/// WebSocket, health, and the orchestration entry points.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/internal/event", post(ingest_event_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/api/fix", post(fix_handler))
        .route("/api/analysis", post(analysis_handler))
        .with_state(state)
}

/// Start the gateway server.
pub async fn start_server(config: ServerConfig, runner: Arc<FixRunner>) -> Result<()> {
    let state = Arc::new(AppState {
        bus: Arc::new(EventBus::new()),
        runner,
    });

    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "Soot gateway running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        return;
    }
    tracing::info!("Shutting down...");
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn health_handler() -> &'static str {
    "ok"
}

/// Ingestion endpoint: every webhook event from the pipeline is routed
/// unconditionally into the broadcast. Malformed bodies are rejected by
/// the extractor; delivery counts are observability only.
async fn ingest_event_handler(
    State(state): State<Arc<AppState>>,
    Json(event): Json<LifecycleEvent>,
) -> StatusCode {
    let delivered = state.bus.publish(&event).await;
    tracing::debug!(agent_id = event.agent_id(), delivered, "Event ingested");
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct FixRequest {
    instruction: String,
    #[serde(default)]
    repo_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct FixAccepted {
    job_id: Uuid,
    slot: u8,
}

async fn fix_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FixRequest>,
) -> Response {
    let config = state.runner.config();
    let repo_url = req
        .repo_url
        .unwrap_or_else(|| config.default_repo_url.clone());
    let options = JobOptions {
        run_in_background: config.run_in_background,
        run_smoke_test: config.run_smoke_test,
    };

    if options.run_in_background {
        // Queued submission: the caller gets a handle immediately and
        // follows progress through the event stream.
        let handle = Arc::clone(&state.runner).spawn_fix(&req.instruction, &repo_url, options);
        let accepted = FixAccepted {
            job_id: handle.job_id,
            slot: handle.slot,
        };
        tokio::spawn(async move {
            if let Err(e) = handle.join.await {
                tracing::error!(error = %e, "Background fix task panicked");
            }
        });
        return (StatusCode::ACCEPTED, Json(accepted)).into_response();
    }

    match state.runner.run_fix(&req.instruction, &repo_url, options).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)).into_response(),
    }
}

async fn analysis_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FixRequest>,
) -> Response {
    match state
        .runner
        .run_analysis(&req.instruction, req.repo_url.as_deref())
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)).into_response(),
    }
}
