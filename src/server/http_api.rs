//! HTTP API over a window cache.
//!
//! - GET /v1/window/next?size=N
//! - GET /health
//! - GET /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use prometheus::Registry;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{Config, Mode};
use crate::window::{WindowCache, WindowError};

/// Application state shared across handlers.
pub struct AppState {
    pub cache: Arc<dyn WindowCache<u64>>,
    pub registry: Registry,
    pub config: Arc<Config>,
    pub mode: Mode,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/window/next", get(next_items))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NextParams {
    #[serde(default = "default_size")]
    pub size: usize,
}

fn default_size() -> usize {
    1
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NextResponse {
    pub request_id: String,
    pub items: Vec<u64>,
    pub short_read: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub mode: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn status_for(err: &WindowError) -> StatusCode {
    match err {
        WindowError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn next_items(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NextParams>,
) -> Result<Json<NextResponse>, ApiError> {
    let max = state.config.server.max_request_size;
    if params.size == 0 || params.size > max {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("size must be between 1 and {max}"),
        ));
    }

    let request_id = Uuid::new_v4().to_string();

    match state.cache.next(params.size).await {
        Ok(items) => {
            debug!(
                request_id = request_id,
                requested = params.size,
                served = items.len(),
                "Next request"
            );
            Ok(Json(NextResponse {
                request_id,
                short_read: items.len() < params.size,
                items,
            }))
        }
        Err(err) => {
            warn!(request_id = request_id, error = %err, "Next request failed");
            Err(api_error(status_for(&err), err.to_string()))
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        mode: state.mode.as_str().to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    crate::metrics::render(&state.registry)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
