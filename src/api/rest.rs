// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Read-only operator surface under `/api/v1/`: engine status, the reflected
// open-signal set, and recent closure history.
//
// CORS is configured permissively for development; tighten the allowed
// origins in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::app_state::AppState;

/// Build the status router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(get_health))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/signals/open", get(get_open_signals))
        .route("/api/v1/trades/recent", get(get_recent_trades))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status_snapshot())
}

async fn get_open_signals(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.open_signals())
}

async fn get_recent_trades(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.recent_trades(50) {
        Ok(trades) => Json(trades).into_response(),
        Err(e) => {
            error!(error = %e, "failed to load recent trades");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
