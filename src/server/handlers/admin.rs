//! Admin endpoints: health, status, metrics, config, cache, players.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::server::state::AppState;

/// Standard admin response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: Some(message.to_string()),
            data: None,
        }
    }
}

pub async fn health() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": now,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "active_players": state.tracker.active_count().await,
    }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.dump())
}

pub async fn config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.redacted())
}

pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.stats())
}

/// POST only; the router returns 405 for other methods.
pub async fn cache_clear(State(state): State<AppState>) -> impl IntoResponse {
    state.cache.clear();
    Json(ApiResponse::ok("Cache cleared"))
}

pub async fn players(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.tracker.players().await)
}
