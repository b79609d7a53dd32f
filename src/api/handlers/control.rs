use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::db::PositionStore;
use crate::AppState;

/// POST /api/control/stop — Pause auto-sniping dispatch. The position
/// monitor keeps running: risk management never stops.
pub async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    state.pause_flag.store(true, Ordering::Relaxed);
    tracing::warn!("Auto-sniping PAUSED via control API");
    (StatusCode::OK, Json(json!({ "status": "paused" })))
}

/// POST /api/control/resume — Resume auto-sniping dispatch.
pub async fn resume(State(state): State<AppState>) -> impl IntoResponse {
    state.pause_flag.store(false, Ordering::Relaxed);
    tracing::info!("Auto-sniping RESUMED via control API");
    (StatusCode::OK, Json(json!({ "status": "running" })))
}

/// GET /api/control/status — Current service status.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let paused = state.pause_flag.load(Ordering::Relaxed);
    let breaker = state.breaker.status(Utc::now()).await;
    let open_positions = state.positions.count_open().await.unwrap_or(-1);
    let stats = state.stats.snapshot().await;

    Json(json!({
        "paused": paused,
        "exchange_auth": state.config.has_mexc_auth(),
        "open_positions": open_positions,
        "circuit_breaker": breaker,
        "stats": stats,
    }))
}
