use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::Ordering;

use crate::db::PositionStore;
use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let breaker = state.breaker.status(Utc::now()).await;
    let open_positions = state.positions.count_open().await.unwrap_or(-1);
    let paused = state.pause_flag.load(Ordering::Relaxed);

    let body = json!({
        "status": if db_ok { "healthy" } else { "unhealthy" },
        "db": if db_ok { "connected" } else { "disconnected" },
        "sniping_paused": paused,
        "open_positions": open_positions,
        "circuit_breaker": breaker,
    });

    if db_ok {
        (StatusCode::OK, Json(body))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    }
}
