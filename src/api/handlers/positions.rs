use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::PositionStore;
use crate::models::Position;
use crate::services::position_monitor::exit_reason;
use crate::AppState;

use super::ApiResponse;

/// GET /api/positions
pub async fn list(State(state): State<AppState>) -> Json<ApiResponse<Vec<Position>>> {
    match state.positions.all_positions(200).await {
        Ok(positions) => Json(ApiResponse::ok(positions)),
        Err(e) => Json(ApiResponse::err(e.to_string())),
    }
}

/// POST /api/positions/:id/close — Flatten a position at market.
pub async fn close(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<ApiResponse<Position>> {
    tracing::info!(position_id = %id, "Manual close requested via control API");

    match state.monitor.close_position(id, exit_reason::MANUAL).await {
        Ok(position) => Json(ApiResponse::ok(position)),
        Err(e) => Json(ApiResponse::err(e.to_string())),
    }
}

#[derive(Deserialize)]
pub struct ThresholdBody {
    pub percent: Decimal,
}

/// PUT /api/positions/:id/stop-loss
pub async fn update_stop_loss(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ThresholdBody>,
) -> Json<ApiResponse<Position>> {
    match state.monitor.update_stop_loss(id, body.percent).await {
        Ok(position) => Json(ApiResponse::ok(position)),
        Err(e) => Json(ApiResponse::err(e.to_string())),
    }
}

/// PUT /api/positions/:id/take-profit
pub async fn update_take_profit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ThresholdBody>,
) -> Json<ApiResponse<Position>> {
    match state.monitor.update_take_profit(id, body.percent).await {
        Ok(position) => Json(ApiResponse::ok(position)),
        Err(e) => Json(ApiResponse::err(e.to_string())),
    }
}
