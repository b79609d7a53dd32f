use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::TargetStore;
use crate::errors::AppError;
use crate::execution::ExecutionOutcome;
use crate::models::{SnipeTarget, TargetStatus};
use crate::AppState;

use super::ApiResponse;

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

/// GET /api/targets — Recent snipe targets, optionally filtered by status.
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<Vec<SnipeTarget>>>, AppError> {
    let status = match params.status.as_deref() {
        Some(s) => Some(
            TargetStatus::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("unknown status '{s}'")))?,
        ),
        None => None,
    };

    let limit = params.limit.unwrap_or(100).clamp(1, 500);
    let targets = state.targets.list(status, limit).await?;

    Ok(Json(ApiResponse::ok(targets)))
}

#[derive(Serialize)]
pub struct ExecuteResult {
    pub outcome: &'static str,
    pub detail: Option<String>,
}

/// POST /api/targets/:id/execute — Manually trigger execution of one
/// target, bypassing the scheduler cadence (not its safety checks).
pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Json<ApiResponse<ExecuteResult>> {
    tracing::info!(target_id = id, "Manual execution triggered via control API");

    let outcome = state.engine.execute_target(id).await;
    let detail = match &outcome {
        ExecutionOutcome::Success { position_id, fill_price } => {
            Some(format!("position {position_id} opened at {fill_price}"))
        }
        ExecutionOutcome::Rejected(msg) | ExecutionOutcome::Failed(msg) => Some(msg.clone()),
        _ => None,
    };

    Json(ApiResponse::ok(ExecuteResult {
        outcome: outcome.label(),
        detail,
    }))
}
