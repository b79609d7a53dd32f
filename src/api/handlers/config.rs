use axum::extract::State;
use axum::Json;
use rust_decimal::Decimal;

use crate::errors::AppError;
use crate::execution::SizingLimits;
use crate::AppState;

use super::ApiResponse;

/// GET /api/config — Current global sizing limits.
pub async fn get_config(State(state): State<AppState>) -> Json<ApiResponse<SizingLimits>> {
    let limits = state.limits.read().await.clone();
    Json(ApiResponse::ok(limits))
}

/// PUT /api/config — Replace the global sizing limits. Takes effect on
/// the next execution attempt.
pub async fn update_config(
    State(state): State<AppState>,
    Json(new_limits): Json<SizingLimits>,
) -> Result<Json<ApiResponse<SizingLimits>>, AppError> {
    if new_limits.min_order_quote <= Decimal::ZERO
        || new_limits.max_order_quote < new_limits.min_order_quote
    {
        return Err(AppError::BadRequest(
            "order size bounds must satisfy 0 < min <= max".into(),
        ));
    }
    if new_limits.max_balance_fraction <= Decimal::ZERO
        || new_limits.max_balance_fraction > Decimal::ONE
    {
        return Err(AppError::BadRequest(
            "max_balance_fraction must be in (0, 1]".into(),
        ));
    }

    let mut limits = state.limits.write().await;
    *limits = new_limits.clone();

    tracing::warn!(
        min = %new_limits.min_order_quote,
        max = %new_limits.max_order_quote,
        balance_fraction = %new_limits.max_balance_fraction,
        "Sizing limits updated via control API"
    );

    Ok(Json(ApiResponse::ok(new_limits)))
}
