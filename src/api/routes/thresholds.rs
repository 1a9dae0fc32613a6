//! Threshold endpoints
//!
//! Creation and edits answer with a dry run of the threshold against the
//! current aggregates, so the operator sees which clients it would fire for.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};

use crate::{
    api::{error::ApiResult, state::ApiState},
    control::ThresholdCheck,
    model::{AlertThreshold, ThresholdId},
    registry::ThresholdSpec,
};

/// GET /api/v1/thresholds
///
/// Every threshold, including deactivated ones
pub async fn list_thresholds(State(state): State<ApiState>) -> Json<Value> {
    let thresholds = state.control.thresholds().await;
    Json(json!({
        "count": thresholds.len(),
        "thresholds": thresholds,
    }))
}

/// POST /api/v1/thresholds
pub async fn create_threshold(
    State(state): State<ApiState>,
    Json(spec): Json<ThresholdSpec>,
) -> ApiResult<(StatusCode, Json<ThresholdCheck>)> {
    let check = state.control.create_threshold(&spec).await?;
    Ok((StatusCode::CREATED, Json(check)))
}

/// PUT /api/v1/thresholds/:id
pub async fn update_threshold(
    State(state): State<ApiState>,
    Path(id): Path<ThresholdId>,
    Json(spec): Json<ThresholdSpec>,
) -> ApiResult<Json<ThresholdCheck>> {
    Ok(Json(state.control.edit_threshold(id, &spec).await?))
}

/// DELETE /api/v1/thresholds/:id
pub async fn deactivate_threshold(
    State(state): State<ApiState>,
    Path(id): Path<ThresholdId>,
) -> ApiResult<Json<AlertThreshold>> {
    Ok(Json(state.control.deactivate_threshold(id).await?))
}
