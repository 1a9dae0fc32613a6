//! Client, system, snapshot and report endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    aggregator::AggregateWindow,
    api::{error::ApiResult, state::ApiState},
    config::ClientConfig,
    control::FleetOverview,
    model::{Client, Timeframe},
    registry::SystemSpec,
    reports::{ReportDocument, ReportType},
};

/// Query parameters of the snapshot endpoint
#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    /// One of 24h, 7d, 30d, 90d (default: 24h)
    timeframe: Option<String>,
}

/// GET /api/v1/clients
///
/// Fleet overview of every active client
pub async fn list_clients(State(state): State<ApiState>) -> Json<FleetOverview> {
    Json(state.control.fleet_overview().await)
}

/// POST /api/v1/clients
pub async fn create_client(
    State(state): State<ApiState>,
    Json(registration): Json<ClientConfig>,
) -> ApiResult<(StatusCode, Json<Client>)> {
    let client = state.control.register_client(registration).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

/// DELETE /api/v1/clients/:id
///
/// Deregisters the client, its systems and its history
pub async fn delete_client(
    State(state): State<ApiState>,
    Path(client_id): Path<String>,
) -> ApiResult<Json<Client>> {
    Ok(Json(state.control.deregister_client(&client_id).await?))
}

/// POST /api/v1/clients/:id/systems
pub async fn add_system(
    State(state): State<ApiState>,
    Path(client_id): Path<String>,
    Json(spec): Json<SystemSpec>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let name = spec.name.clone();
    state.control.add_system(&client_id, spec).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "client_id": client_id, "system": name })),
    ))
}

/// DELETE /api/v1/clients/:id/systems/:name
pub async fn remove_system(
    State(state): State<ApiState>,
    Path((client_id, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.control.remove_system(&client_id, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/clients/:id/snapshot?timeframe=7d
pub async fn get_snapshot(
    State(state): State<ApiState>,
    Path(client_id): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> ApiResult<Json<AggregateWindow>> {
    let timeframe = match query.timeframe.as_deref() {
        Some(tf) => tf.parse::<Timeframe>()?,
        None => Timeframe::Day,
    };
    Ok(Json(state.control.snapshot(&client_id, timeframe).await?))
}

/// GET /api/v1/clients/:id/reports/:report_type
pub async fn get_report(
    State(state): State<ApiState>,
    Path((client_id, report_type)): Path<(String, String)>,
) -> ApiResult<Json<ReportDocument>> {
    let report_type = report_type.parse::<ReportType>()?;
    Ok(Json(state.control.report(&client_id, report_type).await?))
}
