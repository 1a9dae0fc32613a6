//! Health check endpoint

use axum::{Json, extract::State};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::api::state::ApiState;

/// GET /api/v1/health
///
/// Reports `ok` while the store answers its health check, `degraded` otherwise.
pub async fn health_check(State(state): State<ApiState>) -> Json<Value> {
    let now = Utc::now();
    let uptime_seconds = (now - state.started_at).num_seconds();

    let (status, store) = match state.store.health_check().await {
        Ok(health) if health.healthy => ("ok", json!(health)),
        Ok(health) => ("degraded", json!(health)),
        Err(e) => {
            warn!("store health check failed: {e}");
            ("degraded", json!({ "healthy": false, "message": e.to_string() }))
        }
    };

    Json(json!({
        "status": status,
        "timestamp": now.to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "store": store,
    }))
}
