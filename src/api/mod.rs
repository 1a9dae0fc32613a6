//! Operator HTTP API
//!
//! A thin axum layer over the [`ControlSurface`](crate::control::ControlSurface).
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check (includes store health)
//! - `GET /api/v1/clients` - Fleet overview
//! - `POST /api/v1/clients` - Register a client with its systems
//! - `DELETE /api/v1/clients/:id` - Deregister a client
//! - `POST /api/v1/clients/:id/systems` - Add or replace a system
//! - `DELETE /api/v1/clients/:id/systems/:name` - Remove a system
//! - `GET /api/v1/clients/:id/snapshot?timeframe=7d` - Aggregate window
//! - `GET /api/v1/clients/:id/reports/:type` - On-demand report
//! - `GET|POST /api/v1/thresholds` - List / create thresholds
//! - `PUT|DELETE /api/v1/thresholds/:id` - Edit / deactivate a threshold

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tracing::info;

/// Listener settings of the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Optional bearer token
    pub auth_token: Option<String>,

    pub enable_cors: bool,
}

impl ApiServerConfig {
    pub fn from_config(config: &crate::config::ApiConfig) -> anyhow::Result<Self> {
        let bind_addr = config
            .bind
            .parse()
            .with_context(|| format!("invalid API bind address '{}'", config.bind))?;
        Ok(Self {
            bind_addr,
            auth_token: config.token.clone(),
            enable_cors: true,
        })
    }
}

/// Build the router with every route and its state
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route(
            "/api/v1/clients",
            get(routes::clients::list_clients).post(routes::clients::create_client),
        )
        .route("/api/v1/clients/:id", delete(routes::clients::delete_client))
        .route("/api/v1/clients/:id/systems", post(routes::clients::add_system))
        .route(
            "/api/v1/clients/:id/systems/:name",
            delete(routes::clients::remove_system),
        )
        .route("/api/v1/clients/:id/snapshot", get(routes::clients::get_snapshot))
        .route(
            "/api/v1/clients/:id/reports/:report_type",
            get(routes::clients::get_report),
        )
        .route(
            "/api/v1/thresholds",
            get(routes::thresholds::list_thresholds).post(routes::thresholds::create_threshold),
        )
        .route(
            "/api/v1/thresholds/:id",
            put(routes::thresholds::update_threshold).delete(routes::thresholds::deactivate_threshold),
        )
        .with_state(state)
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiServerConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    info!("starting API server on {}", config.bind_addr);

    let mut app = router(state).layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    if let Some(token) = config.auth_token {
        app = app.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
