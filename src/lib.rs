pub mod actors;
pub mod aggregator;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod control;
pub mod hub;
pub mod model;
pub mod monitors;
pub mod notify;
pub mod registry;
pub mod reports;
pub mod storage;
pub mod util;

use serde::{Deserialize, Serialize};

/// Payload served by a client's `/health` endpoint
///
/// Every field is optional on the wire; missing or malformed data is classified
/// conservatively by the prober.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: Option<String>,
    pub timestamp: Option<String>,
    pub uptime_percentage: Option<f64>,
    pub response_time_ms: Option<f64>,
}

/// Payload served by a client's `/metrics` endpoint for a date range
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsReport {
    pub total_automations: Option<u64>,
    pub successful_automations: Option<u64>,
    pub failed_automations: Option<u64>,
    /// Sum of processing time in seconds
    pub total_processing_time: Option<f64>,
    pub cost_savings: Option<f64>,
}
