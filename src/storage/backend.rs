//! Persistence collaborator interface
//!
//! The engine never issues raw queries. Everything it persists or loads goes
//! through the verbs of [`MonitoringStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StorageResult;
use crate::model::{
    AlertEvent, AlertThreshold, Client, ClientSystem, HealthSample, MetricsSample, MetricsWindow,
    Sample,
};

/// Health of the store as reported by [`MonitoringStore::health_check`]
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub healthy: bool,
    pub message: String,
    pub metadata: HashMap<String, String>,
}

/// A composed report as persisted by the periodic reporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub client_id: String,
    pub report_type: String,
    pub generated_at: DateTime<Utc>,
    /// Serialized report document
    pub document: serde_json::Value,
}

/// Persistence collaborator of the monitoring engine
///
/// Implementations must be `Send + Sync`; the recorder, the evaluator, the
/// reporter and the control surface share one instance.
#[async_trait]
pub trait MonitoringStore: Send + Sync {
    async fn append_health_sample(&self, sample: &HealthSample) -> StorageResult<()>;

    /// Append a metrics sample; a sample for an already stored window replaces it
    async fn append_metrics_sample(&self, sample: &MetricsSample) -> StorageResult<()>;

    /// Samples of a client inside `[range.start, range.end)`, oldest first
    ///
    /// Health samples are matched by timestamp, metrics samples by window start.
    async fn load_samples_in_range(
        &self,
        client_id: &str,
        range: MetricsWindow,
    ) -> StorageResult<Vec<Sample>>;

    /// Every persisted client, deactivated ones included
    async fn list_clients(&self) -> StorageResult<Vec<Client>>;

    async fn list_active_clients(&self) -> StorageResult<Vec<Client>> {
        let clients = self.list_clients().await?;
        Ok(clients.into_iter().filter(|c| c.active).collect())
    }

    async fn list_systems(&self, client_id: &str) -> StorageResult<Vec<ClientSystem>>;

    /// Every persisted threshold, deactivated ones included, ordered by id
    async fn list_thresholds(&self) -> StorageResult<Vec<AlertThreshold>>;

    async fn list_active_thresholds(&self) -> StorageResult<Vec<AlertThreshold>> {
        let thresholds = self.list_thresholds().await?;
        Ok(thresholds.into_iter().filter(|t| t.active).collect())
    }

    async fn record_alert_event(&self, event: &AlertEvent) -> StorageResult<()>;

    /// Alert history of a client since `since`, oldest first
    async fn load_alert_events(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<AlertEvent>>;

    /// Upsert a client and replace its set of systems
    async fn save_client(&self, client: &Client, systems: &[ClientSystem]) -> StorageResult<()>;

    /// Remove a client and its systems; its sample history is left to retention
    async fn remove_client(&self, client_id: &str) -> StorageResult<()>;

    /// Upsert a threshold by id
    async fn save_threshold(&self, threshold: &AlertThreshold) -> StorageResult<()>;

    async fn save_report(&self, report: &StoredReport) -> StorageResult<()>;

    /// Delete samples and alert events older than `before`
    ///
    /// Returns the number of rows deleted.
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    async fn health_check(&self) -> StorageResult<StoreHealth>;

    async fn close(&self) -> StorageResult<()>;
}
