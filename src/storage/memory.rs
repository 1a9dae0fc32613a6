//! In-memory store (no persistence)
//!
//! Used when no backend is configured and throughout the tests. Everything is
//! lost on restart.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{MonitoringStore, StoreHealth, StoredReport};
use super::error::{StorageError, StorageResult};
use crate::model::{
    AlertEvent, AlertThreshold, Client, ClientSystem, HealthSample, MetricsSample, MetricsWindow,
    Sample, ThresholdId,
};

#[derive(Debug, Default)]
struct MemoryState {
    clients: BTreeMap<String, (Client, Vec<ClientSystem>)>,
    thresholds: BTreeMap<ThresholdId, AlertThreshold>,
    health: Vec<HealthSample>,
    metrics: Vec<MetricsSample>,
    alerts: Vec<AlertEvent>,
    reports: Vec<StoredReport>,
}

/// Store keeping everything behind a single lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports saved so far
    pub async fn reports(&self) -> Vec<StoredReport> {
        self.state.read().await.reports.clone()
    }

    /// Every alert event recorded so far
    pub async fn alert_events(&self) -> Vec<AlertEvent> {
        self.state.read().await.alerts.clone()
    }
}

#[async_trait]
impl MonitoringStore for MemoryStore {
    async fn append_health_sample(&self, sample: &HealthSample) -> StorageResult<()> {
        self.state.write().await.health.push(sample.clone());
        Ok(())
    }

    async fn append_metrics_sample(&self, sample: &MetricsSample) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state.metrics.retain(|m| {
            !(m.client_id == sample.client_id
                && m.system_name == sample.system_name
                && m.window.start == sample.window.start)
        });
        state.metrics.push(sample.clone());
        Ok(())
    }

    async fn load_samples_in_range(
        &self,
        client_id: &str,
        range: MetricsWindow,
    ) -> StorageResult<Vec<Sample>> {
        let state = self.state.read().await;

        let mut samples: Vec<(DateTime<Utc>, Sample)> = state
            .health
            .iter()
            .filter(|s| s.client_id == client_id && range.contains(s.timestamp))
            .map(|s| (s.timestamp, Sample::Health(s.clone())))
            .chain(
                state
                    .metrics
                    .iter()
                    .filter(|s| s.client_id == client_id && range.contains(s.window.start))
                    .map(|s| (s.window.start, Sample::Metrics(s.clone()))),
            )
            .collect();
        samples.sort_by_key(|(ts, _)| *ts);

        debug!("loaded {} samples for {client_id}", samples.len());
        Ok(samples.into_iter().map(|(_, s)| s).collect())
    }

    async fn list_clients(&self) -> StorageResult<Vec<Client>> {
        Ok(self
            .state
            .read()
            .await
            .clients
            .values()
            .map(|(c, _)| c.clone())
            .collect())
    }

    async fn list_systems(&self, client_id: &str) -> StorageResult<Vec<ClientSystem>> {
        Ok(self
            .state
            .read()
            .await
            .clients
            .get(client_id)
            .map(|(_, systems)| systems.clone())
            .unwrap_or_default())
    }

    async fn list_thresholds(&self) -> StorageResult<Vec<AlertThreshold>> {
        Ok(self.state.read().await.thresholds.values().cloned().collect())
    }

    async fn record_alert_event(&self, event: &AlertEvent) -> StorageResult<()> {
        self.state.write().await.alerts.push(event.clone());
        Ok(())
    }

    async fn load_alert_events(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<AlertEvent>> {
        let mut events: Vec<AlertEvent> = self
            .state
            .read()
            .await
            .alerts
            .iter()
            .filter(|e| e.client_id == client_id && e.timestamp >= since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn save_client(&self, client: &Client, systems: &[ClientSystem]) -> StorageResult<()> {
        self.state
            .write()
            .await
            .clients
            .insert(client.client_id.clone(), (client.clone(), systems.to_vec()));
        Ok(())
    }

    async fn remove_client(&self, client_id: &str) -> StorageResult<()> {
        self.state
            .write()
            .await
            .clients
            .remove(client_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("client {client_id}")))
    }

    async fn save_threshold(&self, threshold: &AlertThreshold) -> StorageResult<()> {
        self.state
            .write()
            .await
            .thresholds
            .insert(threshold.id, threshold.clone());
        Ok(())
    }

    async fn save_report(&self, report: &StoredReport) -> StorageResult<()> {
        self.state.write().await.reports.push(report.clone());
        Ok(())
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let initial = state.health.len() + state.metrics.len() + state.alerts.len();

        state.health.retain(|s| s.timestamp >= before);
        state.metrics.retain(|s| s.window.start >= before);
        state.alerts.retain(|e| e.timestamp >= before);

        Ok(initial - (state.health.len() + state.metrics.len() + state.alerts.len()))
    }

    async fn health_check(&self) -> StorageResult<StoreHealth> {
        let state = self.state.read().await;
        Ok(StoreHealth {
            healthy: true,
            message: "in-memory store operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("health_samples".to_string(), state.health.len().to_string()),
                ("metrics_samples".to_string(), state.metrics.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
