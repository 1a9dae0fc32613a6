//! Metrics aggregator - folds raw samples into windowed statistics
//!
//! ## Design
//!
//! The aggregator keeps the raw sample history of every client, ordered by the
//! samples' own timestamps (arrival order is irrelevant, probes may complete out
//! of order under retries). Every [`AggregateWindow`] is computed from the
//! samples in range at snapshot time, so there are no running accumulators that
//! could drift from history.
//!
//! ## Definitions
//!
//! - **Uptime %** = healthy samples / all health samples in range (sample count
//!   is the uptime proxy, not wall-clock time)
//! - **Success rate** = successful / total automations over the metrics samples
//!   in range, undefined when total = 0
//! - **Trends** compare the window with the immediately preceding window of the
//!   same length, undefined when that window has no data
//!
//! A metrics sample belongs to the window containing its `window.start`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

use crate::model::{
    ClientId, HealthSample, HealthStatus, MetricName, MetricsSample, MetricsWindow, Sample,
    SystemKey, Timeframe,
};

/// Aggregated health state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Healthy,
    /// Some but not all systems are failing
    Degraded,
    /// Every system is down or unreachable
    Down,
    /// No health samples in range
    Unknown,
}

impl AggregateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateStatus::Healthy => "healthy",
            AggregateStatus::Degraded => "degraded",
            AggregateStatus::Down => "down",
            AggregateStatus::Unknown => "unknown",
        }
    }

    fn from_latest(statuses: &[HealthStatus]) -> Self {
        if statuses.is_empty() {
            return AggregateStatus::Unknown;
        }
        if statuses.iter().all(|s| s.is_healthy()) {
            return AggregateStatus::Healthy;
        }
        if statuses
            .iter()
            .all(|s| matches!(s, HealthStatus::Down | HealthStatus::Unreachable))
        {
            return AggregateStatus::Down;
        }
        AggregateStatus::Degraded
    }
}

/// Latest observed state of one system inside a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub system_name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub latency_ms: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

/// Change of each headline value relative to the prior window
///
/// Percentage values (uptime, success rate) are reported in percentage points,
/// everything else as percent change. `None` means undefined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trends {
    pub uptime_delta: Option<f64>,
    pub success_rate_delta: Option<f64>,
    pub response_time_change: Option<f64>,
    pub automation_volume_change: Option<f64>,
    pub cost_savings_change: Option<f64>,
    pub direction: Option<TrendDirection>,
}

impl Trends {
    /// Trend of a threshold metric, in the unit the metric is compared in
    pub fn for_metric(&self, metric: MetricName) -> Option<f64> {
        match metric {
            MetricName::Uptime => self.uptime_delta,
            MetricName::SuccessRate => self.success_rate_delta,
            MetricName::ResponseTime => self.response_time_change,
            MetricName::TotalAutomations => self.automation_volume_change,
            MetricName::CostSavings => self.cost_savings_change,
            _ => None,
        }
    }
}

/// Derived statistics for one client over one timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateWindow {
    pub client_id: ClientId,
    pub timeframe: Timeframe,
    pub window: MetricsWindow,
    pub status: AggregateStatus,
    pub systems: Vec<SystemStatus>,

    pub health_samples: usize,
    pub healthy_samples: usize,
    pub unreachable_samples: usize,
    pub uptime_percentage: Option<f64>,
    pub unreachable_rate: Option<f64>,
    pub avg_latency_ms: Option<f64>,

    pub metrics_samples: usize,
    pub total_automations: u64,
    pub successful_automations: u64,
    pub failed_automations: u64,
    pub success_rate: Option<f64>,
    pub avg_processing_time: Option<f64>,
    pub cost_savings: f64,

    pub trends: Trends,
}

impl AggregateWindow {
    /// Current value of a threshold metric; `None` when undefined
    pub fn value(&self, metric: MetricName) -> Option<f64> {
        let has_metrics = self.metrics_samples > 0;
        match metric {
            MetricName::Uptime => self.uptime_percentage,
            MetricName::SuccessRate => self.success_rate,
            MetricName::ResponseTime => self.avg_latency_ms,
            MetricName::UnreachableRate => self.unreachable_rate,
            MetricName::TotalAutomations => has_metrics.then_some(self.total_automations as f64),
            MetricName::FailedAutomations => has_metrics.then_some(self.failed_automations as f64),
            MetricName::AvgProcessingTime => self.avg_processing_time,
            MetricName::CostSavings => has_metrics.then_some(self.cost_savings),
        }
    }
}

/// Plain statistics over one range, shared by the window and its trend baseline
#[derive(Debug, Default)]
struct WindowStats {
    health_samples: usize,
    healthy_samples: usize,
    unreachable_samples: usize,
    latency_sum: f64,
    responded_samples: usize,
    metrics_samples: usize,
    total_automations: u64,
    successful_automations: u64,
    failed_automations: u64,
    processing_time_sum: f64,
    cost_savings: f64,
}

impl WindowStats {
    fn collect(history: &ClientHistory, window: MetricsWindow) -> Self {
        let mut stats = WindowStats::default();

        for sample in history.health_in(window) {
            stats.health_samples += 1;
            match sample.status {
                HealthStatus::Healthy => stats.healthy_samples += 1,
                HealthStatus::Unreachable => stats.unreachable_samples += 1,
                HealthStatus::Degraded | HealthStatus::Down => {}
            }
            if sample.status != HealthStatus::Unreachable {
                stats.latency_sum += sample.latency_ms;
                stats.responded_samples += 1;
            }
        }

        for sample in history.metrics_in(window) {
            stats.metrics_samples += 1;
            stats.total_automations += sample.total_automations;
            stats.successful_automations += sample.successful_automations;
            stats.failed_automations += sample.failed_automations;
            stats.processing_time_sum += sample.processing_time_sum;
            stats.cost_savings += sample.cost_savings;
        }

        stats
    }

    fn ratio(part: usize, total: usize) -> Option<f64> {
        (total > 0).then(|| part as f64 / total as f64 * 100.0)
    }

    fn uptime(&self) -> Option<f64> {
        Self::ratio(self.healthy_samples, self.health_samples)
    }

    fn unreachable_rate(&self) -> Option<f64> {
        Self::ratio(self.unreachable_samples, self.health_samples)
    }

    fn avg_latency(&self) -> Option<f64> {
        (self.responded_samples > 0).then(|| self.latency_sum / self.responded_samples as f64)
    }

    fn success_rate(&self) -> Option<f64> {
        (self.total_automations > 0)
            .then(|| self.successful_automations as f64 / self.total_automations as f64 * 100.0)
    }

    fn avg_processing_time(&self) -> Option<f64> {
        (self.total_automations > 0)
            .then(|| self.processing_time_sum / self.total_automations as f64)
    }

    fn automation_volume(&self) -> Option<f64> {
        (self.metrics_samples > 0).then_some(self.total_automations as f64)
    }

    fn cost(&self) -> Option<f64> {
        (self.metrics_samples > 0).then_some(self.cost_savings)
    }
}

fn delta(current: Option<f64>, prior: Option<f64>) -> Option<f64> {
    Some(current? - prior?)
}

fn percent_change(current: Option<f64>, prior: Option<f64>) -> Option<f64> {
    let (current, prior) = (current?, prior?);
    if prior == 0.0 {
        return (current == 0.0).then_some(0.0);
    }
    Some((current - prior) / prior * 100.0)
}

fn compute_trends(current: &WindowStats, prior: &WindowStats) -> Trends {
    let automation_volume_change =
        percent_change(current.automation_volume(), prior.automation_volume());

    Trends {
        uptime_delta: delta(current.uptime(), prior.uptime()),
        success_rate_delta: delta(current.success_rate(), prior.success_rate()),
        response_time_change: percent_change(current.avg_latency(), prior.avg_latency()),
        automation_volume_change,
        cost_savings_change: percent_change(current.cost(), prior.cost()),
        direction: automation_volume_change.map(|change| {
            if change > 0.0 {
                TrendDirection::Up
            } else if change < 0.0 {
                TrendDirection::Down
            } else {
                TrendDirection::Stable
            }
        }),
    }
}

/// Raw history of one client, each list sorted by sample timestamp
#[derive(Debug, Default)]
struct ClientHistory {
    health: Vec<HealthSample>,
    metrics: Vec<MetricsSample>,
}

impl ClientHistory {
    fn insert_health(&mut self, sample: HealthSample) {
        let at = self
            .health
            .partition_point(|s| s.timestamp <= sample.timestamp);
        self.health.insert(at, sample);
    }

    fn insert_metrics(&mut self, sample: MetricsSample) {
        let at = self
            .metrics
            .partition_point(|s| s.window.start <= sample.window.start);
        self.metrics.insert(at, sample);
    }

    fn health_in(&self, window: MetricsWindow) -> &[HealthSample] {
        let lo = self.health.partition_point(|s| s.timestamp < window.start);
        let hi = self.health.partition_point(|s| s.timestamp < window.end);
        &self.health[lo..hi.max(lo)]
    }

    fn metrics_in(&self, window: MetricsWindow) -> &[MetricsSample] {
        let lo = self
            .metrics
            .partition_point(|s| s.window.start < window.start);
        let hi = self.metrics.partition_point(|s| s.window.start < window.end);
        &self.metrics[lo..hi.max(lo)]
    }

    fn latest_per_system(&self, window: MetricsWindow) -> Vec<SystemStatus> {
        let mut latest: HashMap<&str, &HealthSample> = HashMap::new();
        for sample in self.health_in(window) {
            // sorted ascending, so later entries win
            latest.insert(sample.system_name.as_str(), sample);
        }

        let mut systems: Vec<SystemStatus> = latest
            .into_values()
            .map(|s| SystemStatus {
                system_name: s.system_name.clone(),
                status: s.status,
                last_check: s.timestamp,
                latency_ms: s.latency_ms,
                error: s.error.clone(),
            })
            .collect();
        systems.sort_by(|a, b| a.system_name.cmp(&b.system_name));
        systems
    }

    fn forget_system(&mut self, system_name: &str) -> usize {
        let before = self.health.len() + self.metrics.len();
        self.health.retain(|s| s.system_name != system_name);
        self.metrics.retain(|s| s.system_name != system_name);
        before - (self.health.len() + self.metrics.len())
    }

    fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.health.len() + self.metrics.len();
        self.health.retain(|s| s.timestamp >= cutoff);
        self.metrics.retain(|s| s.window.end > cutoff);
        before - (self.health.len() + self.metrics.len())
    }
}

/// Shared, concurrently readable sample history
///
/// `record` and `snapshot` may run concurrently. A snapshot is computed under a
/// single read guard, so it sees every sample recorded before it started and
/// none recorded after.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    histories: RwLock<HashMap<ClientId, ClientHistory>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample to its client's history
    pub async fn record(&self, sample: Sample) {
        let mut histories = self.histories.write().await;
        match sample {
            Sample::Health(sample) => {
                trace!(client = %sample.client_id, system = %sample.system_name, status = %sample.status, "recording health sample");
                histories
                    .entry(sample.client_id.clone())
                    .or_default()
                    .insert_health(sample);
            }
            Sample::Metrics(sample) => {
                trace!(client = %sample.client_id, system = %sample.system_name, total = sample.total_automations, "recording metrics sample");
                histories
                    .entry(sample.client_id.clone())
                    .or_default()
                    .insert_metrics(sample);
            }
        }
    }

    /// Aggregate window ending now
    pub async fn snapshot(&self, client_id: &str, timeframe: Timeframe) -> AggregateWindow {
        self.snapshot_at(client_id, timeframe, Utc::now()).await
    }

    /// Aggregate window `[now - timeframe, now)`
    #[instrument(skip(self), level = "trace")]
    pub async fn snapshot_at(
        &self,
        client_id: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> AggregateWindow {
        let histories = self.histories.read().await;
        let empty = ClientHistory::default();
        let history = histories.get(client_id).unwrap_or(&empty);

        let window = timeframe.window_ending(now);
        let current = WindowStats::collect(history, window);
        let prior = WindowStats::collect(history, timeframe.prior_window(now));
        let systems = history.latest_per_system(window);
        let latest: Vec<HealthStatus> = systems.iter().map(|s| s.status).collect();

        AggregateWindow {
            client_id: client_id.to_string(),
            timeframe,
            window,
            status: AggregateStatus::from_latest(&latest),
            systems,
            health_samples: current.health_samples,
            healthy_samples: current.healthy_samples,
            unreachable_samples: current.unreachable_samples,
            uptime_percentage: current.uptime(),
            unreachable_rate: current.unreachable_rate(),
            avg_latency_ms: current.avg_latency(),
            metrics_samples: current.metrics_samples,
            total_automations: current.total_automations,
            successful_automations: current.successful_automations,
            failed_automations: current.failed_automations,
            success_rate: current.success_rate(),
            avg_processing_time: current.avg_processing_time(),
            cost_savings: current.cost_savings,
            trends: compute_trends(&current, &prior),
        }
    }

    /// Drop samples older than `cutoff`; returns how many were removed
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut histories = self.histories.write().await;
        let removed = histories
            .values_mut()
            .map(|history| history.prune_before(cutoff))
            .sum();
        if removed > 0 {
            debug!("pruned {removed} samples older than {cutoff}");
        }
        removed
    }

    /// Remove the history of a client entirely
    pub async fn forget_client(&self, client_id: &str) {
        if let Entry::Occupied(entry) = self.histories.write().await.entry(client_id.to_string()) {
            entry.remove();
        }
    }

    /// Remove the history of one system, so it no longer counts towards its
    /// client's status or statistics
    pub async fn forget_system(&self, key: &SystemKey) -> usize {
        let mut histories = self.histories.write().await;
        let removed = histories
            .get_mut(&key.client_id)
            .map(|history| history.forget_system(&key.system_name))
            .unwrap_or(0);
        debug!("forgot {removed} samples of {key}");
        removed
    }

    /// Number of samples held for a client
    pub async fn sample_count(&self, client_id: &str) -> usize {
        self.histories
            .read()
            .await
            .get(client_id)
            .map(|h| h.health.len() + h.metrics.len())
            .unwrap_or(0)
    }
}
