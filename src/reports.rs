//! Report composer
//!
//! A report is a pure function of the aggregator, the registry and the alert
//! history in the store. Composing has no side effects; the periodic reporter
//! is what persists the result.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::aggregator::{AggregateStatus, AggregateWindow, MetricsAggregator, SystemStatus, Trends};
use crate::model::{
    AlertEvent, AlertThreshold, Client, Comparison, HealthStatus, MetricName, MetricsWindow,
    Timeframe,
};
use crate::monitors::evaluation::{headroom, violates};
use crate::notify::{format_value, metric_label};
use crate::registry::{ConfigurationError, Registry};
use crate::storage::{MonitoringStore, StorageError};

/// Minutes of manual work one automation replaces
const MINUTES_SAVED_PER_AUTOMATION: f64 = 15.0;

/// Hourly labor rate used for ROI figures
const HOURLY_LABOR_RATE: f64 = 25.0;

/// Alerts listed individually in a report
const RECENT_ALERTS: usize = 10;

/// Average processing time above which a report suggests optimization (seconds)
const SLOW_PROCESSING_SECS: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl ReportType {
    pub fn timeframe(self) -> Timeframe {
        match self {
            ReportType::Daily => Timeframe::Day,
            ReportType::Weekly => Timeframe::Week,
            ReportType::Monthly => Timeframe::Month,
            ReportType::Quarterly => Timeframe::Quarter,
        }
    }

    /// Timeframes summarized in the report, shortest first
    fn timeframes(self) -> &'static [Timeframe] {
        match self {
            ReportType::Daily => &[Timeframe::Day],
            ReportType::Weekly => &[Timeframe::Day, Timeframe::Week],
            ReportType::Monthly => &[Timeframe::Week, Timeframe::Month],
            ReportType::Quarterly => &[Timeframe::Month, Timeframe::Quarter],
        }
    }

    fn period_label(self) -> &'static str {
        match self {
            ReportType::Daily => "Last 24 Hours",
            ReportType::Weekly => "Last 7 Days",
            ReportType::Monthly => "Last 30 Days",
            ReportType::Quarterly => "Last 90 Days",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::Daily => "daily",
            ReportType::Weekly => "weekly",
            ReportType::Monthly => "monthly",
            ReportType::Quarterly => "quarterly",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(ReportType::Daily),
            "weekly" => Ok(ReportType::Weekly),
            "monthly" => Ok(ReportType::Monthly),
            "quarterly" => Ok(ReportType::Quarterly),
            other => Err(ConfigurationError::InvalidValue(format!(
                "unknown report type '{other}'"
            ))),
        }
    }
}

#[derive(Debug)]
pub enum ReportError {
    UnknownClient(String),
    Storage(StorageError),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::UnknownClient(id) => write!(f, "unknown client: {id}"),
            ReportError::Storage(e) => write!(f, "failed to load report data: {e}"),
        }
    }
}

impl std::error::Error for ReportError {}

impl From<StorageError> for ReportError {
    fn from(err: StorageError) -> Self {
        ReportError::Storage(err)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: AggregateStatus,
    pub uptime_percentage: Option<f64>,
    pub unreachable_rate: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub systems: Vec<SystemStatus>,
    pub critical_issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_automations: u64,
    pub successful_automations: u64,
    pub failed_automations: u64,
    pub success_rate: Option<f64>,
    pub avg_processing_time: Option<f64>,
    pub cost_savings: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiSummary {
    pub time_saved_hours: f64,
    pub labor_savings: f64,
    pub total_value: f64,
}

impl RoiSummary {
    fn from_window(window: &AggregateWindow) -> Self {
        let time_saved_hours =
            window.total_automations as f64 * MINUTES_SAVED_PER_AUTOMATION / 60.0;
        let labor_savings = time_saved_hours * HOURLY_LABOR_RATE;
        Self {
            time_saved_hours,
            labor_savings,
            total_value: window.cost_savings + labor_savings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total: usize,
    pub by_metric: BTreeMap<MetricName, usize>,
    /// Most recent first
    pub recent: Vec<AlertEvent>,
}

impl AlertSummary {
    fn from_events(mut events: Vec<AlertEvent>) -> Self {
        let mut by_metric = BTreeMap::new();
        for event in &events {
            *by_metric.entry(event.threshold.metric).or_insert(0) += 1;
        }

        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let total = events.len();
        events.truncate(RECENT_ALERTS);

        Self {
            total,
            by_metric,
            recent: events,
        }
    }
}

/// Structured status report of one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub client: Client,
    pub report_type: ReportType,
    pub timeframe: Timeframe,
    pub generated_at: DateTime<Utc>,
    pub period: ReportPeriod,
    pub health: HealthSummary,
    pub performance: PerformanceSummary,
    pub roi: RoiSummary,
    pub trends: Trends,
    pub alerts: AlertSummary,
    pub recommendations: Vec<String>,

    /// One aggregate per summarized timeframe, shortest first
    pub windows: Vec<AggregateWindow>,
}

/// Composes [`ReportDocument`]s from current engine state
#[derive(Clone)]
pub struct ReportComposer {
    registry: Arc<Registry>,
    aggregator: Arc<MetricsAggregator>,
    store: Arc<dyn MonitoringStore>,
    equals_epsilon: f64,
}

impl ReportComposer {
    pub fn new(
        registry: Arc<Registry>,
        aggregator: Arc<MetricsAggregator>,
        store: Arc<dyn MonitoringStore>,
        equals_epsilon: f64,
    ) -> Self {
        Self {
            registry,
            aggregator,
            store,
            equals_epsilon,
        }
    }

    pub async fn compose(
        &self,
        client_id: &str,
        report_type: ReportType,
    ) -> Result<ReportDocument, ReportError> {
        self.compose_at(client_id, report_type, Utc::now()).await
    }

    #[instrument(skip(self))]
    pub async fn compose_at(
        &self,
        client_id: &str,
        report_type: ReportType,
        now: DateTime<Utc>,
    ) -> Result<ReportDocument, ReportError> {
        let client = self
            .registry
            .client(client_id)
            .await
            .ok_or_else(|| ReportError::UnknownClient(client_id.to_string()))?;

        let mut windows = Vec::with_capacity(report_type.timeframes().len());
        for timeframe in report_type.timeframes() {
            windows.push(self.aggregator.snapshot_at(client_id, *timeframe, now).await);
        }
        let main = match windows.last() {
            Some(window) => window.clone(),
            None => {
                self.aggregator
                    .snapshot_at(client_id, report_type.timeframe(), now)
                    .await
            }
        };

        let events: Vec<AlertEvent> = self
            .store
            .load_alert_events(client_id, main.window.start)
            .await?
            .into_iter()
            .filter(|e| MetricsWindow::new(main.window.start, now).contains(e.timestamp))
            .collect();

        let thresholds: Vec<Arc<AlertThreshold>> = self
            .registry
            .active_thresholds()
            .await
            .into_iter()
            .filter(|t| t.scope.applies_to(client_id))
            .collect();

        let recommendations = recommendations(&main, &thresholds, self.equals_epsilon);
        debug!(
            "composed {report_type} report: {} alerts, {} recommendations",
            events.len(),
            recommendations.len()
        );

        Ok(ReportDocument {
            client,
            report_type,
            timeframe: main.timeframe,
            generated_at: now,
            period: ReportPeriod {
                label: report_type.period_label().to_string(),
                start: main.window.start,
                end: main.window.end,
            },
            health: HealthSummary {
                status: main.status,
                uptime_percentage: main.uptime_percentage,
                unreachable_rate: main.unreachable_rate,
                avg_latency_ms: main.avg_latency_ms,
                systems: main.systems.clone(),
                critical_issues: critical_issues(&main.systems),
            },
            performance: PerformanceSummary {
                total_automations: main.total_automations,
                successful_automations: main.successful_automations,
                failed_automations: main.failed_automations,
                success_rate: main.success_rate,
                avg_processing_time: main.avg_processing_time,
                cost_savings: main.cost_savings,
            },
            roi: RoiSummary::from_window(&main),
            trends: main.trends.clone(),
            alerts: AlertSummary::from_events(events),
            recommendations,
            windows,
        })
    }
}

fn critical_issues(systems: &[SystemStatus]) -> Vec<String> {
    systems
        .iter()
        .filter(|s| matches!(s.status, HealthStatus::Down | HealthStatus::Unreachable))
        .map(|s| match &s.error {
            Some(error) => format!("{} is {}: {error}", s.system_name, s.status),
            None => format!("{} is {}", s.system_name, s.status),
        })
        .collect()
}

/// How close to a threshold counts as "near" it, in the metric's unit
fn proximity_margin(threshold: &AlertThreshold) -> f64 {
    if threshold.metric.is_percentage() {
        5.0
    } else {
        threshold.value.abs() * 0.1
    }
}

/// Whether the trend moves the value toward the threshold
fn trending_toward(threshold: &AlertThreshold, trends: &Trends) -> bool {
    match (threshold.comparison, trends.for_metric(threshold.metric)) {
        (Comparison::LessThan, Some(delta)) => delta < 0.0,
        (Comparison::GreaterThan, Some(delta)) => delta > 0.0,
        _ => false,
    }
}

fn recommendations(
    window: &AggregateWindow,
    thresholds: &[Arc<AlertThreshold>],
    epsilon: f64,
) -> Vec<String> {
    let mut out = Vec::new();

    for threshold in thresholds {
        let metric = threshold.metric;
        let Some(observed) = window.value(metric) else {
            continue;
        };
        let label = metric_label(metric);

        if violates(threshold, Some(observed), epsilon) {
            out.push(format!(
                "{label} is {}, violating threshold #{} ({} {})",
                format_value(metric, observed),
                threshold.id,
                threshold.comparison.as_str(),
                format_value(metric, threshold.value)
            ));
            continue;
        }

        let Some(room) = headroom(threshold, observed) else {
            continue;
        };
        if room > proximity_margin(threshold) {
            continue;
        }

        let trend = if trending_toward(threshold, &window.trends) {
            " and trending toward it"
        } else {
            ""
        };
        out.push(format!(
            "{label} is {}, within {} of threshold #{}{trend}",
            format_value(metric, observed),
            format_value(metric, room),
            threshold.id
        ));
    }

    if window.metrics_samples > 0 && window.total_automations == 0 {
        out.push("No automations detected - verify system connectivity".to_string());
    }
    if let Some(avg) = window.avg_processing_time.filter(|avg| *avg > SLOW_PROCESSING_SECS) {
        out.push(format!(
            "Average processing time is {avg:.1}s - consider optimization"
        ));
    }
    match window.status {
        AggregateStatus::Down => out.push("Urgent: every system of this client is failing".to_string()),
        AggregateStatus::Degraded => {
            out.push("Review the systems listed under critical issues".to_string())
        }
        _ => {}
    }

    out
}
