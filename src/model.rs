//! Core data model shared by every component of the engine
//!
//! Raw inputs are [`HealthSample`] and [`MetricsSample`]. Everything else
//! (aggregate windows, alert events) is derived from them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::ConfigurationError;

/// Identifier of a monitored client
pub type ClientId = String;

/// Identifier of an alert threshold (assigned by the registry)
pub type ThresholdId = u64;

/// Identifies one monitored endpoint of a client
///
/// Immutable once registered. Reconfiguration replaces the whole value; pollers
/// pick up the replacement on their next cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSystem {
    pub client_id: ClientId,
    pub system_name: String,

    /// Base URL of the client endpoint (`/health` and `/metrics` are appended)
    pub endpoint: String,

    #[serde(with = "duration_secs")]
    pub interval: Duration,

    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Number of retries after the first attempt
    pub retries: u32,
}

impl ClientSystem {
    pub fn key(&self) -> SystemKey {
        SystemKey {
            client_id: self.client_id.clone(),
            system_name: self.system_name.clone(),
        }
    }
}

/// `(client, system)` pair used to address pollers and histories
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SystemKey {
    pub client_id: ClientId,
    pub system_name: String,
}

impl fmt::Display for SystemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client_id, self.system_name)
    }
}

/// A registered client and its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub client_id: ClientId,
    pub name: String,
    pub industry: Option<String>,
    pub contact_email: Option<String>,
    pub active: bool,
}

/// Outcome classification of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    /// The endpoint answered and declared itself down
    Down,
    /// The endpoint did not answer within the retry budget
    Unreachable,
}

impl HealthStatus {
    pub fn is_healthy(self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
            HealthStatus::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(HealthStatus::Healthy),
            "degraded" => Ok(HealthStatus::Degraded),
            "down" => Ok(HealthStatus::Down),
            "unreachable" => Ok(HealthStatus::Unreachable),
            other => Err(format!("unknown health status: {other}")),
        }
    }
}

/// Result of one probe against a client system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub client_id: ClientId,
    pub system_name: String,
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub latency_ms: f64,
    pub error: Option<String>,
}

/// Counters pulled from a client metrics endpoint for `[start, end)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub client_id: ClientId,
    pub system_name: String,
    pub window: MetricsWindow,
    pub total_automations: u64,
    pub successful_automations: u64,
    pub failed_automations: u64,
    /// Sum of processing time over all automations (seconds)
    pub processing_time_sum: f64,
    pub cost_savings: f64,
}

impl MetricsSample {
    /// Sample standing for a window in which the endpoint reported nothing
    pub fn zero_activity(system: &ClientSystem, window: MetricsWindow) -> Self {
        Self {
            client_id: system.client_id.clone(),
            system_name: system.system_name.clone(),
            window,
            total_automations: 0,
            successful_automations: 0,
            failed_automations: 0,
            processing_time_sum: 0.0,
            cost_savings: 0.0,
        }
    }
}

/// A raw sample produced by a poller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sample {
    Health(HealthSample),
    Metrics(MetricsSample),
}

impl Sample {
    pub fn system_key(&self) -> SystemKey {
        let (client_id, system_name) = match self {
            Sample::Health(s) => (&s.client_id, &s.system_name),
            Sample::Metrics(s) => (&s.client_id, &s.system_name),
        };
        SystemKey {
            client_id: client_id.clone(),
            system_name: system_name.clone(),
        }
    }
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MetricsWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Lengths of the aggregate windows the engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
}

impl Timeframe {
    pub fn duration(self) -> chrono::Duration {
        match self {
            Timeframe::Day => chrono::Duration::hours(24),
            Timeframe::Week => chrono::Duration::days(7),
            Timeframe::Month => chrono::Duration::days(30),
            Timeframe::Quarter => chrono::Duration::days(90),
        }
    }

    /// Window ending at `now`
    pub fn window_ending(self, now: DateTime<Utc>) -> MetricsWindow {
        MetricsWindow::new(now - self.duration(), now)
    }

    /// Window of equal length immediately before [`Timeframe::window_ending`]
    pub fn prior_window(self, now: DateTime<Utc>) -> MetricsWindow {
        let len = self.duration();
        MetricsWindow::new(now - len - len, now - len)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Day => "24h",
            Timeframe::Week => "7d",
            Timeframe::Month => "30d",
            Timeframe::Quarter => "90d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(Timeframe::Day),
            "7d" => Ok(Timeframe::Week),
            "30d" => Ok(Timeframe::Month),
            "90d" => Ok(Timeframe::Quarter),
            other => Err(ConfigurationError::InvalidValue(format!(
                "unknown timeframe '{other}' (expected 24h, 7d, 30d or 90d)"
            ))),
        }
    }
}

/// Metrics a threshold may target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    /// Percentage of healthy health samples
    Uptime,
    /// successful / total automations, in percent
    SuccessRate,
    /// Average probe latency in milliseconds
    ResponseTime,
    /// Percentage of health samples that were unreachable
    UnreachableRate,
    TotalAutomations,
    FailedAutomations,
    /// Average processing time per automation in seconds
    AvgProcessingTime,
    CostSavings,
}

impl MetricName {
    pub const ALL: [MetricName; 8] = [
        MetricName::Uptime,
        MetricName::SuccessRate,
        MetricName::ResponseTime,
        MetricName::UnreachableRate,
        MetricName::TotalAutomations,
        MetricName::FailedAutomations,
        MetricName::AvgProcessingTime,
        MetricName::CostSavings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricName::Uptime => "uptime",
            MetricName::SuccessRate => "success_rate",
            MetricName::ResponseTime => "response_time",
            MetricName::UnreachableRate => "unreachable_rate",
            MetricName::TotalAutomations => "total_automations",
            MetricName::FailedAutomations => "failed_automations",
            MetricName::AvgProcessingTime => "avg_processing_time",
            MetricName::CostSavings => "cost_savings",
        }
    }

    /// Whether the metric is expressed in percent (0-100)
    pub fn is_percentage(self) -> bool {
        matches!(
            self,
            MetricName::Uptime | MetricName::SuccessRate | MetricName::UnreachableRate
        )
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricName::ALL
            .into_iter()
            .find(|metric| metric.as_str() == s)
            .ok_or_else(|| ConfigurationError::UnknownMetric(s.to_string()))
    }
}

/// Comparison operator of a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    GreaterThan,
    LessThan,
    Equals,
}

impl Comparison {
    pub fn as_str(self) -> &'static str {
        match self {
            Comparison::GreaterThan => "greater_than",
            Comparison::LessThan => "less_than",
            Comparison::Equals => "equals",
        }
    }
}

impl FromStr for Comparison {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greater_than" => Ok(Comparison::GreaterThan),
            "less_than" => Ok(Comparison::LessThan),
            "equals" => Ok(Comparison::Equals),
            other => Err(ConfigurationError::InvalidValue(format!(
                "unknown comparison '{other}'"
            ))),
        }
    }
}

/// Delivery channel of a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    /// Discord/Slack style incoming webhook
    Chat,
    Webhook,
}

impl NotificationChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Chat => "chat",
            NotificationChannel::Webhook => "webhook",
        }
    }
}

impl FromStr for NotificationChannel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(NotificationChannel::Email),
            "chat" | "slack" | "discord" => Ok(NotificationChannel::Chat),
            "webhook" => Ok(NotificationChannel::Webhook),
            other => Err(ConfigurationError::InvalidValue(format!(
                "unknown notification channel '{other}'"
            ))),
        }
    }
}

/// Which clients a threshold applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "client_id", rename_all = "snake_case")]
pub enum ThresholdScope {
    Specific(ClientId),
    /// Every client that is active at evaluation time
    AllActive,
}

impl ThresholdScope {
    /// Parse the operator notation where `*` stands for all active clients
    pub fn parse(client: &str) -> Result<Self, ConfigurationError> {
        match client.trim() {
            "" => Err(ConfigurationError::InvalidScope(
                "client id must not be empty".to_string(),
            )),
            "*" => Ok(ThresholdScope::AllActive),
            id => Ok(ThresholdScope::Specific(id.to_string())),
        }
    }

    pub fn applies_to(&self, client_id: &str) -> bool {
        match self {
            ThresholdScope::Specific(id) => id == client_id,
            ThresholdScope::AllActive => true,
        }
    }
}

impl fmt::Display for ThresholdScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdScope::Specific(id) => f.write_str(id),
            ThresholdScope::AllActive => f.write_str("*"),
        }
    }
}

/// A configured alert threshold
///
/// Read-only to the evaluator; edits replace the whole value in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub id: ThresholdId,
    pub scope: ThresholdScope,
    pub metric: MetricName,
    pub comparison: Comparison,
    pub value: f64,
    pub channel: NotificationChannel,
    /// Minimum interval between two notifications of the same dedup key
    #[serde(with = "duration_secs")]
    pub suppression_window: Duration,
    pub active: bool,
}

/// `(client, metric, threshold)` identifying one alert condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub client_id: ClientId,
    pub metric: MetricName,
    pub threshold_id: ThresholdId,
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.client_id, self.metric, self.threshold_id)
    }
}

/// A detected threshold violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub threshold: AlertThreshold,
    pub client_id: ClientId,
    pub observed: f64,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            client_id: self.client_id.clone(),
            metric: self.threshold.metric,
            threshold_id: self.threshold.id,
        }
    }
}

/// Serde helper storing [`Duration`] as whole seconds
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
