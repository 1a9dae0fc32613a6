use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::model::Timeframe;
use crate::registry::{SystemSpec, ThresholdSpec};

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Samples and alert events older than this are deleted
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

impl StorageConfig {
    pub fn retention(&self) -> Option<chrono::Duration> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite { retention_days, .. } => {
                Some(chrono::Duration::days(i64::from(*retention_days)))
            }
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./monitoring.db")
}

fn default_retention_days() -> u32 {
    90
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub clients: Vec<ClientConfig>,

    #[serde(default)]
    pub thresholds: Vec<ThresholdSpec>,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Storage configuration (defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub name: String,
    pub industry: Option<String>,
    pub contact_email: Option<String>,
    #[serde(default)]
    pub systems: Vec<SystemSpec>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NotificationsConfig {
    pub email: Option<EmailConfig>,
    pub chat: Option<ChatConfig>,
    pub webhook: Option<WebhookConfig>,

    /// Per-delivery timeout in seconds
    #[serde(default = "default_notify_timeout")]
    pub timeout: u64,
}

/// Mail relay accepting JSON messages over HTTP
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EmailConfig {
    pub relay_url: String,
    pub from: String,
    pub to: Vec<String>,
}

/// Discord/Slack compatible incoming webhook
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChatConfig {
    pub url: String,
    /// User id mentioned in the message content
    pub mention: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookConfig {
    pub url: String,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            email: None,
            chat: None,
            webhook: None,
            timeout: default_notify_timeout(),
        }
    }
}

impl NotificationsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn default_notify_timeout() -> u64 {
    10
}

/// Cadences and tunables of the engine
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval: u64,

    #[serde(default = "default_report_interval")]
    pub report_interval: u64,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval: u64,

    #[serde(default = "default_suppression_minutes")]
    pub default_suppression_minutes: u64,

    /// Window thresholds are evaluated over
    #[serde(default = "default_evaluation_window")]
    pub evaluation_window: Timeframe,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_equals_epsilon")]
    pub equals_epsilon: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: default_evaluation_interval(),
            report_interval: default_report_interval(),
            reconcile_interval: default_reconcile_interval(),
            default_suppression_minutes: default_suppression_minutes(),
            evaluation_window: default_evaluation_window(),
            retry_backoff_ms: default_retry_backoff_ms(),
            equals_epsilon: default_equals_epsilon(),
        }
    }
}

impl EngineConfig {
    pub fn default_suppression(&self) -> Duration {
        Duration::from_secs(self.default_suppression_minutes * 60)
    }
}

fn default_evaluation_interval() -> u64 {
    120
}

fn default_report_interval() -> u64 {
    86_400
}

fn default_reconcile_interval() -> u64 {
    30
}

fn default_suppression_minutes() -> u64 {
    30
}

fn default_evaluation_window() -> Timeframe {
    Timeframe::Day
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_equals_epsilon() -> f64 {
    crate::monitors::DEFAULT_EQUALS_EPSILON
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiConfig {
    #[serde(default = "crate::util::get_default_bind")]
    pub bind: String,

    /// Bearer token required on every request when set
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: crate::util::get_default_bind(),
            token: None,
        }
    }
}

impl ApiConfig {
    /// Apply `MONITORING_API_BIND` / `MONITORING_API_TOKEN` overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(bind) = crate::util::get_api_bind() {
            self.bind = bind;
        }
        if let Some(token) = crate::util::get_api_token() {
            self.token = Some(token);
        }
        self
    }
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .context("invalid configuration file provided")
        .inspect(|config: &Config| trace!("loaded config: {config:?}"))
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    parse_config(&file_content)
}
