//! Notification channels
//!
//! The dispatcher only knows the [`Notifier`] capability. There is one
//! implementation per [`NotificationChannel`]:
//!
//! - [`email::EmailNotifier`]: JSON message to an HTTP mail relay
//! - [`chat::ChatNotifier`]: Discord/Slack style embed message
//! - [`webhook::WebhookNotifier`]: generic JSON payload

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};

use crate::config::NotificationsConfig;
use crate::model::{AlertEvent, Comparison, MetricName, NotificationChannel};

pub mod chat;
pub mod email;
pub mod webhook;

/// Delivery failure of a notification
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyError {
    /// The request could not be sent
    Transport(String),

    /// The receiver answered with a non-success status
    Status { status: u16, body: String },

    /// No notifier is configured for the channel
    MissingChannel(NotificationChannel),

    /// Delivery did not finish within the dispatch timeout
    TimedOut,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Transport(msg) => write!(f, "failed to send notification: {msg}"),
            NotifyError::Status { status, body } => {
                write!(f, "notification rejected with HTTP {status}: {body}")
            }
            NotifyError::MissingChannel(channel) => {
                write!(f, "no notifier configured for channel {}", channel.as_str())
            }
            NotifyError::TimedOut => write!(f, "notification delivery timed out"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// An alert event rendered for humans
#[derive(Debug, Clone, Serialize)]
pub struct RenderedMessage {
    pub title: String,
    pub body: String,
    pub event: AlertEvent,
}

impl RenderedMessage {
    pub fn render(event: &AlertEvent) -> Self {
        let threshold = &event.threshold;
        let metric = threshold.metric;
        let comparison = match threshold.comparison {
            Comparison::GreaterThan => "above",
            Comparison::LessThan => "below",
            Comparison::Equals => "at",
        };

        Self {
            title: format!("{} alert for {}", metric_label(metric), event.client_id),
            body: format!(
                "Client `{}`: {} is **{}**, {} the threshold of {} (threshold #{})",
                event.client_id,
                metric_label(metric).to_lowercase(),
                format_value(metric, event.observed),
                comparison,
                format_value(metric, threshold.value),
                threshold.id,
            ),
            event: event.clone(),
        }
    }
}

pub(crate) fn metric_label(metric: MetricName) -> &'static str {
    match metric {
        MetricName::Uptime => "Uptime",
        MetricName::SuccessRate => "Success rate",
        MetricName::ResponseTime => "Response time",
        MetricName::UnreachableRate => "Unreachable rate",
        MetricName::TotalAutomations => "Automation volume",
        MetricName::FailedAutomations => "Failed automations",
        MetricName::AvgProcessingTime => "Processing time",
        MetricName::CostSavings => "Cost savings",
    }
}

/// Format a metric value with its unit
pub fn format_value(metric: MetricName, value: f64) -> String {
    match metric {
        m if m.is_percentage() => format!("{value:.1}%"),
        MetricName::ResponseTime => format!("{value:.0}ms"),
        MetricName::AvgProcessingTime => format!("{value:.2}s"),
        MetricName::CostSavings => format!("${value:.2}"),
        _ => format!("{value:.0}"),
    }
}

/// Capability to deliver a rendered message over one channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &RenderedMessage) -> Result<(), NotifyError>;
}

/// Configured notifiers by channel
pub type Notifiers = HashMap<NotificationChannel, Arc<dyn Notifier>>;

/// Build one notifier per configured channel
pub fn from_config(config: &NotificationsConfig) -> Notifiers {
    let client = reqwest::Client::new();
    let mut notifiers: Notifiers = HashMap::new();

    if let Some(email) = &config.email {
        notifiers.insert(
            NotificationChannel::Email,
            Arc::new(email::EmailNotifier::new(client.clone(), email.clone())),
        );
    }
    if let Some(chat) = &config.chat {
        notifiers.insert(
            NotificationChannel::Chat,
            Arc::new(chat::ChatNotifier::new(client.clone(), chat.clone())),
        );
    }
    if let Some(webhook) = &config.webhook {
        notifiers.insert(
            NotificationChannel::Webhook,
            Arc::new(webhook::WebhookNotifier::new(client, webhook.clone())),
        );
    }

    debug!("configured {} notification channels", notifiers.len());
    notifiers
}

pub(crate) async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    payload: &T,
) -> Result<(), NotifyError> {
    let response = client
        .post(url)
        .json(payload)
        .send()
        .await
        .map_err(|e| NotifyError::Transport(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    error!("notification receiver answered with {status}: {body}");
    Err(NotifyError::Status {
        status: status.as_u16(),
        body,
    })
}
