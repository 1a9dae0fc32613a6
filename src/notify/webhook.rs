use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument};

use super::{NotifyError, Notifier, RenderedMessage, post_json};
use crate::config::WebhookConfig;

/// Posts a generic JSON payload describing the alert
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, config: WebhookConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip_all, fields(client = %message.event.client_id))]
    async fn send(&self, message: &RenderedMessage) -> Result<(), NotifyError> {
        let event = &message.event;
        let payload = json!({
            "message": message.body,
            "title": message.title,
            "client": event.client_id,
            "metric": event.threshold.metric,
            "observed": event.observed,
            "threshold": {
                "id": event.threshold.id,
                "comparison": event.threshold.comparison,
                "value": event.threshold.value,
            },
            "timestamp": event.timestamp.to_rfc3339()
        });

        post_json(&self.client, &self.config.url, &payload).await?;
        info!("sent webhook notification");
        Ok(())
    }
}
