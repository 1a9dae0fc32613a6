//! Email through an HTTP mail relay

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument};

use super::{NotifyError, Notifier, RenderedMessage, post_json};
use crate::config::EmailConfig;

/// Body accepted by the relay
#[derive(Debug, Clone, Serialize)]
pub struct RelayMessage<'a> {
    pub from: &'a str,
    pub to: &'a [String],
    pub subject: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct EmailNotifier {
    client: reqwest::Client,
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(client: reqwest::Client, config: EmailConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    #[instrument(skip_all, fields(client = %message.event.client_id))]
    async fn send(&self, message: &RenderedMessage) -> Result<(), NotifyError> {
        if self.config.to.is_empty() {
            return Err(NotifyError::Transport("no email recipients configured".to_string()));
        }

        let payload = RelayMessage {
            from: &self.config.from,
            to: &self.config.to,
            subject: format!("[monitoring] {}", message.title),
            text: format!(
                "{}\n\nObserved at {}",
                message.body.replace("**", "").replace('`', ""),
                message.event.timestamp.to_rfc3339()
            ),
        };

        post_json(&self.client, &self.config.relay_url, &payload).await?;
        info!("sent email notification to {} recipients", self.config.to.len());
        Ok(())
    }
}
