//! Discord/Slack compatible chat messages

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument};

use super::{NotifyError, Notifier, RenderedMessage, format_value, post_json};
use crate::config::ChatConfig;
use crate::model::MetricName;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;

/// Posts alert embeds to a chat incoming webhook
#[derive(Debug, Clone)]
pub struct ChatNotifier {
    client: reqwest::Client,
    config: ChatConfig,
}

impl ChatNotifier {
    pub fn new(client: reqwest::Client, config: ChatConfig) -> Self {
        Self { client, config }
    }

    pub fn build_message(&self, message: &RenderedMessage) -> Message {
        let event = &message.event;
        let metric = event.threshold.metric;

        // availability problems are red, everything else orange
        let color = match metric {
            MetricName::Uptime | MetricName::UnreachableRate => RED,
            _ => ORANGE,
        };

        let embed = Embed {
            title: Some(format!("⚠️ {}", message.title)),
            description: Some(message.body.clone()),
            color: Some(color),
            fields: vec![
                EmbedField {
                    name: "Observed".to_string(),
                    value: format_value(metric, event.observed),
                    inline: true,
                },
                EmbedField {
                    name: "Threshold".to_string(),
                    value: format!(
                        "{} {}",
                        event.threshold.comparison.as_str(),
                        format_value(metric, event.threshold.value)
                    ),
                    inline: true,
                },
            ],
            footer: Some(EmbedFooter {
                text: format!("Client: {} | Threshold #{}", event.client_id, event.threshold.id),
            }),
            timestamp: Some(event.timestamp.to_rfc3339()),
        };

        let mut builder = MessageBuilder::new().add_embed(embed);
        if let Some(user_id) = &self.config.mention {
            builder = builder.content(format!("({} ~ {}) <@{user_id}>", event.client_id, metric));
        }
        builder.build()
    }
}

#[async_trait]
impl Notifier for ChatNotifier {
    #[instrument(skip_all, fields(client = %message.event.client_id))]
    async fn send(&self, message: &RenderedMessage) -> Result<(), NotifyError> {
        post_json(&self.client, &self.config.url, &self.build_message(message)).await?;
        info!("sent chat notification");
        Ok(())
    }
}
