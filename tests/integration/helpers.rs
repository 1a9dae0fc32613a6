//! Helper functions for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use client_monitoring::{
    model::{Client, ClientSystem, HealthSample, HealthStatus, MetricsSample, MetricsWindow, Sample},
    notify::{Notifier, NotifyError, RenderedMessage},
    registry::{Registry, ThresholdSpec},
};
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()
}

pub fn create_test_client(id: &str) -> Client {
    Client {
        client_id: id.to_string(),
        name: format!("Client {id}"),
        industry: Some("logistics".to_string()),
        contact_email: None,
        active: true,
    }
}

pub fn create_test_system(client_id: &str, name: &str, endpoint: &str) -> ClientSystem {
    ClientSystem {
        client_id: client_id.to_string(),
        system_name: name.to_string(),
        endpoint: endpoint.to_string(),
        interval: Duration::from_secs(3600),
        timeout: Duration::from_millis(300),
        retries: 0,
    }
}

pub async fn create_test_registry(clients: &[&str]) -> Arc<Registry> {
    let registry = Arc::new(Registry::new(Duration::from_secs(30 * 60)));
    for id in clients {
        registry.register_client(create_test_client(id)).await.unwrap();
    }
    registry
}

pub fn threshold_spec(client: &str, metric: &str, comparison: &str, value: f64) -> ThresholdSpec {
    ThresholdSpec {
        client: client.to_string(),
        metric: metric.to_string(),
        comparison: comparison.to_string(),
        value,
        channel: "chat".to_string(),
        suppression_minutes: None,
    }
}

/// `healthy` healthy samples followed by `down` down samples, 30s apart, before `end`
pub fn uptime_samples(client: &str, healthy: usize, down: usize, end: DateTime<Utc>) -> Vec<Sample> {
    (0..healthy + down)
        .map(|i| {
            Sample::Health(HealthSample {
                client_id: client.to_string(),
                system_name: "crm".to_string(),
                timestamp: end - chrono::Duration::seconds(30 * (i as i64 + 1)),
                status: if i < healthy {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Down
                },
                latency_ms: 40.0,
                error: None,
            })
        })
        .collect()
}

pub fn metrics_sample(client: &str, window: MetricsWindow, total: u64, successful: u64) -> Sample {
    Sample::Metrics(MetricsSample {
        client_id: client.to_string(),
        system_name: "crm".to_string(),
        window,
        total_automations: total,
        successful_automations: successful,
        failed_automations: total - successful,
        processing_time_sum: total as f64 * 12.0,
        cost_savings: 0.0,
    })
}

/// Mount `/health` and `/metrics` answering like a healthy client system
pub async fn mount_healthy_endpoint(server: &MockServer, total: u64, successful: u64) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339()
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_automations": total,
            "successful_automations": successful,
            "failed_automations": total - successful,
            "total_processing_time": 30.0,
            "cost_savings": 12.5
        })))
        .mount(server)
        .await;
}

/// Notifier keeping every message it was asked to deliver
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<RenderedMessage>>,
}

impl RecordingNotifier {
    pub async fn count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &RenderedMessage) -> Result<(), NotifyError> {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}
