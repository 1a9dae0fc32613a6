//! Integration tests for persistence across hub restarts
//!
//! These tests verify that:
//! - Clients, systems and thresholds survive a restart
//! - Recorded samples warm the aggregator on startup
//! - Deregistered clients stay gone
//! - Deactivated clients stay inactive and removed systems stay out of the status

use std::sync::Arc;

use chrono::{Duration, Utc};
use client_monitoring::{
    aggregator::AggregateStatus,
    config::parse_config,
    hub::MonitoringHub,
    model::{HealthSample, HealthStatus, SystemKey, ThresholdScope, Timeframe},
    notify::Notifiers,
    registry::SystemSpec,
    storage::{MonitoringStore, SqliteStore},
};
use tempfile::tempdir;
use wiremock::MockServer;

use crate::helpers::{mount_healthy_endpoint, threshold_spec};

fn config_for(endpoint: &str) -> String {
    serde_json::json!({
        "clients": [{
            "client_id": "acme",
            "name": "Acme Corp",
            "systems": [{ "name": "crm", "endpoint": endpoint, "interval": 3600, "retries": 0 }]
        }],
        "thresholds": [
            { "client": "*", "metric": "uptime", "comparison": "less_than", "value": 95.0, "channel": "email" }
        ]
    })
    .to_string()
}

async fn open(path: &std::path::Path) -> Arc<dyn MonitoringStore> {
    Arc::new(SqliteStore::new(path).await.unwrap())
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitoring.db");

    let mock_server = MockServer::start().await;
    mount_healthy_endpoint(&mock_server, 12, 12).await;
    let config = parse_config(&config_for(&mock_server.uri())).unwrap();

    // first run: poll once and add a threshold at runtime
    let hub = MonitoringHub::start(&config, open(&db_path).await, Notifiers::new())
        .await
        .unwrap();
    hub.scheduler()
        .poll_now(&SystemKey {
            client_id: "acme".to_string(),
            system_name: "crm".to_string(),
        })
        .await
        .unwrap()
        .unwrap();
    hub.control()
        .create_threshold(&threshold_spec("acme", "response_time", "greater_than", 2000.0))
        .await
        .unwrap();
    hub.shutdown().await.unwrap();

    // second run: no clients in the file, everything comes from the database
    let empty = parse_config(r#"{ "clients": [] }"#).unwrap();
    let hub = MonitoringHub::start(&empty, open(&db_path).await, Notifiers::new())
        .await
        .unwrap();

    let clients = hub.control().registry().clients().await;
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].name, "Acme Corp");
    assert_eq!(hub.scheduler().pollers().await.unwrap().len(), 1);

    let thresholds = hub.control().thresholds().await;
    assert_eq!(thresholds.len(), 2);
    assert!(thresholds.iter().any(|t| t.scope == ThresholdScope::AllActive));

    let snapshot = hub.control().snapshot("acme", Timeframe::Day).await.unwrap();
    assert_eq!(snapshot.health_samples, 1);
    assert_eq!(snapshot.total_automations, 12);

    hub.shutdown().await.unwrap();

    // third run with the original file does not duplicate the configured threshold
    let hub = MonitoringHub::start(&config, open(&db_path).await, Notifiers::new())
        .await
        .unwrap();
    assert_eq!(hub.control().thresholds().await.len(), 2);
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deregistered_client_is_not_restored() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitoring.db");
    let config = parse_config(&config_for("http://127.0.0.1:9")).unwrap();

    let hub = MonitoringHub::start(&config, open(&db_path).await, Notifiers::new())
        .await
        .unwrap();
    hub.control().deregister_client("acme").await.unwrap();
    hub.shutdown().await.unwrap();

    let empty = parse_config(r#"{ "clients": [] }"#).unwrap();
    let hub = MonitoringHub::start(&empty, open(&db_path).await, Notifiers::new())
        .await
        .unwrap();
    assert!(hub.control().registry().clients().await.is_empty());
    assert!(hub.scheduler().pollers().await.unwrap().is_empty());
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deactivated_client_is_not_reactivated_by_config() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitoring.db");
    let config = parse_config(&config_for("http://127.0.0.1:9")).unwrap();

    let hub = MonitoringHub::start(&config, open(&db_path).await, Notifiers::new())
        .await
        .unwrap();
    hub.control().deactivate_client("acme").await.unwrap();
    hub.shutdown().await.unwrap();

    let hub = MonitoringHub::start(&config, open(&db_path).await, Notifiers::new())
        .await
        .unwrap();
    let acme = hub.control().registry().client("acme").await.unwrap();
    assert!(!acme.active);
    assert!(hub.scheduler().pollers().await.unwrap().is_empty());
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_removed_system_history_is_not_warmed() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitoring.db");

    let mock_server = MockServer::start().await;
    mount_healthy_endpoint(&mock_server, 10, 10).await;
    let config = parse_config(&config_for(&mock_server.uri())).unwrap();

    let store = open(&db_path).await;
    let hub = MonitoringHub::start(&config, store.clone(), Notifiers::new())
        .await
        .unwrap();
    hub.control()
        .add_system(
            "acme",
            SystemSpec {
                name: "erp".to_string(),
                endpoint: "http://127.0.0.1:9".to_string(),
                interval: 3600,
                timeout: 1,
                retries: 0,
            },
        )
        .await
        .unwrap();
    hub.scheduler()
        .poll_now(&SystemKey {
            client_id: "acme".to_string(),
            system_name: "crm".to_string(),
        })
        .await
        .unwrap()
        .unwrap();
    store
        .append_health_sample(&HealthSample {
            client_id: "acme".to_string(),
            system_name: "erp".to_string(),
            timestamp: Utc::now() - Duration::minutes(1),
            status: HealthStatus::Unreachable,
            latency_ms: 0.0,
            error: Some("connection refused".to_string()),
        })
        .await
        .unwrap();
    hub.control().remove_system("acme", "erp").await.unwrap();
    hub.shutdown().await.unwrap();

    let empty = parse_config(r#"{ "clients": [] }"#).unwrap();
    let hub = MonitoringHub::start(&empty, open(&db_path).await, Notifiers::new())
        .await
        .unwrap();
    let snapshot = hub.control().snapshot("acme", Timeframe::Day).await.unwrap();
    assert_eq!(snapshot.status, AggregateStatus::Healthy);
    assert_eq!(snapshot.unreachable_samples, 0);
    hub.shutdown().await.unwrap();
}
