//! Integration tests for the control surface on a running hub
//!
//! These tests verify that:
//! - Registered systems are polled and show up in snapshots, reports and the overview
//! - Invalid definitions are rejected without side effects

use assert_matches::assert_matches;
use client_monitoring::{
    aggregator::AggregateStatus,
    config::parse_config,
    control::ControlError,
    hub::MonitoringHub,
    model::{SystemKey, Timeframe},
    notify::Notifiers,
    registry::{ConfigurationError, SystemSpec},
    reports::ReportType,
    storage::MemoryStore,
};
use std::sync::Arc;
use wiremock::MockServer;

use crate::helpers::{mount_healthy_endpoint, threshold_spec};

fn config_for(endpoint: &str) -> String {
    serde_json::json!({
        "clients": [{
            "client_id": "acme",
            "name": "Acme Corp",
            "industry": "logistics",
            "systems": [
                { "name": "crm", "endpoint": endpoint, "interval": 3600, "timeout": 2, "retries": 0 }
            ]
        }],
        "storage": { "backend": "none" }
    })
    .to_string()
}

async fn start_hub(endpoint: &str) -> MonitoringHub {
    let config = parse_config(&config_for(endpoint)).unwrap();
    MonitoringHub::start(&config, Arc::new(MemoryStore::new()), Notifiers::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_polled_client_appears_in_every_view() {
    let mock_server = MockServer::start().await;
    mount_healthy_endpoint(&mock_server, 40, 38).await;
    let hub = start_hub(&mock_server.uri()).await;

    let key = SystemKey {
        client_id: "acme".to_string(),
        system_name: "crm".to_string(),
    };
    hub.scheduler().poll_now(&key).await.unwrap().unwrap();
    hub.recorder().drain().await.unwrap();

    let control = hub.control();
    let snapshot = control.snapshot("acme", Timeframe::Day).await.unwrap();
    assert_eq!(snapshot.status, AggregateStatus::Healthy);
    assert_eq!(snapshot.total_automations, 40);

    let report = control.report("acme", ReportType::Weekly).await.unwrap();
    assert_eq!(report.client.name, "Acme Corp");
    assert_eq!(report.performance.total_automations, 40);
    assert!((report.performance.success_rate.unwrap() - 95.0).abs() < 1e-9);
    assert!(report.roi.time_saved_hours > 0.0);

    let overview = control.fleet_overview().await;
    assert_eq!(overview.summary.total_clients, 1);
    assert_eq!(overview.summary.healthy, 1);
    assert!(overview.quick_actions.is_empty());

    // the dry run reflects the polled data
    let check = control
        .create_threshold(&threshold_spec("acme", "success_rate", "less_than", 99.0))
        .await
        .unwrap();
    assert_eq!(check.evaluations.len(), 1);
    assert!(check.evaluations[0].would_fire);

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_definitions_are_rejected() {
    let hub = start_hub("http://127.0.0.1:9").await;
    let control = hub.control();

    let result = control
        .create_threshold(&threshold_spec("acme", "cpu_temperature", "greater_than", 80.0))
        .await;
    assert_matches!(
        result,
        Err(ControlError::Configuration(ConfigurationError::UnknownMetric(_)))
    );
    assert!(control.thresholds().await.is_empty());

    let result = control
        .add_system(
            "acme",
            SystemSpec {
                name: "erp".to_string(),
                endpoint: "ftp://erp.local".to_string(),
                interval: 60,
                timeout: 5,
                retries: 1,
            },
        )
        .await;
    assert_matches!(
        result,
        Err(ControlError::Configuration(ConfigurationError::InvalidValue(_)))
    );
    assert_eq!(hub.scheduler().pollers().await.unwrap().len(), 1);

    let result = control.snapshot("globex", Timeframe::Day).await;
    assert_matches!(
        result,
        Err(ControlError::Configuration(ConfigurationError::UnknownClient(_)))
    );

    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_system_changes_reconcile_pollers() {
    let hub = start_hub("http://127.0.0.1:9").await;
    let control = hub.control();

    control
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
    assert_eq!(hub.scheduler().pollers().await.unwrap().len(), 2);

    control.remove_system("acme", "crm").await.unwrap();
    let pollers = hub.scheduler().pollers().await.unwrap();
    assert_eq!(pollers.len(), 1);
    assert_eq!(pollers[0].system_name, "erp");

    control.deregister_client("acme").await.unwrap();
    assert!(hub.scheduler().pollers().await.unwrap().is_empty());

    hub.shutdown().await.unwrap();
}
