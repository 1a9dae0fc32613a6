//! Integration tests for probing and the poll → record pipeline
//!
//! These tests verify that:
//! - Retries never multiply samples
//! - Polled samples reach the aggregator through the recorder
//! - Samples of systems removed mid-poll are discarded

use std::sync::Arc;
use std::time::Duration;

use client_monitoring::{
    actors::{
        recorder::RecorderHandle,
        scheduler::{SchedulerConfig, SchedulerHandle},
    },
    aggregator::MetricsAggregator,
    model::{HealthStatus, SystemKey, Timeframe},
    monitors::EndpointProber,
    storage::MemoryStore,
};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{create_test_registry, create_test_system, mount_healthy_endpoint};

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        reconcile_interval: Duration::from_secs(3600),
        jitter: false,
    }
}

fn crm_key() -> SystemKey {
    SystemKey {
        client_id: "acme".to_string(),
        system_name: "crm".to_string(),
    }
}

#[tokio::test]
async fn test_exhausted_retries_yield_one_unreachable_sample() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(400)))
        .mount(&mock_server)
        .await;

    let mut system = create_test_system("acme", "crm", &mock_server.uri());
    system.timeout = Duration::from_millis(50);
    system.retries = 3;

    let prober = EndpointProber::new(Duration::from_millis(10)).unwrap();
    let sample = prober.probe(&system).await;

    assert_eq!(sample.status, HealthStatus::Unreachable);
    assert!(sample.error.is_some());

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4, "first attempt plus three retries");
}

#[tokio::test]
async fn test_retry_recovers_within_budget() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(400)))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "healthy" })),
        )
        .mount(&mock_server)
        .await;

    let mut system = create_test_system("acme", "crm", &mock_server.uri());
    system.timeout = Duration::from_millis(50);
    system.retries = 3;

    let prober = EndpointProber::new(Duration::from_millis(10)).unwrap();
    let sample = prober.probe(&system).await;

    assert_eq!(sample.status, HealthStatus::Healthy);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_polled_samples_reach_the_aggregator() {
    let mock_server = MockServer::start().await;
    mount_healthy_endpoint(&mock_server, 20, 19).await;

    let registry = create_test_registry(&["acme"]).await;
    registry
        .register_system(create_test_system("acme", "crm", &mock_server.uri()))
        .await
        .unwrap();

    let aggregator = Arc::new(MetricsAggregator::new());
    let store = Arc::new(MemoryStore::new());
    let (sample_tx, sample_rx) = mpsc::channel(64);
    let recorder = RecorderHandle::spawn(
        registry.clone(),
        aggregator.clone(),
        store.clone(),
        sample_rx,
        None,
    );
    let scheduler = SchedulerHandle::start(
        registry,
        EndpointProber::new(Duration::from_millis(10)).unwrap(),
        sample_tx,
        scheduler_config(),
    );
    scheduler.reconcile().await.unwrap();

    let outcome = scheduler.poll_now(&crm_key()).await.unwrap().unwrap();
    assert_eq!(outcome.status, HealthStatus::Healthy);
    assert!(outcome.metrics_recorded);

    recorder.drain().await.unwrap();

    // without jitter the poller also polls once on spawn
    let snapshot = aggregator.snapshot("acme", Timeframe::Day).await;
    assert!(snapshot.healthy_samples >= 1);
    assert_eq!(snapshot.uptime_percentage, Some(100.0));
    assert_eq!(snapshot.total_automations, 20 * snapshot.metrics_samples as u64);
    assert!((snapshot.success_rate.unwrap() - 95.0).abs() < 1e-9);

    let stats = recorder.stats().await.unwrap();
    assert_eq!(stats.recorded as usize, snapshot.health_samples + snapshot.metrics_samples);
    assert_eq!(stats.discarded, 0);

    scheduler.stop().await.unwrap();
    recorder.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sample_of_removed_system_is_discarded() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(200))
                .set_body_json(serde_json::json!({ "status": "healthy" })),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let registry = create_test_registry(&["acme"]).await;
    registry
        .register_system(create_test_system("acme", "crm", &mock_server.uri()))
        .await
        .unwrap();

    let aggregator = Arc::new(MetricsAggregator::new());
    let (sample_tx, sample_rx) = mpsc::channel(64);
    let recorder = RecorderHandle::spawn(
        registry.clone(),
        aggregator.clone(),
        Arc::new(MemoryStore::new()),
        sample_rx,
        None,
    );
    let scheduler = SchedulerHandle::start(
        registry.clone(),
        EndpointProber::new(Duration::from_millis(10)).unwrap(),
        sample_tx,
        scheduler_config(),
    );
    scheduler.reconcile().await.unwrap();

    let poll = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.poll_now(&crm_key()).await })
    };

    // remove the system while its probe is in flight
    tokio::time::sleep(Duration::from_millis(50)).await;
    registry.deregister_system(&crm_key()).await.unwrap();

    poll.await.unwrap().unwrap();
    recorder.drain().await.unwrap();

    let stats = recorder.stats().await.unwrap();
    assert_eq!(stats.recorded, 0);
    assert!(stats.discarded >= 1);
    assert_eq!(aggregator.sample_count("acme").await, 0);

    scheduler.stop().await.unwrap();
    recorder.shutdown().await.unwrap();
}
