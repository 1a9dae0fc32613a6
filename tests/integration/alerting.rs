//! Integration tests for threshold evaluation and alert dispatch
//!
//! These tests verify that:
//! - A violation produces exactly one notification per suppression window
//! - Recovery resets suppression
//! - Undefined aggregates never fire

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use client_monitoring::{
    actors::{
        dispatcher::{AlertDispatcher, DispatchOutcome},
        evaluator::ThresholdEvaluator,
    },
    aggregator::MetricsAggregator,
    model::{AlertEvent, MetricsWindow, NotificationChannel, Timeframe},
    notify::Notifier,
    storage::MemoryStore,
};
use pretty_assertions::assert_eq;

use crate::helpers::{
    RecordingNotifier, create_test_registry, fixed_now, metrics_sample, threshold_spec,
    uptime_samples,
};

fn dispatcher_with(notifier: Arc<RecordingNotifier>) -> Arc<AlertDispatcher> {
    let mut notifiers: HashMap<NotificationChannel, Arc<dyn Notifier>> = HashMap::new();
    notifiers.insert(NotificationChannel::Chat, notifier);
    Arc::new(AlertDispatcher::new(notifiers, Duration::from_secs(1)))
}

#[tokio::test]
async fn test_uptime_violation_notifies_once_until_recovery() {
    let registry = create_test_registry(&["acme"]).await;
    let aggregator = Arc::new(MetricsAggregator::new());
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = dispatcher_with(notifier.clone());

    registry
        .create_threshold(&threshold_spec("acme", "uptime", "less_than", 95.0))
        .await
        .unwrap();
    let evaluator = ThresholdEvaluator::new(
        registry.clone(),
        aggregator.clone(),
        store.clone(),
        dispatcher.clone(),
        Timeframe::Day,
        0.01,
    );

    // 94% uptime
    for sample in uptime_samples("acme", 94, 6, fixed_now()) {
        aggregator.record(sample).await;
    }

    let first = evaluator.evaluate_cycle(fixed_now()).await;
    let second = evaluator
        .evaluate_cycle(fixed_now() + ChronoDuration::minutes(1))
        .await;
    assert_eq!((first.fired, first.dispatched), (1, 1));
    assert_eq!((second.fired, second.suppressed), (1, 1));

    // recovery: enough healthy samples to lift uptime above 95%
    let recovered_at = fixed_now() + ChronoDuration::minutes(2);
    for sample in uptime_samples("acme", 200, 0, recovered_at) {
        aggregator.record(sample).await;
    }
    let recovered = evaluator.evaluate_cycle(recovered_at).await;
    assert_eq!(recovered.fired, 0);

    // a new violation right after recovery is not suppressed
    let relapsed_at = fixed_now() + ChronoDuration::minutes(3);
    for sample in uptime_samples("acme", 0, 100, relapsed_at) {
        aggregator.record(sample).await;
    }
    let relapsed = evaluator.evaluate_cycle(relapsed_at).await;
    assert_eq!(relapsed.dispatched, 1);

    dispatcher.wait_for_deliveries().await;
    assert_eq!(notifier.count().await, 2);
    assert_eq!(store.alert_events().await.len(), 3);
}

#[tokio::test]
async fn test_success_rate_without_automations_never_fires() {
    let registry = create_test_registry(&["acme"]).await;
    let aggregator = Arc::new(MetricsAggregator::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = dispatcher_with(notifier.clone());

    registry
        .create_threshold(&threshold_spec("*", "success_rate", "less_than", 90.0))
        .await
        .unwrap();

    // a window with zero automations leaves the success rate undefined
    let window = MetricsWindow::new(
        fixed_now() - ChronoDuration::hours(1),
        fixed_now() - ChronoDuration::minutes(1),
    );
    aggregator.record(metrics_sample("acme", window, 0, 0)).await;

    let evaluator = ThresholdEvaluator::new(
        registry,
        aggregator,
        Arc::new(MemoryStore::new()),
        dispatcher.clone(),
        Timeframe::Day,
        0.01,
    );
    let summary = evaluator.evaluate_cycle(fixed_now()).await;
    assert_eq!(summary.checks, 1);
    assert_eq!(summary.fired, 0);

    dispatcher.wait_for_deliveries().await;
    assert_eq!(notifier.count().await, 0);
}

#[tokio::test]
async fn test_dispatcher_suppression_window() {
    let registry = create_test_registry(&["acme"]).await;
    let threshold = registry
        .create_threshold(&threshold_spec("acme", "uptime", "less_than", 95.0))
        .await
        .unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = dispatcher_with(notifier.clone());

    let event_at = |minutes: i64| AlertEvent {
        threshold: (*threshold).clone(),
        client_id: "acme".to_string(),
        observed: 94.0,
        timestamp: fixed_now() + ChronoDuration::minutes(minutes),
    };

    assert_eq!(dispatcher.submit(event_at(0)).await, DispatchOutcome::Dispatched);
    assert_eq!(dispatcher.submit(event_at(10)).await, DispatchOutcome::Suppressed);
    assert_eq!(dispatcher.submit(event_at(40)).await, DispatchOutcome::Dispatched);

    dispatcher.wait_for_deliveries().await;
    assert_eq!(notifier.count().await, 2);

    let stats = dispatcher.stats().await;
    assert_eq!(stats.dispatched, 2);
    assert_eq!(stats.suppressed, 1);
    assert_eq!(stats.delivered, 2);
}
