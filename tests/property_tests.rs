//! Property-based tests for invariants using proptest
//!
//! These tests verify that certain properties hold true for all inputs:
//! - Uptime is the share of healthy samples
//! - Success rate is undefined without automations
//! - Comparison operators are mutually consistent
//! - Undefined values never fire

use std::time::Duration;

use chrono::{TimeZone, Utc};
use client_monitoring::{
    aggregator::MetricsAggregator,
    model::{
        AlertThreshold, Comparison, HealthSample, HealthStatus, MetricName, MetricsSample,
        MetricsWindow, NotificationChannel, Sample, ThresholdScope, Timeframe,
    },
    monitors::{DEFAULT_EQUALS_EPSILON, violates},
};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn health(status: HealthStatus, seconds_ago: i64) -> Sample {
    let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
    Sample::Health(HealthSample {
        client_id: "acme".to_string(),
        system_name: "crm".to_string(),
        timestamp: now - chrono::Duration::seconds(seconds_ago),
        status,
        latency_ms: 10.0,
        error: None,
    })
}

fn threshold(comparison: Comparison, value: f64) -> AlertThreshold {
    AlertThreshold {
        id: 1,
        scope: ThresholdScope::AllActive,
        metric: MetricName::SuccessRate,
        comparison,
        value,
        channel: NotificationChannel::Email,
        suppression_window: Duration::from_secs(1800),
        active: true,
    }
}

// Property: uptime = healthy / all health samples, in whatever order they arrive
proptest! {
    #[test]
    fn prop_uptime_is_share_of_healthy_samples(
        healthy in 0usize..60,
        down in 0usize..60,
        unreachable in 0usize..20,
        reverse in any::<bool>(),
    ) {
        let mut samples = Vec::new();
        for i in 0..healthy {
            samples.push(health(HealthStatus::Healthy, 10 + i as i64));
        }
        for i in 0..down {
            samples.push(health(HealthStatus::Down, 1000 + i as i64));
        }
        for i in 0..unreachable {
            samples.push(health(HealthStatus::Unreachable, 2000 + i as i64));
        }
        if reverse {
            samples.reverse();
        }

        let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let snapshot = runtime().block_on(async {
            let aggregator = MetricsAggregator::new();
            for sample in samples {
                aggregator.record(sample).await;
            }
            aggregator.snapshot_at("acme", Timeframe::Day, now).await
        });

        let total = healthy + down + unreachable;
        prop_assert_eq!(snapshot.health_samples, total);
        match snapshot.uptime_percentage {
            None => prop_assert_eq!(total, 0),
            Some(uptime) => {
                let expected = healthy as f64 / total as f64 * 100.0;
                prop_assert!((uptime - expected).abs() < 1e-9);
                prop_assert!((0.0..=100.0).contains(&uptime));
            }
        }
    }
}

// Property: success rate is undefined exactly when no automation ran
proptest! {
    #[test]
    fn prop_success_rate_undefined_without_automations(
        windows in prop::collection::vec((0u64..50, 0u64..50), 1..6),
    ) {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let snapshot = runtime().block_on(async {
            let aggregator = MetricsAggregator::new();
            for (i, (successful, failed)) in windows.iter().enumerate() {
                let start = now - chrono::Duration::hours(i as i64 + 2);
                aggregator
                    .record(Sample::Metrics(MetricsSample {
                        client_id: "acme".to_string(),
                        system_name: "crm".to_string(),
                        window: MetricsWindow::new(start, start + chrono::Duration::hours(1)),
                        total_automations: successful + failed,
                        successful_automations: *successful,
                        failed_automations: *failed,
                        processing_time_sum: 0.0,
                        cost_savings: 0.0,
                    }))
                    .await;
            }
            aggregator.snapshot_at("acme", Timeframe::Day, now).await
        });

        let total: u64 = windows.iter().map(|(s, f)| s + f).sum();
        let successful: u64 = windows.iter().map(|(s, _)| s).sum();
        prop_assert_eq!(snapshot.total_automations, total);
        if total == 0 {
            prop_assert!(snapshot.success_rate.is_none());
            prop_assert!(!violates(&threshold(Comparison::LessThan, 90.0), snapshot.value(MetricName::SuccessRate), DEFAULT_EQUALS_EPSILON));
        } else {
            let expected = successful as f64 / total as f64 * 100.0;
            prop_assert!((snapshot.success_rate.unwrap() - expected).abs() < 1e-9);
        }
    }
}

// Property: greater_than and less_than never fire together, and neither fires on equality
proptest! {
    #[test]
    fn prop_comparisons_are_consistent(
        observed in -1000.0f64..1000.0,
        value in -1000.0f64..1000.0,
    ) {
        let gt = Comparison::GreaterThan.fires(observed, value, DEFAULT_EQUALS_EPSILON);
        let lt = Comparison::LessThan.fires(observed, value, DEFAULT_EQUALS_EPSILON);
        prop_assert!(!(gt && lt));
        prop_assert_eq!(gt, observed > value);
        prop_assert_eq!(lt, observed < value);

        prop_assert!(!Comparison::GreaterThan.fires(value, value, DEFAULT_EQUALS_EPSILON));
        prop_assert!(!Comparison::LessThan.fires(value, value, DEFAULT_EQUALS_EPSILON));
        prop_assert!(Comparison::Equals.fires(value, value, DEFAULT_EQUALS_EPSILON));
    }
}

// Property: equals fires exactly within the epsilon band
proptest! {
    #[test]
    fn prop_equals_uses_epsilon(
        value in -100.0f64..100.0,
        offset in 0.0f64..1.0,
    ) {
        let fires = Comparison::Equals.fires(value + offset, value, DEFAULT_EQUALS_EPSILON);
        if offset < DEFAULT_EQUALS_EPSILON * 0.5 {
            prop_assert!(fires);
        }
        if offset > DEFAULT_EQUALS_EPSILON * 2.0 {
            prop_assert!(!fires);
        }
    }
}

// Property: an undefined value never fires, whatever the threshold
proptest! {
    #[test]
    fn prop_undefined_never_fires(
        value in -1000.0f64..1000.0,
        comparison in prop_oneof![
            Just(Comparison::GreaterThan),
            Just(Comparison::LessThan),
            Just(Comparison::Equals),
        ],
    ) {
        prop_assert!(!violates(&threshold(comparison, value), None, DEFAULT_EQUALS_EPSILON));
    }
}
