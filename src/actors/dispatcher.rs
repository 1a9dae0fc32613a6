//! AlertDispatcher - suppression and delivery of alert events
//!
//! ## Suppression
//!
//! One record is kept per [`DedupKey`]. An event is dispatched when no record
//! exists or when at least the threshold's suppression window has passed since
//! the last dispatch, measured on the events' own timestamps:
//!
//! ```text
//! t0        event → dispatched     (record: last_dispatched = t0)
//! t0+10m    event → suppressed     (10m < 30m)
//! t0+40m    event → dispatched     (record: last_dispatched = t0+40m)
//! ```
//!
//! A condition that stops firing is forgotten at the end of the evaluation cycle
//! ([`AlertDispatcher::complete_cycle`]), so a fresh violation after recovery
//! notifies immediately.
//!
//! ## Delivery
//!
//! Deliveries run as detached tasks bounded by a timeout. A slow or failing
//! channel never delays evaluation; failures are logged and counted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, info, instrument, trace};

use crate::model::{AlertEvent, DedupKey, ThresholdId};
use crate::notify::{Notifiers, NotifyError, RenderedMessage};

/// What happened to a submitted event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Dispatched,
    Suppressed,
}

#[derive(Debug, Clone)]
struct DispatchRecord {
    last_dispatched: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    suppressed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    suppressed: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Dispatcher statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub suppressed: u64,
    pub delivered: u64,
    pub failed: u64,

    /// Alert conditions currently remembered for suppression
    pub tracked_keys: usize,
}

pub struct AlertDispatcher {
    notifiers: Notifiers,
    delivery_timeout: Duration,
    records: Mutex<HashMap<DedupKey, DispatchRecord>>,
    deliveries: Mutex<JoinSet<()>>,
    counters: Arc<Counters>,
}

impl AlertDispatcher {
    pub fn new(notifiers: Notifiers, delivery_timeout: Duration) -> Self {
        debug!(
            "creating alert dispatcher with {} channels, delivery timeout {:?}",
            notifiers.len(),
            delivery_timeout
        );
        Self {
            notifiers,
            delivery_timeout,
            records: Mutex::new(HashMap::new()),
            deliveries: Mutex::new(JoinSet::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Dispatch an event unless its condition is inside the suppression window
    #[instrument(skip(self, event), fields(key = %event.dedup_key()))]
    pub async fn submit(&self, event: AlertEvent) -> DispatchOutcome {
        let key = event.dedup_key();
        let window = chrono::Duration::from_std(event.threshold.suppression_window)
            .unwrap_or(chrono::TimeDelta::MAX);

        {
            let mut records = self.records.lock().await;
            match records.get_mut(&key) {
                Some(record) if event.timestamp - record.last_dispatched < window => {
                    record.last_seen = event.timestamp;
                    record.suppressed += 1;
                    self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "suppressed ({} since last dispatch at {})",
                        record.suppressed, record.last_dispatched
                    );
                    return DispatchOutcome::Suppressed;
                }
                _ => {
                    records.insert(
                        key,
                        DispatchRecord {
                            last_dispatched: event.timestamp,
                            last_seen: event.timestamp,
                            suppressed: 0,
                        },
                    );
                }
            }
        }

        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        info!(
            "dispatching {} alert for {} via {} (observed {})",
            event.threshold.metric,
            event.client_id,
            event.threshold.channel.as_str(),
            event.observed
        );
        self.deliver(RenderedMessage::render(&event)).await;

        DispatchOutcome::Dispatched
    }

    async fn deliver(&self, message: RenderedMessage) {
        let channel = message.event.threshold.channel;
        let notifier = self.notifiers.get(&channel).cloned();
        let counters = self.counters.clone();
        let delivery_timeout = self.delivery_timeout;

        let mut deliveries = self.deliveries.lock().await;
        deliveries.spawn(async move {
            let result = match notifier {
                None => Err(NotifyError::MissingChannel(channel)),
                Some(notifier) => time::timeout(delivery_timeout, notifier.send(&message))
                    .await
                    .unwrap_or(Err(NotifyError::TimedOut)),
            };

            match result {
                Ok(()) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "failed to deliver alert for {} via {}: {e}",
                        message.event.client_id,
                        channel.as_str()
                    );
                }
            }
        });

        // reap finished deliveries
        while deliveries.try_join_next().is_some() {}
    }

    /// Forget every condition that did not fire in the cycle just finished
    pub async fn complete_cycle(&self, fired: &HashSet<DedupKey>) {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|key, _| fired.contains(key));
        let recovered = before - records.len();
        if recovered > 0 {
            debug!("{recovered} alert conditions recovered");
        }
    }

    /// Drop records of thresholds that no longer exist or are inactive
    pub async fn retain_thresholds(&self, active: &HashSet<ThresholdId>) {
        self.records
            .lock()
            .await
            .retain(|key, _| active.contains(&key.threshold_id));
    }

    /// Last time a condition was observed firing
    pub async fn last_seen(&self, key: &DedupKey) -> Option<DateTime<Utc>> {
        self.records.lock().await.get(key).map(|r| r.last_seen)
    }

    pub async fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            tracked_keys: self.records.lock().await.len(),
        }
    }

    /// Wait until every delivery in flight has finished
    pub async fn wait_for_deliveries(&self) {
        let mut deliveries = std::mem::take(&mut *self.deliveries.lock().await);
        trace!("waiting for {} deliveries", deliveries.len());
        while let Some(result) = deliveries.join_next().await {
            if let Err(e) = result {
                error!("delivery task failed: {e}");
            }
        }
    }
}
