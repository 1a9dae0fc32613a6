//! ThresholdEvaluator - periodic evaluation of alert thresholds
//!
//! Each cycle works on one stable snapshot: the active thresholds and active
//! clients are read from the registry once, and every client's aggregate window
//! is computed at most once. Edits made while a cycle runs apply to the next
//! cycle.
//!
//! ```text
//! for threshold in active thresholds
//!   for client in scope(threshold) ∩ active clients
//!     value = snapshot(client).value(metric)      (undefined never fires)
//!     if comparison(value, threshold) → AlertEvent → store + dispatcher
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace};

use super::dispatcher::{AlertDispatcher, DispatchOutcome};
use super::messages::{CycleSummary, EvaluatorCommand};
use crate::aggregator::{AggregateWindow, MetricsAggregator};
use crate::model::{AlertEvent, ClientId, Timeframe};
use crate::monitors::violates;
use crate::registry::Registry;
use crate::storage::MonitoringStore;

/// Evaluates every active threshold against the current aggregates
pub struct ThresholdEvaluator {
    registry: Arc<Registry>,
    aggregator: Arc<MetricsAggregator>,
    store: Arc<dyn MonitoringStore>,
    dispatcher: Arc<AlertDispatcher>,

    /// Window the aggregates are computed over
    window: Timeframe,

    equals_epsilon: f64,
}

impl ThresholdEvaluator {
    pub fn new(
        registry: Arc<Registry>,
        aggregator: Arc<MetricsAggregator>,
        store: Arc<dyn MonitoringStore>,
        dispatcher: Arc<AlertDispatcher>,
        window: Timeframe,
        equals_epsilon: f64,
    ) -> Self {
        Self {
            registry,
            aggregator,
            store,
            dispatcher,
            window,
            equals_epsilon,
        }
    }

    /// Run one evaluation cycle as of `now`
    #[instrument(skip(self))]
    pub async fn evaluate_cycle(&self, now: DateTime<Utc>) -> CycleSummary {
        let thresholds = self.registry.active_thresholds().await;
        let clients: Vec<ClientId> = self
            .registry
            .active_clients()
            .await
            .into_iter()
            .map(|c| c.client_id)
            .collect();

        let mut summary = CycleSummary {
            evaluated_at: Some(now),
            thresholds: thresholds.len(),
            ..Default::default()
        };
        let mut snapshots: HashMap<ClientId, AggregateWindow> = HashMap::new();
        let mut fired = HashSet::new();

        for threshold in &thresholds {
            for client_id in clients.iter().filter(|c| threshold.scope.applies_to(c)) {
                if !snapshots.contains_key(client_id) {
                    let snapshot = self.aggregator.snapshot_at(client_id, self.window, now).await;
                    snapshots.insert(client_id.clone(), snapshot);
                }
                let observed = snapshots
                    .get(client_id)
                    .and_then(|snapshot| snapshot.value(threshold.metric));
                summary.checks += 1;

                trace!(
                    "threshold {} on {client_id}: {} {:?} {}",
                    threshold.id,
                    threshold.metric,
                    observed,
                    threshold.comparison.as_str()
                );

                if !violates(threshold, observed, self.equals_epsilon) {
                    continue;
                }
                let Some(observed) = observed else {
                    continue;
                };

                let event = AlertEvent {
                    threshold: (**threshold).clone(),
                    client_id: client_id.clone(),
                    observed,
                    timestamp: now,
                };
                summary.fired += 1;
                fired.insert(event.dedup_key());

                if let Err(e) = self.store.record_alert_event(&event).await {
                    error!("failed to record alert event for {client_id}: {e}");
                }

                match self.dispatcher.submit(event).await {
                    DispatchOutcome::Dispatched => summary.dispatched += 1,
                    DispatchOutcome::Suppressed => summary.suppressed += 1,
                }
            }
        }

        self.dispatcher.complete_cycle(&fired).await;
        let active_ids: HashSet<_> = thresholds.iter().map(|t| t.id).collect();
        self.dispatcher.retain_thresholds(&active_ids).await;

        if summary.fired > 0 {
            info!(
                "evaluation cycle: {} checks, {} fired ({} dispatched, {} suppressed)",
                summary.checks, summary.fired, summary.dispatched, summary.suppressed
            );
        } else {
            debug!("evaluation cycle: {} checks, nothing fired", summary.checks);
        }

        summary
    }
}

struct EvaluatorActor {
    evaluator: ThresholdEvaluator,
    interval: Duration,
    command_rx: mpsc::Receiver<EvaluatorCommand>,
}

impl EvaluatorActor {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting evaluator with interval {:?}", self.interval);

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        EvaluatorCommand::EvaluateNow { at, respond_to } => {
                            let summary = self.evaluator.evaluate_cycle(at.unwrap_or_else(Utc::now)).await;
                            let _ = respond_to.send(summary);
                        }

                        EvaluatorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.evaluator.evaluate_cycle(Utc::now()).await;
                }

                else => break,
            }
        }

        debug!("evaluator stopped");
    }
}

/// Handle for controlling the evaluator
#[derive(Clone)]
pub struct EvaluatorHandle {
    sender: mpsc::Sender<EvaluatorCommand>,
}

impl EvaluatorHandle {
    pub fn spawn(evaluator: ThresholdEvaluator, interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = EvaluatorActor {
            evaluator,
            interval,
            command_rx: cmd_rx,
        };
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a cycle now, or as of `at` when given
    pub async fn evaluate_now(&self, at: Option<DateTime<Utc>>) -> Result<CycleSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EvaluatorCommand::EvaluateNow { at, respond_to: tx })
            .await
            .context("failed to send EvaluateNow command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(EvaluatorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
