//! PollScheduler - one independent poller per client system
//!
//! ## Message Flow
//!
//! ```text
//!                  ┌──────────────┐  reconcile tick / Reconcile
//!                  │ PollScheduler│◄──────────────────────────── Registry
//!                  └──────┬───────┘
//!            spawn/replace│retire
//!        ┌────────────────┼────────────────┐
//!        ▼                ▼                ▼
//!  SystemPoller     SystemPoller     SystemPoller      (own interval + jitter)
//!        │                │                │
//!        └── probe ── pull_metrics ── Sample ──► mpsc ──► RecorderActor
//! ```
//!
//! A slow probe only ever blocks its own poller. Reconfiguration takes effect on
//! the next cycle: a replaced system is swapped in between two polls, a retired
//! poller finishes the poll it is in and exits. Its last sample is discarded by
//! the recorder because the system is no longer registered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, info, instrument, trace, warn};

use super::messages::{PollOutcome, PollerCommand, ReconcileSummary, SchedulerCommand};
use crate::model::{ClientSystem, HealthStatus, MetricsSample, MetricsWindow, Sample, SystemKey};
use crate::monitors::{EndpointProber, MetricsPull};
use crate::registry::Registry;

/// Scheduler tunables
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often pollers are aligned with the registry
    pub reconcile_interval: Duration,

    /// Start every poller at a random offset within its interval
    pub jitter: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Actor polling a single client system
struct SystemPoller {
    system: Arc<ClientSystem>,
    prober: EndpointProber,
    command_rx: mpsc::Receiver<PollerCommand>,
    sample_tx: mpsc::Sender<Sample>,

    /// End of the last metrics window that was recorded
    metrics_cursor: DateTime<Utc>,

    jitter: bool,
}

impl SystemPoller {
    fn first_tick(&self) -> Instant {
        let interval_ms = self.system.interval.as_millis() as u64;
        let offset = if self.jitter && interval_ms > 0 {
            rand::rng().random_range(0..interval_ms)
        } else {
            0
        };
        Instant::now() + Duration::from_millis(offset)
    }

    #[instrument(skip(self), fields(system = %self.system.key()))]
    async fn run(mut self) {
        debug!("starting poller with interval {:?}", self.system.interval);

        let mut ticker = interval_at(self.first_tick(), self.system.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(PollerCommand::PollNow { respond_to }) => {
                            let outcome = self.poll().await;
                            let _ = respond_to.send(outcome);
                        }

                        Some(PollerCommand::Replace(system)) => {
                            debug!("system definition replaced");
                            let interval_changed = system.interval != self.system.interval;
                            self.system = system;
                            if interval_changed {
                                ticker = interval_at(Instant::now() + self.system.interval, self.system.interval);
                                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            }
                        }

                        Some(PollerCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.poll().await;
                }
            }
        }

        debug!("poller stopped");
    }

    /// Probe health, then pull metrics for `[cursor, now)`
    ///
    /// The metrics cursor only advances when the pull yielded data or an
    /// explicit absence of data, so a failed pull is retried next cycle with a
    /// wider window.
    async fn poll(&mut self) -> PollOutcome {
        let system = self.system.clone();

        let health = self.prober.probe(&system).await;
        let status = health.status;
        self.publish(Sample::Health(health)).await;

        if status == HealthStatus::Unreachable {
            trace!("skipping metrics pull of unreachable system");
            return PollOutcome {
                status,
                metrics_recorded: false,
            };
        }

        let now = Utc::now();
        if now <= self.metrics_cursor {
            return PollOutcome {
                status,
                metrics_recorded: false,
            };
        }

        let window = MetricsWindow::new(self.metrics_cursor, now);
        let sample = match self.prober.pull_metrics(&system, window).await {
            Ok(MetricsPull::Data(sample)) => Some(sample),
            Ok(MetricsPull::NoData) => Some(MetricsSample::zero_activity(&system, window)),
            Err(e) => {
                warn!("metrics pull failed, window stays open: {e}");
                None
            }
        };

        let metrics_recorded = match sample {
            Some(sample) => {
                self.metrics_cursor = window.end;
                self.publish(Sample::Metrics(sample)).await;
                true
            }
            None => false,
        };

        PollOutcome {
            status,
            metrics_recorded,
        }
    }

    async fn publish(&self, sample: Sample) {
        if self.sample_tx.send(sample).await.is_err() {
            warn!("sample channel closed, sample dropped");
        }
    }
}

/// Handle of a running poller, owned by the scheduler
struct PollerHandle {
    sender: mpsc::Sender<PollerCommand>,
    system: Arc<ClientSystem>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    fn spawn(
        system: Arc<ClientSystem>,
        prober: EndpointProber,
        sample_tx: mpsc::Sender<Sample>,
        jitter: bool,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let poller = SystemPoller {
            metrics_cursor: Utc::now()
                - chrono::Duration::from_std(system.interval).unwrap_or(chrono::Duration::zero()),
            system: system.clone(),
            prober,
            command_rx: cmd_rx,
            sample_tx,
            jitter,
        };

        Self {
            sender: cmd_tx,
            system,
            task: tokio::spawn(poller.run()),
        }
    }
}

/// Actor owning the set of pollers
pub struct PollScheduler {
    registry: Arc<Registry>,
    prober: EndpointProber,
    sample_tx: mpsc::Sender<Sample>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    config: SchedulerConfig,
    pollers: HashMap<SystemKey, PollerHandle>,

    /// Retired pollers that may still be finishing a probe
    retiring: Vec<JoinHandle<()>>,
}

impl PollScheduler {
    #[instrument(skip(self))]
    async fn run(mut self) {
        info!("starting poll scheduler");

        let mut reconcile_ticker = interval(self.config.reconcile_interval);
        reconcile_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::Reconcile { respond_to } => {
                            let summary = self.reconcile().await;
                            let _ = respond_to.send(summary);
                        }

                        SchedulerCommand::PollNow { key, respond_to } => {
                            let outcome = self.poll_now(&key).await;
                            let _ = respond_to.send(outcome);
                        }

                        SchedulerCommand::ListPollers { respond_to } => {
                            let mut keys: Vec<SystemKey> = self.pollers.keys().cloned().collect();
                            keys.sort();
                            let _ = respond_to.send(keys);
                        }

                        SchedulerCommand::Stop { respond_to } => {
                            self.stop().await;
                            let _ = respond_to.send(());
                            break;
                        }
                    }
                }

                _ = reconcile_ticker.tick() => {
                    self.reconcile().await;
                }

                else => {
                    warn!("command channel closed, stopping pollers");
                    self.stop().await;
                    break;
                }
            }
        }

        info!("poll scheduler stopped");
    }

    async fn reconcile(&mut self) -> ReconcileSummary {
        let desired: HashMap<SystemKey, Arc<ClientSystem>> = self
            .registry
            .systems()
            .await
            .into_iter()
            .map(|system| (system.key(), system))
            .collect();

        let mut summary = ReconcileSummary::default();

        let stale: Vec<SystemKey> = self
            .pollers
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(poller) = self.pollers.remove(&key) {
                debug!("retiring poller of {key}");
                let _ = poller.sender.send(PollerCommand::Shutdown).await;
                self.retiring.push(poller.task);
                summary.retired += 1;
            }
        }
        self.retiring.retain(|task| !task.is_finished());

        for (key, system) in desired {
            match self.pollers.get_mut(&key) {
                Some(poller) if *poller.system == *system => {}
                Some(poller) => {
                    debug!("replacing system definition of {key}");
                    poller.system = system.clone();
                    let _ = poller.sender.send(PollerCommand::Replace(system)).await;
                    summary.replaced += 1;
                }
                None => {
                    debug!("spawning poller for {key}");
                    let poller = PollerHandle::spawn(
                        system,
                        self.prober.clone(),
                        self.sample_tx.clone(),
                        self.config.jitter,
                    );
                    self.pollers.insert(key, poller);
                    summary.spawned += 1;
                }
            }
        }

        if summary != ReconcileSummary::default() {
            info!(
                "reconciled pollers: {} spawned, {} replaced, {} retired ({} running)",
                summary.spawned,
                summary.replaced,
                summary.retired,
                self.pollers.len()
            );
        }
        summary
    }

    async fn poll_now(&self, key: &SystemKey) -> Option<PollOutcome> {
        let poller = self.pollers.get(key)?;
        let (tx, rx) = oneshot::channel();
        poller
            .sender
            .send(PollerCommand::PollNow { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Shut every poller down and wait for in-flight probes to finish
    async fn stop(&mut self) {
        debug!("stopping {} pollers", self.pollers.len());

        let mut tasks = std::mem::take(&mut self.retiring);
        for (_, poller) in self.pollers.drain() {
            let _ = poller.sender.send(PollerCommand::Shutdown).await;
            tasks.push(poller.task);
        }

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("poller task failed: {e}");
            }
        }
    }
}

/// Handle for controlling the poll scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Start the scheduler; pollers are spawned on the first reconcile tick
    pub fn start(
        registry: Arc<Registry>,
        prober: EndpointProber,
        sample_tx: mpsc::Sender<Sample>,
        config: SchedulerConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let scheduler = PollScheduler {
            registry,
            prober,
            sample_tx,
            command_rx: cmd_rx,
            config,
            pollers: HashMap::new(),
            retiring: Vec::new(),
        };
        tokio::spawn(scheduler.run());

        Self { sender: cmd_tx }
    }

    /// Align pollers with the registry immediately
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Reconcile { respond_to: tx })
            .await
            .context("failed to send Reconcile command")?;
        rx.await.context("failed to receive response")
    }

    /// Poll one system now; `None` if no poller runs for it
    pub async fn poll_now(&self, key: &SystemKey) -> Result<Option<PollOutcome>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::PollNow {
                key: key.clone(),
                respond_to: tx,
            })
            .await
            .context("failed to send PollNow command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn pollers(&self) -> Result<Vec<SystemKey>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::ListPollers { respond_to: tx })
            .await
            .context("failed to send ListPollers command")?;
        rx.await.context("failed to receive response")
    }

    /// Stop polling; returns once every in-flight probe has finished
    pub async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Stop { respond_to: tx })
            .await
            .context("failed to send Stop command")?;
        rx.await.context("failed to receive response")
    }
}
