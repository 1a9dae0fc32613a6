//! RecorderActor - persists samples and feeds the aggregator
//!
//! Every sample produced by a poller passes through here exactly once:
//!
//! 1. The registry read guard is taken, so the system cannot be removed while
//!    its sample is recorded.
//! 2. Samples of systems that are no longer registered are discarded. This
//!    covers the probe that was in flight when its system was removed.
//! 3. The sample is appended to the store, then to the aggregator.
//!
//! A failing store is logged and counted. The aggregator still receives the
//! sample, so evaluation keeps working on in-memory history.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, instrument, trace};

use super::messages::{RecorderCommand, RecorderStats};
use crate::aggregator::MetricsAggregator;
use crate::model::Sample;
use crate::registry::Registry;
use crate::storage::MonitoringStore;

/// Cleanup interval - run retention cleanup daily
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct RecorderActor {
    registry: Arc<Registry>,
    aggregator: Arc<MetricsAggregator>,
    store: Arc<dyn MonitoringStore>,

    sample_rx: mpsc::Receiver<Sample>,
    command_rx: mpsc::Receiver<RecorderCommand>,

    /// Samples older than this are deleted on cleanup; `None` keeps everything
    retention: Option<chrono::Duration>,

    stats: RecorderStats,
}

impl RecorderActor {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!(
            "starting recorder (retention: {})",
            self.retention
                .map(|r| format!("{} days", r.num_days()))
                .unwrap_or_else(|| "unlimited".to_string())
        );

        let mut cleanup_interval =
            time::interval_at(time::Instant::now() + CLEANUP_INTERVAL, CLEANUP_INTERVAL);

        loop {
            tokio::select! {
                Some(sample) = self.sample_rx.recv() => {
                    self.record(sample).await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        RecorderCommand::Drain { respond_to } => {
                            let drained = self.drain().await;
                            let _ = respond_to.send(drained);
                        }

                        RecorderCommand::Cleanup { respond_to } => {
                            let deleted = self.cleanup().await;
                            let _ = respond_to.send(deleted);
                        }

                        RecorderCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats.clone());
                        }

                        RecorderCommand::Shutdown => {
                            debug!("received shutdown command");
                            self.drain().await;
                            break;
                        }
                    }
                }

                _ = cleanup_interval.tick() => {
                    self.cleanup().await;
                }

                else => break,
            }
        }

        info!(
            "recorder stopped ({} recorded, {} discarded, {} store failures)",
            self.stats.recorded, self.stats.discarded, self.stats.store_failures
        );
    }

    async fn record(&mut self, sample: Sample) {
        let key = sample.system_key();
        let registry = self.registry.read().await;

        if !registry.has_system(&key) {
            debug!("discarding sample of unregistered system {key}");
            self.stats.discarded += 1;
            return;
        }

        let stored = match &sample {
            Sample::Health(s) => self.store.append_health_sample(s).await,
            Sample::Metrics(s) => self.store.append_metrics_sample(s).await,
        };
        if let Err(e) = stored {
            error!("failed to persist sample of {key}: {e}");
            self.stats.store_failures += 1;
        }

        self.aggregator.record(sample).await;
        self.stats.recorded += 1;
        trace!("recorded sample of {key}");

        drop(registry);
    }

    /// Record everything already queued without waiting for more
    async fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(sample) = self.sample_rx.try_recv() {
            self.record(sample).await;
            drained += 1;
        }
        if drained > 0 {
            debug!("drained {drained} queued samples");
        }
        drained
    }

    async fn cleanup(&mut self) -> usize {
        let Some(retention) = self.retention else {
            trace!("no retention configured, skipping cleanup");
            return 0;
        };

        let cutoff = Utc::now() - retention;
        let pruned = self.aggregator.prune_before(cutoff).await;

        match self.store.cleanup_before(cutoff).await {
            Ok(deleted) => {
                info!("retention cleanup: {deleted} rows deleted, {pruned} samples pruned from memory");
                self.stats.last_cleanup = Some(Utc::now());
                self.stats.total_deleted += deleted as u64;
                deleted
            }
            Err(e) => {
                error!("retention cleanup failed: {e}");
                0
            }
        }
    }
}

/// Handle for controlling the recorder
#[derive(Clone)]
pub struct RecorderHandle {
    sender: mpsc::Sender<RecorderCommand>,
}

impl RecorderHandle {
    /// Spawn the recorder consuming `sample_rx`
    pub fn spawn(
        registry: Arc<Registry>,
        aggregator: Arc<MetricsAggregator>,
        store: Arc<dyn MonitoringStore>,
        sample_rx: mpsc::Receiver<Sample>,
        retention: Option<chrono::Duration>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = RecorderActor {
            registry,
            aggregator,
            store,
            sample_rx,
            command_rx: cmd_rx,
            retention,
            stats: RecorderStats::default(),
        };
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Record every queued sample, returning how many there were
    pub async fn drain(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RecorderCommand::Drain { respond_to: tx })
            .await
            .context("failed to send Drain command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn cleanup(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RecorderCommand::Cleanup { respond_to: tx })
            .await
            .context("failed to send Cleanup command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn stats(&self) -> Result<RecorderStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RecorderCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(RecorderCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
