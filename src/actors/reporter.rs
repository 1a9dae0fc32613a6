//! ReporterActor - periodic daily reports
//!
//! On every tick a daily report is composed for each active client and saved
//! through the store. A failing client is logged and skipped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::messages::ReporterCommand;
use crate::registry::Registry;
use crate::reports::{ReportComposer, ReportType};
use crate::storage::{MonitoringStore, StoredReport};

struct ReporterActor {
    registry: Arc<Registry>,
    composer: ReportComposer,
    store: Arc<dyn MonitoringStore>,
    interval: Duration,
    command_rx: mpsc::Receiver<ReporterCommand>,
}

impl ReporterActor {
    #[instrument(skip(self))]
    async fn run(mut self) {
        debug!("starting reporter with interval {:?}", self.interval);

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        ReporterCommand::ComposeNow { respond_to } => {
                            let saved = self.compose_all().await;
                            let _ = respond_to.send(saved);
                        }

                        ReporterCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.compose_all().await;
                }

                else => break,
            }
        }

        debug!("reporter stopped");
    }

    async fn compose_all(&self) -> usize {
        let mut saved = 0;

        for client in self.registry.active_clients().await {
            let report = match self.composer.compose(&client.client_id, ReportType::Daily).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("failed to compose report for {}: {e}", client.client_id);
                    continue;
                }
            };

            let document = match serde_json::to_value(&report) {
                Ok(document) => document,
                Err(e) => {
                    error!("failed to serialize report for {}: {e}", client.client_id);
                    continue;
                }
            };

            let stored = StoredReport {
                client_id: client.client_id.clone(),
                report_type: report.report_type.as_str().to_string(),
                generated_at: report.generated_at,
                document,
            };
            match self.store.save_report(&stored).await {
                Ok(()) => saved += 1,
                Err(e) => error!("failed to save report for {}: {e}", client.client_id),
            }
        }

        info!("saved {saved} periodic reports");
        saved
    }
}

/// Handle for controlling the reporter
#[derive(Clone)]
pub struct ReporterHandle {
    sender: mpsc::Sender<ReporterCommand>,
}

impl ReporterHandle {
    pub fn spawn(
        registry: Arc<Registry>,
        composer: ReportComposer,
        store: Arc<dyn MonitoringStore>,
        interval: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = ReporterActor {
            registry,
            composer,
            store,
            interval,
            command_rx: cmd_rx,
        };
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Compose and save reports now, returning how many were saved
    pub async fn compose_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ReporterCommand::ComposeNow { respond_to: tx })
            .await
            .context("failed to send ComposeNow command")?;
        rx.await.context("failed to receive response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ReporterCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
