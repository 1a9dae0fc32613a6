//! Hub wiring - builds and starts every component of the engine
//!
//! Startup order:
//!
//! 1. Restore clients, systems and thresholds from the store
//! 2. Apply the configuration file on top (through the control surface)
//! 3. Warm the aggregator with persisted history
//! 4. Spawn recorder → scheduler → evaluator → reporter
//!
//! [`MonitoringHub::shutdown`] stops them in reverse data-flow order so that no
//! sample produced before shutdown is lost.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::actors::dispatcher::AlertDispatcher;
use crate::actors::evaluator::{EvaluatorHandle, ThresholdEvaluator};
use crate::actors::recorder::RecorderHandle;
use crate::actors::reporter::ReporterHandle;
use crate::actors::scheduler::{SchedulerConfig, SchedulerHandle};
use crate::aggregator::MetricsAggregator;
use crate::config::Config;
use crate::control::ControlSurface;
use crate::model::{AlertThreshold, MetricsWindow, Timeframe};
use crate::monitors::EndpointProber;
use crate::notify::Notifiers;
use crate::registry::{Registry, ThresholdSpec};
use crate::storage::MonitoringStore;

/// Capacity of the poller → recorder sample channel
const SAMPLE_CHANNEL_CAPACITY: usize = 1024;

/// Whether a configured threshold is already present (restored from the store)
fn matches_spec(threshold: &AlertThreshold, spec: &ThresholdSpec) -> bool {
    threshold.active
        && threshold.scope.to_string() == spec.client.trim()
        && threshold.metric.as_str() == spec.metric
        && threshold.comparison.as_str() == spec.comparison
        && threshold.channel.as_str() == spec.channel
        && threshold.value == spec.value
}

pub struct MonitoringHub {
    store: Arc<dyn MonitoringStore>,
    dispatcher: Arc<AlertDispatcher>,
    scheduler: SchedulerHandle,
    recorder: RecorderHandle,
    evaluator: EvaluatorHandle,
    reporter: ReporterHandle,
    control: ControlSurface,
}

impl MonitoringHub {
    #[instrument(skip_all)]
    pub async fn start(
        config: &Config,
        store: Arc<dyn MonitoringStore>,
        notifiers: Notifiers,
    ) -> Result<Self> {
        let engine = &config.engine;
        ensure!(
            engine.evaluation_interval > 0
                && engine.report_interval > 0
                && engine.reconcile_interval > 0,
            "engine intervals must be greater than zero"
        );

        let registry = Arc::new(Registry::new(engine.default_suppression()));
        let aggregator = Arc::new(MetricsAggregator::new());

        Self::restore(&registry, store.as_ref()).await?;

        let control = ControlSurface::new(
            registry.clone(),
            aggregator.clone(),
            store.clone(),
            engine.evaluation_window,
            engine.equals_epsilon,
        );

        for client in &config.clients {
            control
                .register_client(client.clone())
                .await
                .with_context(|| format!("invalid client '{}'", client.client_id))?;
        }

        let existing = registry.thresholds().await;
        for spec in &config.thresholds {
            if existing.iter().any(|t| matches_spec(t, spec)) {
                debug!("threshold {} {} on {} already registered", spec.metric, spec.comparison, spec.client);
                continue;
            }
            control
                .create_threshold(spec)
                .await
                .with_context(|| format!("invalid threshold on '{}' for '{}'", spec.client, spec.metric))?;
        }

        Self::warm(&registry, &aggregator, store.as_ref()).await;

        let dispatcher = Arc::new(AlertDispatcher::new(
            notifiers,
            config.notifications.timeout(),
        ));

        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        let retention = config.storage.clone().unwrap_or_default().retention();
        let recorder = RecorderHandle::spawn(
            registry.clone(),
            aggregator.clone(),
            store.clone(),
            sample_rx,
            retention,
        );

        let prober = EndpointProber::new(Duration::from_millis(engine.retry_backoff_ms))?;
        let scheduler = SchedulerHandle::start(
            registry.clone(),
            prober,
            sample_tx,
            SchedulerConfig {
                reconcile_interval: Duration::from_secs(engine.reconcile_interval),
                jitter: true,
            },
        );

        let evaluator = EvaluatorHandle::spawn(
            ThresholdEvaluator::new(
                registry.clone(),
                aggregator.clone(),
                store.clone(),
                dispatcher.clone(),
                engine.evaluation_window,
                engine.equals_epsilon,
            ),
            Duration::from_secs(engine.evaluation_interval),
        );

        let reporter = ReporterHandle::spawn(
            registry.clone(),
            control.composer().clone(),
            store.clone(),
            Duration::from_secs(engine.report_interval),
        );

        let summary = scheduler.reconcile().await?;
        info!(
            "monitoring hub started: {} clients, {} pollers, {} thresholds",
            registry.active_clients().await.len(),
            summary.spawned,
            registry.active_thresholds().await.len()
        );

        Ok(Self {
            store,
            dispatcher,
            control: control.with_scheduler(scheduler.clone()),
            scheduler,
            recorder,
            evaluator,
            reporter,
        })
    }

    /// Rebuild the registry from the store
    ///
    /// Deactivated clients and thresholds are restored too, so their state and
    /// ids survive a restart.
    async fn restore(registry: &Registry, store: &dyn MonitoringStore) -> Result<()> {
        let clients = store
            .list_clients()
            .await
            .context("failed to load clients")?;
        for client in clients {
            let systems = store
                .list_systems(&client.client_id)
                .await
                .context("failed to load systems")?;
            let client_id = client.client_id.clone();
            registry.register_client(client).await?;
            for system in systems {
                registry.register_system(system).await?;
            }
            debug!("restored client {client_id}");
        }

        let thresholds = store
            .list_thresholds()
            .await
            .context("failed to load thresholds")?;
        for threshold in thresholds {
            registry.restore_threshold(threshold).await;
        }
        Ok(())
    }

    /// Load enough history for every timeframe and its trend baseline
    ///
    /// Samples of systems that are no longer registered are skipped.
    async fn warm(registry: &Registry, aggregator: &MetricsAggregator, store: &dyn MonitoringStore) {
        let now = Utc::now();
        let longest = Timeframe::Quarter.duration();
        let range = MetricsWindow::new(now - longest - longest, now);

        for client in registry.clients().await {
            let systems: HashSet<String> = registry
                .systems_of(&client.client_id)
                .await
                .iter()
                .map(|s| s.system_name.clone())
                .collect();
            match store.load_samples_in_range(&client.client_id, range).await {
                Ok(samples) => {
                    let mut count = 0;
                    for sample in samples {
                        if !systems.contains(&sample.system_key().system_name) {
                            continue;
                        }
                        aggregator.record(sample).await;
                        count += 1;
                    }
                    debug!("warmed aggregator with {count} samples of {}", client.client_id);
                }
                Err(e) => warn!("failed to load history of {}: {e}", client.client_id),
            }
        }
    }

    pub fn control(&self) -> &ControlSurface {
        &self.control
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn recorder(&self) -> &RecorderHandle {
        &self.recorder
    }

    pub fn evaluator(&self) -> &EvaluatorHandle {
        &self.evaluator
    }

    pub fn reporter(&self) -> &ReporterHandle {
        &self.reporter
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    pub fn store(&self) -> &Arc<dyn MonitoringStore> {
        &self.store
    }

    /// Stop polling, record what is queued, then stop everything else
    #[instrument(skip(self))]
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down monitoring hub");

        self.scheduler.stop().await?;
        let drained = self.recorder.drain().await?;
        debug!("recorded {drained} samples queued at shutdown");
        self.recorder.shutdown().await?;

        self.evaluator.shutdown().await?;
        self.reporter.shutdown().await?;
        self.dispatcher.wait_for_deliveries().await;

        self.store.close().await.context("failed to close store")?;
        info!("monitoring hub stopped");
        Ok(())
    }
}
