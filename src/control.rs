//! Operator-facing control surface
//!
//! Registration and edits go through the registry, are persisted through the
//! store, and trigger a scheduler reconcile so new or removed systems take effect
//! on the next cycle. Only [`ConfigurationError`] is surfaced for registration
//! calls; persistence failures are logged.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::actors::scheduler::SchedulerHandle;
use crate::aggregator::{AggregateStatus, AggregateWindow, MetricsAggregator};
use crate::config::ClientConfig;
use crate::model::{AlertThreshold, Client, ClientId, SystemKey, ThresholdId, ThresholdScope, Timeframe};
use crate::monitors::violates;
use crate::registry::{ConfigurationError, Registry, SystemSpec, ThresholdSpec};
use crate::reports::{ReportComposer, ReportDocument, ReportError, ReportType};
use crate::storage::MonitoringStore;

#[derive(Debug)]
pub enum ControlError {
    Configuration(ConfigurationError),
    Report(ReportError),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Configuration(e) => write!(f, "{e}"),
            ControlError::Report(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ControlError {}

impl From<ConfigurationError> for ControlError {
    fn from(err: ConfigurationError) -> Self {
        ControlError::Configuration(err)
    }
}

impl From<ReportError> for ControlError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::UnknownClient(id) => {
                ControlError::Configuration(ConfigurationError::UnknownClient(id))
            }
            other => ControlError::Report(other),
        }
    }
}

/// Current value of a threshold's metric for one client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientCheck {
    pub client_id: ClientId,
    pub current_value: Option<f64>,
    pub would_fire: bool,
}

/// A threshold together with a dry run against current data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdCheck {
    pub threshold: AlertThreshold,
    pub evaluations: Vec<ClientCheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientOverview {
    pub client_id: ClientId,
    pub name: String,
    pub industry: Option<String>,
    pub status: AggregateStatus,
    pub systems_count: usize,
    pub healthy_systems: usize,
    pub automations_24h: u64,
    pub success_rate_24h: Option<f64>,
    pub avg_response_time_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetSummary {
    pub total_clients: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub down: usize,
    pub unknown: usize,
    pub overall_success_rate: Option<f64>,
}

/// Status of every active client at a glance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetOverview {
    pub generated_at: DateTime<Utc>,
    pub clients: Vec<ClientOverview>,
    pub summary: FleetSummary,
    pub quick_actions: Vec<String>,
}

#[derive(Clone)]
pub struct ControlSurface {
    registry: Arc<Registry>,
    aggregator: Arc<MetricsAggregator>,
    store: Arc<dyn MonitoringStore>,
    composer: ReportComposer,
    scheduler: Option<SchedulerHandle>,

    /// Window thresholds are dry-run against, same as the evaluator's
    window: Timeframe,
    equals_epsilon: f64,
}

impl ControlSurface {
    pub fn new(
        registry: Arc<Registry>,
        aggregator: Arc<MetricsAggregator>,
        store: Arc<dyn MonitoringStore>,
        window: Timeframe,
        equals_epsilon: f64,
    ) -> Self {
        let composer =
            ReportComposer::new(registry.clone(), aggregator.clone(), store.clone(), equals_epsilon);
        Self {
            registry,
            aggregator,
            store,
            composer,
            scheduler: None,
            window,
            equals_epsilon,
        }
    }

    /// Reconcile this scheduler after every registration change
    pub fn with_scheduler(mut self, scheduler: SchedulerHandle) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn composer(&self) -> &ReportComposer {
        &self.composer
    }

    // ------------------------------------------------------------------------
    // Clients and systems
    // ------------------------------------------------------------------------

    /// Register (or update) a client together with its systems
    ///
    /// The whole request is validated before anything is applied. Updating an
    /// existing client keeps its active flag.
    #[instrument(skip(self, registration), fields(client = %registration.client_id))]
    pub async fn register_client(&self, registration: ClientConfig) -> Result<Client, ControlError> {
        let client_id = registration.client_id.clone();

        let mut names = HashSet::new();
        let mut systems = Vec::with_capacity(registration.systems.len());
        for spec in registration.systems {
            if !names.insert(spec.name.clone()) {
                return Err(ConfigurationError::DuplicateSystem(spec.name).into());
            }
            systems.push(spec.into_system(&client_id)?);
        }

        let client = Client {
            client_id: client_id.clone(),
            name: registration.name,
            industry: registration.industry,
            contact_email: registration.contact_email,
            active: true,
        };
        self.registry.register_client(client.clone()).await?;
        for system in systems {
            self.registry.register_system(system).await?;
        }

        self.persist_client(&client_id).await;
        self.reconcile().await;
        Ok(self.registry.client(&client_id).await.unwrap_or(client))
    }

    pub async fn activate_client(&self, client_id: &str) -> Result<(), ControlError> {
        self.registry.activate_client(client_id).await?;
        self.persist_client(client_id).await;
        self.reconcile().await;
        Ok(())
    }

    pub async fn deactivate_client(&self, client_id: &str) -> Result<(), ControlError> {
        self.registry.deactivate_client(client_id).await?;
        self.persist_client(client_id).await;
        self.reconcile().await;
        Ok(())
    }

    /// Remove a client, its systems, and its in-memory history
    ///
    /// Thresholds scoped to the client are deactivated.
    #[instrument(skip(self))]
    pub async fn deregister_client(&self, client_id: &str) -> Result<Client, ControlError> {
        let client = self.registry.deregister_client(client_id).await?;

        if let Err(e) = self.store.remove_client(client_id).await {
            error!("failed to remove client {client_id} from store: {e}");
        }
        let scope = ThresholdScope::Specific(client_id.to_string());
        for threshold in self.registry.thresholds().await {
            if threshold.scope == scope {
                self.persist_threshold(&threshold).await;
            }
        }
        self.aggregator.forget_client(client_id).await;

        self.reconcile().await;
        Ok(client)
    }

    pub async fn add_system(&self, client_id: &str, spec: SystemSpec) -> Result<(), ControlError> {
        let system = spec.into_system(client_id)?;
        self.registry.register_system(system).await?;
        self.persist_client(client_id).await;
        self.reconcile().await;
        Ok(())
    }

    /// Remove a system; its samples stop counting towards the client's status
    pub async fn remove_system(&self, client_id: &str, system_name: &str) -> Result<(), ControlError> {
        let key = SystemKey {
            client_id: client_id.to_string(),
            system_name: system_name.to_string(),
        };
        self.registry.deregister_system(&key).await?;
        self.aggregator.forget_system(&key).await;
        self.persist_client(client_id).await;
        self.reconcile().await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Thresholds
    // ------------------------------------------------------------------------

    pub async fn create_threshold(&self, spec: &ThresholdSpec) -> Result<ThresholdCheck, ControlError> {
        let threshold = self.registry.create_threshold(spec).await?;
        self.persist_threshold(&threshold).await;
        Ok(self.check_threshold(&threshold).await)
    }

    pub async fn edit_threshold(
        &self,
        id: ThresholdId,
        spec: &ThresholdSpec,
    ) -> Result<ThresholdCheck, ControlError> {
        let threshold = self.registry.edit_threshold(id, spec).await?;
        self.persist_threshold(&threshold).await;
        Ok(self.check_threshold(&threshold).await)
    }

    pub async fn deactivate_threshold(&self, id: ThresholdId) -> Result<AlertThreshold, ControlError> {
        let threshold = self.registry.deactivate_threshold(id).await?;
        self.persist_threshold(&threshold).await;
        Ok((*threshold).clone())
    }

    pub async fn thresholds(&self) -> Vec<AlertThreshold> {
        self.registry
            .thresholds()
            .await
            .iter()
            .map(|t| (**t).clone())
            .collect()
    }

    /// Dry run of a threshold against the current aggregates
    pub async fn check_threshold(&self, threshold: &AlertThreshold) -> ThresholdCheck {
        let mut evaluations = Vec::new();
        for client_id in self.registry.resolve_scope(&threshold.scope).await {
            let snapshot = self.aggregator.snapshot(&client_id, self.window).await;
            let current_value = snapshot.value(threshold.metric);
            evaluations.push(ClientCheck {
                would_fire: threshold.active
                    && violates(threshold, current_value, self.equals_epsilon),
                client_id,
                current_value,
            });
        }

        ThresholdCheck {
            threshold: threshold.clone(),
            evaluations,
        }
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    pub async fn snapshot(
        &self,
        client_id: &str,
        timeframe: Timeframe,
    ) -> Result<AggregateWindow, ControlError> {
        if self.registry.client(client_id).await.is_none() {
            return Err(ConfigurationError::UnknownClient(client_id.to_string()).into());
        }
        Ok(self.aggregator.snapshot(client_id, timeframe).await)
    }

    /// Compose an on-demand report
    pub async fn report(
        &self,
        client_id: &str,
        report_type: ReportType,
    ) -> Result<ReportDocument, ControlError> {
        Ok(self.composer.compose(client_id, report_type).await?)
    }

    pub async fn fleet_overview(&self) -> FleetOverview {
        let now = Utc::now();
        let mut clients = Vec::new();
        let mut summary = FleetSummary::default();
        let (mut successful, mut total) = (0u64, 0u64);

        for client in self.registry.active_clients().await {
            let snapshot = self
                .aggregator
                .snapshot_at(&client.client_id, Timeframe::Day, now)
                .await;
            let systems_count = self.registry.systems_of(&client.client_id).await.len();

            match snapshot.status {
                AggregateStatus::Healthy => summary.healthy += 1,
                AggregateStatus::Degraded => summary.degraded += 1,
                AggregateStatus::Down => summary.down += 1,
                AggregateStatus::Unknown => summary.unknown += 1,
            }
            successful += snapshot.successful_automations;
            total += snapshot.total_automations;

            clients.push(ClientOverview {
                client_id: client.client_id,
                name: client.name,
                industry: client.industry,
                status: snapshot.status,
                systems_count,
                healthy_systems: snapshot.systems.iter().filter(|s| s.status.is_healthy()).count(),
                automations_24h: snapshot.total_automations,
                success_rate_24h: snapshot.success_rate,
                avg_response_time_ms: snapshot.avg_latency_ms,
            });
        }

        summary.total_clients = clients.len();
        summary.overall_success_rate =
            (total > 0).then(|| successful as f64 / total as f64 * 100.0);

        let mut quick_actions = Vec::new();
        if summary.down > 0 {
            quick_actions.push(format!("Urgent: {} clients have systems down", summary.down));
        }
        if summary.degraded > 0 {
            quick_actions.push(format!(
                "Review: {} clients show degraded performance",
                summary.degraded
            ));
        }

        FleetOverview {
            generated_at: now,
            clients,
            summary,
            quick_actions,
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn persist_client(&self, client_id: &str) {
        let Some(client) = self.registry.client(client_id).await else {
            return;
        };
        let systems: Vec<_> = self
            .registry
            .systems_of(client_id)
            .await
            .iter()
            .map(|s| (**s).clone())
            .collect();

        if let Err(e) = self.store.save_client(&client, &systems).await {
            error!("failed to persist client {client_id}: {e}");
        }
    }

    async fn persist_threshold(&self, threshold: &AlertThreshold) {
        if let Err(e) = self.store.save_threshold(threshold).await {
            error!("failed to persist threshold {}: {e}", threshold.id);
        }
    }

    async fn reconcile(&self) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        match scheduler.reconcile().await {
            Ok(summary) => info!(
                "scheduler reconciled: {} spawned, {} replaced, {} retired",
                summary.spawned, summary.replaced, summary.retired
            ),
            Err(e) => warn!("failed to reconcile scheduler: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HealthSample, HealthStatus, Sample};
    use crate::storage::MemoryStore;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn surface() -> (ControlSurface, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let surface = ControlSurface::new(
            Arc::new(Registry::new(Duration::from_secs(1800))),
            Arc::new(MetricsAggregator::new()),
            store.clone(),
            Timeframe::Day,
            0.01,
        );
        (surface, store)
    }

    fn registration(id: &str, systems: &[&str]) -> ClientConfig {
        ClientConfig {
            client_id: id.to_string(),
            name: format!("{id} inc"),
            industry: None,
            contact_email: None,
            systems: systems
                .iter()
                .map(|name| SystemSpec {
                    name: name.to_string(),
                    endpoint: "http://localhost:9000".to_string(),
                    interval: 60,
                    timeout: 5,
                    retries: 1,
                })
                .collect(),
        }
    }

    fn spec(client: &str, metric: &str) -> ThresholdSpec {
        ThresholdSpec {
            client: client.to_string(),
            metric: metric.to_string(),
            comparison: "less_than".to_string(),
            value: 95.0,
            channel: "email".to_string(),
            suppression_minutes: Some(10),
        }
    }

    #[tokio::test]
    async fn test_register_client_persists_systems() {
        let (surface, store) = surface();
        surface
            .register_client(registration("acme", &["crm", "erp"]))
            .await
            .unwrap();

        assert_eq!(surface.registry().systems_of("acme").await.len(), 2);
        assert_eq!(store.list_systems("acme").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_system_rejected_before_registration() {
        let (surface, _) = surface();
        let result = surface
            .register_client(registration("acme", &["crm", "crm"]))
            .await;

        assert_matches!(
            result,
            Err(ControlError::Configuration(ConfigurationError::DuplicateSystem(name))) if name == "crm"
        );
        assert!(surface.registry().client("acme").await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_metric_never_registered() {
        let (surface, _) = surface();
        surface.register_client(registration("acme", &[])).await.unwrap();

        let result = surface.create_threshold(&spec("acme", "cpu_temperature")).await;
        assert_matches!(
            result,
            Err(ControlError::Configuration(ConfigurationError::UnknownMetric(_)))
        );
        assert!(surface.thresholds().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_threshold_dry_run() {
        let (surface, _) = surface();
        surface.register_client(registration("acme", &["crm"])).await.unwrap();
        surface.register_client(registration("globex", &["crm"])).await.unwrap();
        surface
            .aggregator
            .record(Sample::Health(HealthSample {
                client_id: "acme".to_string(),
                system_name: "crm".to_string(),
                timestamp: Utc::now() - chrono::Duration::minutes(5),
                status: HealthStatus::Down,
                latency_ms: 10.0,
                error: None,
            }))
            .await;

        let check = surface.create_threshold(&spec("*", "uptime")).await.unwrap();

        assert_eq!(check.threshold.suppression_window, Duration::from_secs(600));
        assert_eq!(check.evaluations.len(), 2);
        let acme = check.evaluations.iter().find(|c| c.client_id == "acme").unwrap();
        assert_eq!(acme.current_value, Some(0.0));
        assert!(acme.would_fire);
        let globex = check.evaluations.iter().find(|c| c.client_id == "globex").unwrap();
        assert_eq!(globex.current_value, None);
        assert!(!globex.would_fire);
    }

    #[tokio::test]
    async fn test_deregister_deactivates_scoped_thresholds() {
        let (surface, store) = surface();
        surface.register_client(registration("acme", &["crm"])).await.unwrap();
        let check = surface.create_threshold(&spec("acme", "uptime")).await.unwrap();

        surface.deregister_client("acme").await.unwrap();

        let threshold = surface.registry().threshold(check.threshold.id).await.unwrap();
        assert!(!threshold.active);
        assert!(store.list_active_thresholds().await.unwrap().is_empty());
        assert_matches!(
            surface.snapshot("acme", Timeframe::Day).await,
            Err(ControlError::Configuration(ConfigurationError::UnknownClient(_)))
        );
    }

    #[tokio::test]
    async fn test_fleet_overview_counts() {
        let (surface, _) = surface();
        surface.register_client(registration("acme", &["crm"])).await.unwrap();
        surface.register_client(registration("globex", &["crm"])).await.unwrap();
        surface
            .aggregator
            .record(Sample::Health(HealthSample {
                client_id: "acme".to_string(),
                system_name: "crm".to_string(),
                timestamp: Utc::now() - chrono::Duration::minutes(1),
                status: HealthStatus::Unreachable,
                latency_ms: 5000.0,
                error: Some("timed out".to_string()),
            }))
            .await;

        let overview = surface.fleet_overview().await;
        assert_eq!(overview.summary.total_clients, 2);
        assert_eq!(overview.summary.down, 1);
        assert_eq!(overview.summary.unknown, 1);
        assert_eq!(overview.quick_actions, vec!["Urgent: 1 clients have systems down"]);
    }

    fn health(system: &str, status: HealthStatus) -> Sample {
        Sample::Health(HealthSample {
            client_id: "acme".to_string(),
            system_name: system.to_string(),
            timestamp: Utc::now() - chrono::Duration::minutes(1),
            status,
            latency_ms: 10.0,
            error: None,
        })
    }

    #[tokio::test]
    async fn test_removed_system_leaves_aggregate_status() {
        let (surface, _) = surface();
        surface
            .register_client(registration("acme", &["crm", "erp"]))
            .await
            .unwrap();
        surface.aggregator.record(health("crm", HealthStatus::Healthy)).await;
        surface.aggregator.record(health("erp", HealthStatus::Unreachable)).await;
        let window = surface.snapshot("acme", Timeframe::Day).await.unwrap();
        assert_eq!(window.status, AggregateStatus::Degraded);

        surface.remove_system("acme", "erp").await.unwrap();

        let window = surface.snapshot("acme", Timeframe::Day).await.unwrap();
        assert_eq!(window.status, AggregateStatus::Healthy);
        let systems: Vec<_> = surface
            .registry()
            .systems_of("acme")
            .await
            .iter()
            .map(|s| s.system_name.clone())
            .collect();
        assert_eq!(systems, vec!["crm"]);
    }

    #[tokio::test]
    async fn test_reregistration_keeps_client_inactive() {
        let (surface, store) = surface();
        surface.register_client(registration("acme", &["crm"])).await.unwrap();
        surface.deactivate_client("acme").await.unwrap();

        let client = surface.register_client(registration("acme", &["crm"])).await.unwrap();

        assert!(!client.active);
        assert!(surface.registry().active_clients().await.is_empty());
        assert!(store.list_active_clients().await.unwrap().is_empty());

        surface.activate_client("acme").await.unwrap();
        assert_eq!(store.list_active_clients().await.unwrap().len(), 1);
    }
}
