//! Registry of monitored clients, their systems, and alert thresholds
//!
//! The registry is the only configuration state shared by the scheduler, the
//! recorder and the evaluator. It is passed to them explicitly as an
//! `Arc<Registry>`.
//!
//! Readers always receive snapshots (`Arc` clones or owned copies), so a running
//! poll or evaluation cycle never observes a half-applied edit.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, instrument};

use crate::model::{
    AlertThreshold, Client, ClientId, ClientSystem, Comparison, MetricName, NotificationChannel,
    SystemKey, ThresholdId, ThresholdScope,
};

/// Invalid registration or edit request
///
/// This is the only error the registration API surfaces to callers. Anything
/// that fails with it never reaches the scheduler or the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    UnknownMetric(String),
    UnknownClient(String),
    UnknownSystem(String),
    DuplicateSystem(String),
    UnknownThreshold(ThresholdId),
    InvalidScope(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::UnknownMetric(name) => write!(f, "unknown metric name: {name}"),
            ConfigurationError::UnknownClient(id) => write!(f, "unknown client: {id}"),
            ConfigurationError::UnknownSystem(key) => write!(f, "unknown system: {key}"),
            ConfigurationError::DuplicateSystem(name) => {
                write!(f, "system '{name}' is defined more than once")
            }
            ConfigurationError::UnknownThreshold(id) => write!(f, "unknown threshold: {id}"),
            ConfigurationError::InvalidScope(msg) => write!(f, "invalid threshold scope: {msg}"),
            ConfigurationError::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Operator-facing threshold definition, validated on registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    /// Client id, or `*` for every active client
    pub client: String,
    pub metric: String,
    pub comparison: String,
    pub value: f64,
    pub channel: String,
    pub suppression_minutes: Option<u64>,
}

/// Operator-facing system definition, validated on registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSpec {
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_interval() -> u64 {
    60
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    2
}

impl SystemSpec {
    pub fn into_system(self, client_id: &str) -> Result<ClientSystem, ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::InvalidValue(
                "system name must not be empty".to_string(),
            ));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigurationError::InvalidValue(format!(
                "endpoint '{}' must be an http(s) URL",
                self.endpoint
            )));
        }
        if self.interval == 0 || self.timeout == 0 {
            return Err(ConfigurationError::InvalidValue(
                "interval and timeout must be greater than zero".to_string(),
            ));
        }

        Ok(ClientSystem {
            client_id: client_id.to_string(),
            system_name: self.name,
            endpoint: self.endpoint.trim_end_matches('/').to_string(),
            interval: Duration::from_secs(self.interval),
            timeout: Duration::from_secs(self.timeout),
            retries: self.retries,
        })
    }
}

#[derive(Debug, Clone)]
struct ClientEntry {
    client: Client,
    systems: BTreeMap<String, Arc<ClientSystem>>,
}

/// Registry contents, exposed read-only through [`Registry::read`]
#[derive(Debug, Default)]
pub struct RegistryState {
    clients: BTreeMap<ClientId, ClientEntry>,
    thresholds: BTreeMap<ThresholdId, Arc<AlertThreshold>>,
    next_threshold_id: ThresholdId,
}

impl RegistryState {
    /// Whether `key` names a registered system of an active client
    pub fn has_system(&self, key: &SystemKey) -> bool {
        self.clients
            .get(&key.client_id)
            .is_some_and(|entry| entry.client.active && entry.systems.contains_key(&key.system_name))
    }

    pub fn is_active_client(&self, client_id: &str) -> bool {
        self.clients
            .get(client_id)
            .is_some_and(|entry| entry.client.active)
    }
}

/// Shared registry of clients, systems and thresholds
#[derive(Debug)]
pub struct Registry {
    state: RwLock<RegistryState>,
    default_suppression: Duration,
}

impl Registry {
    pub fn new(default_suppression: Duration) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                next_threshold_id: 1,
                ..Default::default()
            }),
            default_suppression,
        }
    }

    /// Acquire a read guard
    ///
    /// Holding the guard blocks deregistration, which lets the recorder append a
    /// sample atomically with respect to removal of its system.
    pub async fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().await
    }

    // ------------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------------

    /// Register a client or update the metadata of an existing one
    ///
    /// Systems and the active flag of an existing client are kept.
    #[instrument(skip(self, client), fields(client = %client.client_id))]
    pub async fn register_client(&self, client: Client) -> Result<(), ConfigurationError> {
        if client.client_id.trim().is_empty() || client.client_id == "*" {
            return Err(ConfigurationError::InvalidValue(format!(
                "'{}' is not a valid client id",
                client.client_id
            )));
        }

        let mut state = self.state.write().await;
        match state.clients.get_mut(&client.client_id) {
            Some(entry) => {
                debug!("updating client metadata");
                let active = entry.client.active;
                entry.client = Client { active, ..client };
            }
            None => {
                info!("registering client");
                state.clients.insert(
                    client.client_id.clone(),
                    ClientEntry {
                        client,
                        systems: BTreeMap::new(),
                    },
                );
            }
        }
        Ok(())
    }

    /// Mark a client inactive; its history is kept but it is neither polled nor evaluated
    pub async fn deactivate_client(&self, client_id: &str) -> Result<(), ConfigurationError> {
        self.set_client_active(client_id, false).await?;
        info!("deactivated client {client_id}");
        Ok(())
    }

    pub async fn activate_client(&self, client_id: &str) -> Result<(), ConfigurationError> {
        self.set_client_active(client_id, true).await?;
        info!("activated client {client_id}");
        Ok(())
    }

    async fn set_client_active(&self, client_id: &str, active: bool) -> Result<(), ConfigurationError> {
        let mut state = self.state.write().await;
        let entry = state
            .clients
            .get_mut(client_id)
            .ok_or_else(|| ConfigurationError::UnknownClient(client_id.to_string()))?;
        entry.client.active = active;
        Ok(())
    }

    /// Remove a client, its systems, and deactivate thresholds scoped to it
    pub async fn deregister_client(&self, client_id: &str) -> Result<Client, ConfigurationError> {
        let mut state = self.state.write().await;
        let entry = state
            .clients
            .remove(client_id)
            .ok_or_else(|| ConfigurationError::UnknownClient(client_id.to_string()))?;

        for threshold in state.thresholds.values_mut() {
            if threshold.scope == ThresholdScope::Specific(client_id.to_string()) && threshold.active
            {
                let mut replaced = (**threshold).clone();
                replaced.active = false;
                *threshold = Arc::new(replaced);
            }
        }

        info!("deregistered client {client_id}");
        Ok(entry.client)
    }

    pub async fn client(&self, client_id: &str) -> Option<Client> {
        let state = self.state.read().await;
        state.clients.get(client_id).map(|entry| entry.client.clone())
    }

    pub async fn clients(&self) -> Vec<Client> {
        let state = self.state.read().await;
        state.clients.values().map(|e| e.client.clone()).collect()
    }

    pub async fn active_clients(&self) -> Vec<Client> {
        let state = self.state.read().await;
        state
            .clients
            .values()
            .filter(|e| e.client.active)
            .map(|e| e.client.clone())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Systems
    // ------------------------------------------------------------------------

    /// Register a system, replacing any existing system of the same name
    #[instrument(skip(self, system), fields(system = %system.key()))]
    pub async fn register_system(&self, system: ClientSystem) -> Result<(), ConfigurationError> {
        let mut state = self.state.write().await;
        let entry = state
            .clients
            .get_mut(&system.client_id)
            .ok_or_else(|| ConfigurationError::UnknownClient(system.client_id.clone()))?;

        let replaced = entry
            .systems
            .insert(system.system_name.clone(), Arc::new(system))
            .is_some();
        debug!(replaced, "system registered");
        Ok(())
    }

    pub async fn deregister_system(&self, key: &SystemKey) -> Result<(), ConfigurationError> {
        let mut state = self.state.write().await;
        let removed = state
            .clients
            .get_mut(&key.client_id)
            .and_then(|entry| entry.systems.remove(&key.system_name));

        match removed {
            Some(_) => {
                info!("deregistered system {key}");
                Ok(())
            }
            None => Err(ConfigurationError::UnknownSystem(key.to_string())),
        }
    }

    /// Snapshot of every system belonging to an active client
    pub async fn systems(&self) -> Vec<Arc<ClientSystem>> {
        let state = self.state.read().await;
        state
            .clients
            .values()
            .filter(|e| e.client.active)
            .flat_map(|e| e.systems.values().cloned())
            .collect()
    }

    pub async fn systems_of(&self, client_id: &str) -> Vec<Arc<ClientSystem>> {
        let state = self.state.read().await;
        state
            .clients
            .get(client_id)
            .map(|e| e.systems.values().cloned().collect())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Thresholds
    // ------------------------------------------------------------------------

    fn validate(
        &self,
        state: &RegistryState,
        spec: &ThresholdSpec,
        id: ThresholdId,
    ) -> Result<AlertThreshold, ConfigurationError> {
        let metric: MetricName = spec.metric.parse()?;
        let comparison: Comparison = spec.comparison.parse()?;
        let channel: NotificationChannel = spec.channel.parse()?;
        let scope = ThresholdScope::parse(&spec.client)?;

        if !spec.value.is_finite() {
            return Err(ConfigurationError::InvalidValue(format!(
                "threshold value must be finite, got {}",
                spec.value
            )));
        }

        if let ThresholdScope::Specific(client_id) = &scope {
            if !state.clients.contains_key(client_id) {
                return Err(ConfigurationError::UnknownClient(client_id.clone()));
            }
        }

        let suppression_window = spec
            .suppression_minutes
            .map(|minutes| Duration::from_secs(minutes * 60))
            .unwrap_or(self.default_suppression);

        Ok(AlertThreshold {
            id,
            scope,
            metric,
            comparison,
            value: spec.value,
            channel,
            suppression_window,
            active: true,
        })
    }

    /// Validate and add a threshold to the active set
    #[instrument(skip(self))]
    pub async fn create_threshold(
        &self,
        spec: &ThresholdSpec,
    ) -> Result<Arc<AlertThreshold>, ConfigurationError> {
        let mut state = self.state.write().await;
        let id = state.next_threshold_id;
        let threshold = Arc::new(self.validate(&state, spec, id)?);

        state.next_threshold_id += 1;
        state.thresholds.insert(id, threshold.clone());
        info!(
            "created threshold {id}: {} {} {} {}",
            threshold.scope,
            threshold.metric,
            threshold.comparison.as_str(),
            threshold.value
        );
        Ok(threshold)
    }

    /// Replace a threshold definition wholesale, keeping its id
    #[instrument(skip(self))]
    pub async fn edit_threshold(
        &self,
        id: ThresholdId,
        spec: &ThresholdSpec,
    ) -> Result<Arc<AlertThreshold>, ConfigurationError> {
        let mut state = self.state.write().await;
        if !state.thresholds.contains_key(&id) {
            return Err(ConfigurationError::UnknownThreshold(id));
        }
        let threshold = Arc::new(self.validate(&state, spec, id)?);
        state.thresholds.insert(id, threshold.clone());
        info!("edited threshold {id}");
        Ok(threshold)
    }

    pub async fn deactivate_threshold(
        &self,
        id: ThresholdId,
    ) -> Result<Arc<AlertThreshold>, ConfigurationError> {
        let mut state = self.state.write().await;
        let current = state
            .thresholds
            .get(&id)
            .ok_or(ConfigurationError::UnknownThreshold(id))?;

        let mut replaced = (**current).clone();
        replaced.active = false;
        let replaced = Arc::new(replaced);
        state.thresholds.insert(id, replaced.clone());
        info!("deactivated threshold {id}");
        Ok(replaced)
    }

    /// Re-insert a threshold loaded from persistence, keeping its id
    pub async fn restore_threshold(&self, threshold: AlertThreshold) {
        let mut state = self.state.write().await;
        state.next_threshold_id = state.next_threshold_id.max(threshold.id + 1);
        state.thresholds.insert(threshold.id, Arc::new(threshold));
    }

    pub async fn threshold(&self, id: ThresholdId) -> Option<Arc<AlertThreshold>> {
        self.state.read().await.thresholds.get(&id).cloned()
    }

    pub async fn thresholds(&self) -> Vec<Arc<AlertThreshold>> {
        self.state.read().await.thresholds.values().cloned().collect()
    }

    /// Stable snapshot of the active thresholds
    pub async fn active_thresholds(&self) -> Vec<Arc<AlertThreshold>> {
        self.state
            .read()
            .await
            .thresholds
            .values()
            .filter(|t| t.active)
            .cloned()
            .collect()
    }

    /// Clients a threshold applies to right now
    pub async fn resolve_scope(&self, scope: &ThresholdScope) -> Vec<ClientId> {
        let state = self.state.read().await;
        match scope {
            ThresholdScope::Specific(id) => {
                if state.is_active_client(id) {
                    vec![id.clone()]
                } else {
                    vec![]
                }
            }
            ThresholdScope::AllActive => state
                .clients
                .values()
                .filter(|e| e.client.active)
                .map(|e| e.client.client_id.clone())
                .collect(),
        }
    }
}
