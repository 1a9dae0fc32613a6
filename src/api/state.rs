//! Shared state of the API handlers

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::control::ControlSurface;
use crate::storage::MonitoringStore;

#[derive(Clone)]
pub struct ApiState {
    pub control: ControlSurface,

    /// Queried by the health check
    pub store: Arc<dyn MonitoringStore>,

    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(control: ControlSurface, store: Arc<dyn MonitoringStore>) -> Self {
        Self {
            control,
            store,
            started_at: Utc::now(),
        }
    }
}
