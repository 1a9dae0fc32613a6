//! Message types for actor communication
//!
//! 1. **Commands**: request/response messages sent to one actor via mpsc
//! 2. **Replies**: delivered through a oneshot channel carried in the command
//!
//! Samples themselves travel from the pollers to the recorder over a plain
//! mpsc channel of [`Sample`](crate::model::Sample), so none are dropped under
//! load the way a lagging broadcast subscriber would drop them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::model::{ClientSystem, HealthStatus, SystemKey};

/// Commands that can be sent to a single system poller
#[derive(Debug)]
pub enum PollerCommand {
    /// Run one poll cycle immediately, bypassing the timer
    PollNow {
        respond_to: oneshot::Sender<PollOutcome>,
    },

    /// Swap in a new system definition; takes effect on the next cycle
    Replace(Arc<ClientSystem>),

    /// Stop after the poll in flight (if any) has finished
    Shutdown,
}

/// What one poll cycle produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollOutcome {
    pub status: HealthStatus,

    /// Whether a metrics sample (data or zero activity) was emitted
    pub metrics_recorded: bool,
}

/// Commands that can be sent to the poll scheduler
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Align pollers with the registry now
    Reconcile {
        respond_to: oneshot::Sender<ReconcileSummary>,
    },

    /// Poll one system immediately
    PollNow {
        key: SystemKey,
        respond_to: oneshot::Sender<Option<PollOutcome>>,
    },

    /// Keys of the running pollers
    ListPollers {
        respond_to: oneshot::Sender<Vec<SystemKey>>,
    },

    /// Cancel timers, let in-flight probes drain, then exit
    Stop { respond_to: oneshot::Sender<()> },
}

/// Changes applied by one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileSummary {
    pub spawned: usize,
    pub replaced: usize,
    pub retired: usize,
}

/// Commands that can be sent to the recorder
#[derive(Debug)]
pub enum RecorderCommand {
    /// Record every sample already queued, replying with how many were handled
    Drain {
        respond_to: oneshot::Sender<usize>,
    },

    /// Run retention cleanup now
    Cleanup {
        respond_to: oneshot::Sender<usize>,
    },

    GetStats {
        respond_to: oneshot::Sender<RecorderStats>,
    },

    Shutdown,
}

/// Recorder statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecorderStats {
    pub recorded: u64,

    /// Samples of systems that were removed while their probe was in flight
    pub discarded: u64,

    pub store_failures: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub total_deleted: u64,
}

/// Commands that can be sent to the threshold evaluator
#[derive(Debug)]
pub enum EvaluatorCommand {
    /// Run one evaluation cycle, at `at` or now
    EvaluateNow {
        at: Option<DateTime<Utc>>,
        respond_to: oneshot::Sender<CycleSummary>,
    },

    Shutdown,
}

/// Result of one evaluation cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    pub evaluated_at: Option<DateTime<Utc>>,
    pub thresholds: usize,
    pub checks: usize,
    pub fired: usize,
    pub dispatched: usize,
    pub suppressed: usize,
}

/// Commands that can be sent to the reporter
#[derive(Debug)]
pub enum ReporterCommand {
    /// Compose and save reports for every active client now
    ComposeNow {
        respond_to: oneshot::Sender<usize>,
    },

    Shutdown,
}
