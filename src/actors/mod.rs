//! Actor-based monitoring engine
//!
//! Each long-running component runs as an independent async task and is driven
//! through a cloneable handle holding its command channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!                     ┌─────────────────┐
//!                     │   Hub (main)    │
//!                     └────────┬────────┘
//!                              │ spawns
//!        ┌─────────────────────┼──────────────────────┐
//!        │                     │                      │
//! ┌──────▼───────┐     ┌───────▼────────┐     ┌───────▼───────┐
//! │PollScheduler │     │   Evaluator    │     │   Reporter    │
//! │ └ pollers    │     │ (own cadence)  │     │ (own cadence) │
//! └──────┬───────┘     └───┬────────┬───┘     └───────────────┘
//!        │ Sample (mpsc)   │ reads  │ AlertEvent
//! ┌──────▼───────┐         │  ┌─────▼────────┐
//! │   Recorder   ├─► Aggregator  │  Dispatcher  ├─► Notifier
//! └──────┬───────┘            └──────────────┘
//!        ▼
//!      Store
//! ```
//!
//! ## Actor Types
//!
//! - **PollScheduler / SystemPoller**: one timer per client system
//! - **RecorderActor**: persists samples and feeds the aggregator
//! - **ThresholdEvaluator**: compares aggregates with active thresholds
//! - **AlertDispatcher**: suppression and bounded delivery (not an actor, shared)
//! - **ReporterActor**: composes and saves periodic reports
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control messages
//! 2. **Samples**: pollers send to the recorder over one mpsc channel
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod dispatcher;
pub mod evaluator;
pub mod messages;
pub mod recorder;
pub mod reporter;
pub mod scheduler;
