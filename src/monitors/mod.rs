//! Probing client endpoints and judging the results

pub mod evaluation;
pub mod prober;

pub use evaluation::{DEFAULT_EQUALS_EPSILON, violates};
pub use prober::{EndpointProber, MetricsPull, ProbeError};
