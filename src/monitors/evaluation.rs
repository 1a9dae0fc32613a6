//! Threshold comparison semantics
//!
//! `equals` compares with an absolute epsilon since aggregated values such as
//! success rate are floating point and rarely match a configured value exactly.

use crate::model::{AlertThreshold, Comparison};

/// Default tolerance of [`Comparison::Equals`]
pub const DEFAULT_EQUALS_EPSILON: f64 = 0.01;

impl Comparison {
    /// Whether `observed` violates `threshold` under this operator
    pub fn fires(self, observed: f64, threshold: f64, epsilon: f64) -> bool {
        if observed.is_nan() {
            return false;
        }
        match self {
            Comparison::GreaterThan => observed > threshold,
            Comparison::LessThan => observed < threshold,
            Comparison::Equals => (observed - threshold).abs() <= epsilon,
        }
    }
}

/// Evaluate a threshold against an observed value
///
/// An undefined value never fires.
pub fn violates(threshold: &AlertThreshold, observed: Option<f64>, epsilon: f64) -> bool {
    observed.is_some_and(|value| threshold.comparison.fires(value, threshold.value, epsilon))
}

/// Distance between an observed value and a threshold, in the metric's unit
///
/// Positive while the value is on the safe side. Used for proximity
/// recommendations in reports.
pub fn headroom(threshold: &AlertThreshold, observed: f64) -> Option<f64> {
    match threshold.comparison {
        Comparison::GreaterThan => Some(threshold.value - observed),
        Comparison::LessThan => Some(observed - threshold.value),
        Comparison::Equals => None,
    }
}
