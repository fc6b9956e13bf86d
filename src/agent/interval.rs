//! Adaptive check interval
//!
//! Idle agents back off exponentially up to a cap, and higher-weight agents
//! run more often. The result is always clamped into the agent's bounds.

use serde::{Deserialize, Serialize};

/// Default lower clamp, seconds
pub const MIN_INTERVAL_SECS: f64 = 60.0;

/// Default upper clamp, seconds
pub const MAX_INTERVAL_SECS: f64 = 3600.0;

/// Idle cycles beyond this no longer grow the backoff
pub const MAX_BACKOFF_STEPS: u32 = 5;

pub const BACKOFF_BASE: f64 = 1.5;

/// Cap on the idle multiplier
pub const MAX_ACTIVITY_MULTIPLIER: f64 = 10.0;

/// Interval clamp in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalBounds {
    pub min: f64,
    pub max: f64,
}

impl IntervalBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamp `secs` into the bounds; NaN maps to `max`
    pub fn clamp(&self, secs: f64) -> f64 {
        if secs.is_nan() {
            return self.max;
        }
        // Not f64::clamp: that panics when min > max
        secs.max(self.min).min(self.max)
    }
}

impl Default for IntervalBounds {
    fn default() -> Self {
        Self::new(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS)
    }
}

/// Idle backoff factor for a run of cycles without changes
pub fn activity_multiplier(consecutive_no_changes: u32) -> f64 {
    if consecutive_no_changes == 0 {
        return 1.0;
    }
    let steps = consecutive_no_changes.min(MAX_BACKOFF_STEPS) as i32;
    BACKOFF_BASE.powi(steps).min(MAX_ACTIVITY_MULTIPLIER)
}

/// Seconds until an agent's next cycle
///
/// `weight_factor = 2 - weight` maps weight in [0, 1] onto [1, 2], so a
/// weight of 1 runs at the base rate and a weight of 0 at half of it. Weight
/// outside [0, 1] is clamped first; NaN counts as 0.
pub fn calculate_dynamic_interval(
    base_interval: f64,
    consecutive_no_changes: u32,
    effective_weight: f64,
    bounds: IntervalBounds,
) -> f64 {
    let weight = if effective_weight.is_nan() {
        0.0
    } else {
        effective_weight.clamp(0.0, 1.0)
    };
    let weight_factor = 2.0 - weight;
    let interval = base_interval * activity_multiplier(consecutive_no_changes) * weight_factor;
    bounds.clamp(interval)
}
