//! Health metrics queried during the metrics phase

use serde::Serialize;

/// One metric series requested from the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSpec {
    /// Metric name as understood by the device's `health_metrics` tool
    pub name: String,
    /// Ask the device for per-interval aggregates instead of raw samples
    pub aggregate: bool,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, aggregate: bool) -> Self {
        Self {
            name: name.into(),
            aggregate,
        }
    }
}

/// Metrics imported by every run, in query order
///
/// Cumulative quantities are aggregated; discrete samples are fetched raw.
const DEFAULT_METRICS: &[(&str, bool)] = &[
    ("step_count", true),
    ("active_energy", true),
    ("basal_energy_burned", true),
    ("walking_running_distance", true),
    ("flights_climbed", true),
    ("apple_exercise_time", true),
    ("heart_rate", false),
    ("resting_heart_rate", false),
    ("heart_rate_variability", false),
    ("respiratory_rate", false),
    ("blood_oxygen_saturation", false),
    ("body_mass", false),
    ("sleep_analysis", false),
];

/// The fixed, ordered metric list
pub fn default_metrics() -> Vec<MetricSpec> {
    DEFAULT_METRICS
        .iter()
        .map(|(name, aggregate)| MetricSpec::new(*name, *aggregate))
        .collect()
}
