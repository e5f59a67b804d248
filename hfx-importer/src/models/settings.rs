//! Runtime import settings
//!
//! Typed view of the `[import]` config section.

use hfx_common::config::ImportConfig;
use std::time::Duration;

/// Liveness probe policy used while waiting out a device restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Deadline for a single connect attempt
    pub timeout: Duration,
    /// Connect attempts before giving up
    pub attempts: u32,
    /// Spacing between attempts
    pub interval: Duration,
}

/// Import workflow settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSettings {
    pub default_chunk_days: u32,
    /// Deadline per protocol round trip, connect included
    pub request_timeout: Duration,
    pub probe: ProbePolicy,
    /// Protocol attempts per chunk before the chunk is skipped
    pub max_chunk_attempts: u32,
    /// Start-request wait for a cancelling job to finish
    pub conflict_grace: Duration,
    pub subscriber_queue_capacity: usize,
    pub default_user: String,
}

impl From<&ImportConfig> for ImportSettings {
    fn from(config: &ImportConfig) -> Self {
        Self {
            default_chunk_days: config.default_chunk_days,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            probe: ProbePolicy {
                timeout: Duration::from_millis(config.probe_timeout_ms),
                attempts: config.probe_attempts,
                interval: Duration::from_millis(config.probe_interval_ms),
            },
            max_chunk_attempts: config.max_chunk_attempts,
            conflict_grace: Duration::from_millis(config.conflict_grace_ms),
            subscriber_queue_capacity: config.subscriber_queue_capacity,
            default_user: config.default_user.clone(),
        }
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self::from(&ImportConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config_converts_units() {
        let config = ImportConfig {
            request_timeout_secs: 30,
            probe_timeout_ms: 250,
            probe_interval_ms: 500,
            ..ImportConfig::default()
        };
        let settings = ImportSettings::from(&config);

        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.probe.timeout, Duration::from_millis(250));
        assert_eq!(settings.probe.interval, Duration::from_millis(500));
        assert_eq!(settings.probe.attempts, 30);
    }
}
