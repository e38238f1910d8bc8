//! Metrics reporter settings.

use super::env_or;

#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    /// Whether the reporter task is spawned at all
    pub enabled: bool,
    /// Seconds between two JSON metric lines
    pub interval_secs: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_or("OBSERVABILITY_ENABLED", defaults.enabled),
            interval_secs: env_or("OBSERVABILITY_INTERVAL", defaults.interval_secs).max(1),
        }
    }
}
