//! Configuration module for folio-sync.
//!
//! This module provides structured configuration loading from environment variables,
//! organized by domain: Provider, Sync and Observability.

mod observability_config;
mod provider_config;
mod sync_config;

pub use observability_config::ObservabilityEnvConfig;
pub use provider_config::ProviderEnvConfig;
pub use sync_config::{MAX_BACKFILL_STALENESS_DAYS, MAX_QUOTE_BATCH_SIZE, SyncEnvConfig};

use anyhow::Result;
use std::env;
use std::str::FromStr;

/// Where quotes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Mock,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(Mode::Live),
            "mock" => Ok(Mode::Mock),
            _ => anyhow::bail!("Invalid MODE: {}. Must be 'live' or 'mock'", s),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub database_url: String,
    pub provider: ProviderEnvConfig,
    pub sync: SyncEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let mode_str = env::var("MODE").unwrap_or_else(|_| "live".to_string());
        let mode = Mode::from_str(&mode_str)?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://tracker.db".to_string());

        Ok(Self {
            mode,
            database_url,
            provider: ProviderEnvConfig::from_env(),
            sync: SyncEnvConfig::from_env(),
            observability: ObservabilityEnvConfig::from_env(),
        })
    }
}

/// Parse an environment variable, falling back to `default` when it is unset
/// or malformed.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Comma-separated list, upper-cased, empty entries dropped.
pub(crate) fn parse_symbol_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in raw.split(',') {
        let item = item.trim().to_uppercase();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
