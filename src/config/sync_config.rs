//! Refresh, valuation and admission policy parsing from environment variables.

use super::{env_or, parse_symbol_list};
use std::env;

/// Hard provider limit on symbols per quote request.
pub const MAX_QUOTE_BATCH_SIZE: usize = 100;

/// Upper bound of the admission backfill gate, ten years.
pub const MAX_BACKFILL_STALENESS_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct SyncEnvConfig {
    pub sync_interval_secs: u64,
    pub valuation_interval_secs: u64,
    pub pair_poll_interval_secs: u64,
    pub quote_batch_size: usize,
    pub baseline_symbol: String,
    pub baseline_currency: String,
    pub base_currencies: Vec<String>,
    pub dominance_top_n: usize,
    pub backfill_staleness_days: i64,
    pub backfill_depth_days: u32,
    pub token_catalog_enabled: bool,
}

impl Default for SyncEnvConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 450,
            valuation_interval_secs: 300,
            pair_poll_interval_secs: 300,
            quote_batch_size: MAX_QUOTE_BATCH_SIZE,
            baseline_symbol: "BTC".to_string(),
            baseline_currency: "USD".to_string(),
            base_currencies: vec!["USD".to_string(), "EUR".to_string()],
            dominance_top_n: 10,
            backfill_staleness_days: 7,
            backfill_depth_days: 7,
            token_catalog_enabled: true,
        }
    }
}

impl SyncEnvConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_currencies = env::var("BASE_CURRENCIES")
            .map(|raw| parse_symbol_list(&raw))
            .ok()
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.base_currencies);

        Self {
            sync_interval_secs: env_or("SYNC_INTERVAL_SECS", defaults.sync_interval_secs).max(1),
            valuation_interval_secs: env_or(
                "VALUATION_INTERVAL_SECS",
                defaults.valuation_interval_secs,
            )
            .max(1),
            pair_poll_interval_secs: env_or(
                "PAIR_POLL_INTERVAL_SECS",
                defaults.pair_poll_interval_secs,
            )
            .max(1),
            quote_batch_size: env_or("QUOTE_BATCH_SIZE", defaults.quote_batch_size)
                .clamp(1, MAX_QUOTE_BATCH_SIZE),
            baseline_symbol: env::var("BASELINE_SYMBOL")
                .map(|s| s.trim().to_uppercase())
                .unwrap_or(defaults.baseline_symbol),
            baseline_currency: env::var("BASELINE_CURRENCY")
                .map(|s| s.trim().to_uppercase())
                .unwrap_or(defaults.baseline_currency),
            base_currencies,
            dominance_top_n: env_or("DOMINANCE_TOP_N", defaults.dominance_top_n).max(1),
            backfill_staleness_days: env_or(
                "BACKFILL_STALENESS_DAYS",
                defaults.backfill_staleness_days,
            )
            .clamp(1, MAX_BACKFILL_STALENESS_DAYS),
            backfill_depth_days: env_or("BACKFILL_DEPTH_DAYS", defaults.backfill_depth_days),
            token_catalog_enabled: env_or("TOKEN_CATALOG_ENABLED", defaults.token_catalog_enabled),
        }
    }
}
