use crate::domain::ports::QuoteProvider;
use crate::domain::repositories::DominanceRepository;
use crate::domain::snapshots::MarketDominanceSample;
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DominanceOutcome {
    /// A sample already exists for today (UTC).
    AlreadySampled,
    /// Global cap or the ranking was unavailable; retried next cycle.
    Skipped,
    Sampled { assets: usize },
}

/// Daily market-dominance sampling for the top assets.
pub struct DominanceSampler {
    provider: Arc<dyn QuoteProvider>,
    repository: Arc<dyn DominanceRepository>,
    metrics: Option<Metrics>,
    top_n: usize,
}

impl DominanceSampler {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        repository: Arc<dyn DominanceRepository>,
        metrics: Option<Metrics>,
        top_n: usize,
    ) -> Self {
        Self {
            provider,
            repository,
            metrics,
            top_n: top_n.max(1),
        }
    }

    /// Sample once per UTC day. Only a store error is returned; provider
    /// failures skip the pass.
    pub async fn run_if_due(&self, now: DateTime<Utc>) -> Result<DominanceOutcome> {
        let latest = self
            .repository
            .latest_sample_time()
            .await
            .context("Failed to read latest dominance sample")?;

        if latest.is_some_and(|t| t.date_naive() == now.date_naive()) {
            return Ok(DominanceOutcome::AlreadySampled);
        }

        let global_cap = match self.provider.fetch_global_market_cap_usd().await {
            Ok(cap) if cap > Decimal::ZERO => cap,
            Ok(_) => {
                warn!("DominanceSampler: global market cap is zero, skipping");
                return Ok(DominanceOutcome::Skipped);
            }
            Err(e) => {
                warn!("DominanceSampler: {}, skipping", e);
                return Ok(DominanceOutcome::Skipped);
            }
        };

        let assets = match self.provider.fetch_top_assets(self.top_n).await {
            Ok(assets) => assets,
            Err(e) => {
                warn!("DominanceSampler: {}, skipping", e);
                return Ok(DominanceOutcome::Skipped);
            }
        };

        let mut written = 0;
        for asset in assets {
            let sample = MarketDominanceSample {
                dominance_percentage: asset.market_cap_usd / global_cap * Decimal::ONE_HUNDRED,
                symbol: asset.symbol,
                sampled_at: now,
                market_cap_usd: asset.market_cap_usd,
            };

            match self.repository.upsert_sample(&sample).await {
                Ok(()) => {
                    written += 1;
                    self.record(true);
                }
                Err(e) => {
                    self.record(false);
                    warn!(
                        "DominanceSampler: sample {} for {} not saved: {:#}",
                        sample.symbol,
                        sample.sample_date(),
                        e
                    );
                }
            }
        }

        info!(
            "DominanceSampler: {} sample(s) for {} (global cap {} USD)",
            written,
            now.date_naive(),
            global_cap
        );
        Ok(DominanceOutcome::Sampled { assets: written })
    }

    fn record(&self, ok: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_write("market_dominance", ok);
        }
    }
}
