use crate::application::market_data::price_writer::PriceWriter;
use crate::config::MAX_BACKFILL_STALENESS_DAYS;
use crate::domain::ports::QuoteProvider;
use crate::domain::repositories::PriceRepository;
use crate::domain::snapshots::HistoricalPricePoint;
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Bars are always requested in USD; `historical_data` OHLC is USD-denominated.
const BACKFILL_CURRENCY: &str = "USD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// A point newer than the staleness threshold already exists.
    UpToDate { latest: DateTime<Utc> },
    Backfilled { points: usize },
    Failed,
}

/// Fills the recent daily history of a symbol that has none.
pub struct HistoryBackfiller {
    provider: Arc<dyn QuoteProvider>,
    prices: Arc<dyn PriceRepository>,
    writer: Arc<PriceWriter>,
    metrics: Option<Metrics>,
    staleness: Duration,
    depth_days: u32,
}

impl HistoryBackfiller {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        prices: Arc<dyn PriceRepository>,
        writer: Arc<PriceWriter>,
        metrics: Option<Metrics>,
        staleness_days: i64,
        depth_days: u32,
    ) -> Self {
        Self {
            provider,
            prices,
            writer,
            metrics,
            staleness: Duration::days(staleness_days.clamp(1, MAX_BACKFILL_STALENESS_DAYS)),
            depth_days: depth_days.max(1),
        }
    }

    /// `Some(latest)` when the symbol has a point newer than the staleness
    /// threshold, `None` when it needs a backfill.
    pub async fn fresh_until(
        &self,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let latest = self
            .prices
            .latest_historical_timestamp(symbol)
            .await
            .with_context(|| format!("Failed to check history freshness for {}", symbol))?;

        Ok(latest.filter(|t| *t > now - self.staleness))
    }

    /// Fetch the last `depth_days` daily bars and upsert each one.
    pub async fn backfill(&self, symbol: &str) -> Result<usize> {
        let bars = self
            .provider
            .fetch_daily_history(symbol, BACKFILL_CURRENCY, self.depth_days)
            .await
            .with_context(|| format!("Daily history fetch failed for {}", symbol))?;

        if bars.is_empty() {
            warn!("HistoryBackfiller: provider returned no bars for {}", symbol);
            return Ok(0);
        }

        let mut written = 0;
        for bar in &bars {
            let point = HistoricalPricePoint::from_daily_bar(symbol, bar);
            match self.prices.upsert_historical_point(&point).await {
                Ok(()) => {
                    written += 1;
                    self.record(true);
                }
                Err(e) => {
                    self.record(false);
                    warn!(
                        "HistoryBackfiller: bar {} @ {} not saved: {:#}",
                        symbol, bar.time, e
                    );
                }
            }
        }

        if written > 0 {
            self.writer.refresh_aggregate(symbol).await;
        }

        info!(
            "HistoryBackfiller: {} of {} daily point(s) saved for {}",
            written,
            bars.len(),
            symbol
        );
        Ok(written)
    }

    /// Gate and backfill in one step. Errors are logged and reported as `Failed`.
    pub async fn backfill_if_stale(&self, symbol: &str, now: DateTime<Utc>) -> BackfillOutcome {
        match self.fresh_until(symbol, now).await {
            Ok(Some(latest)) => BackfillOutcome::UpToDate { latest },
            Ok(None) => self.run(symbol).await,
            Err(e) => {
                warn!("HistoryBackfiller: {:#}", e);
                BackfillOutcome::Failed
            }
        }
    }

    /// Backfill and report, logging a failure instead of returning it.
    pub async fn run(&self, symbol: &str) -> BackfillOutcome {
        match self.backfill(symbol).await {
            Ok(points) => BackfillOutcome::Backfilled { points },
            Err(e) => {
                warn!("HistoryBackfiller: {:#}", e);
                BackfillOutcome::Failed
            }
        }
    }

    fn record(&self, ok: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_write("historical_data", ok);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::{MockEndpoint, MockQuoteProvider};
    use crate::infrastructure::persistence::Database;
    use crate::infrastructure::persistence::repositories::SqlitePriceRepository;
    use rust_decimal_macros::dec;

    async fn setup(provider: MockQuoteProvider) -> (HistoryBackfiller, Arc<SqlitePriceRepository>) {
        let db = Database::in_memory().await.unwrap();
        let prices = Arc::new(SqlitePriceRepository::new(db.pool.clone()));
        let writer = Arc::new(PriceWriter::new(prices.clone(), None));
        let backfiller =
            HistoryBackfiller::new(Arc::new(provider), prices.clone(), writer, None, 7, 7);
        (backfiller, prices)
    }

    async fn seed_point(prices: &SqlitePriceRepository, symbol: &str, at: DateTime<Utc>) {
        prices
            .upsert_historical_point(&HistoricalPricePoint {
                symbol: symbol.to_string(),
                timestamp: at,
                price_usd: Some(dec!(1)),
                price_eur: None,
                price_btc: None,
                open: None,
                high: None,
                low: None,
                volume_from: None,
                volume_to: None,
                market_cap: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stale_history_is_backfilled() {
        let provider = MockQuoteProvider::new().with_price("SOL", "USD", dec!(150));
        let (backfiller, prices) = setup(provider.clone()).await;
        let now = Utc::now();
        seed_point(&prices, "SOL", now - Duration::days(10)).await;

        let outcome = backfiller.backfill_if_stale("SOL", now).await;

        assert_eq!(outcome, BackfillOutcome::Backfilled { points: 7 });
        assert_eq!(provider.history_calls(), 1);
    }

    #[tokio::test]
    async fn test_recent_history_skips_backfill() {
        let provider = MockQuoteProvider::new().with_price("SOL", "USD", dec!(150));
        let (backfiller, prices) = setup(provider.clone()).await;
        let now = Utc::now();
        seed_point(&prices, "SOL", now - Duration::days(2)).await;

        let outcome = backfiller.backfill_if_stale("SOL", now).await;

        assert!(matches!(outcome, BackfillOutcome::UpToDate { .. }));
        assert_eq!(provider.history_calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_is_reported() {
        let provider = MockQuoteProvider::new();
        provider.fail_endpoint(MockEndpoint::DailyHistory);
        let (backfiller, _) = setup(provider).await;

        assert_eq!(
            backfiller.backfill_if_stale("SOL", Utc::now()).await,
            BackfillOutcome::Failed
        );
    }

    #[tokio::test]
    async fn test_out_of_range_staleness_is_clamped() {
        let db = Database::in_memory().await.unwrap();
        let prices = Arc::new(SqlitePriceRepository::new(db.pool.clone()));
        let writer = Arc::new(PriceWriter::new(prices.clone(), None));
        let provider = MockQuoteProvider::new().with_price("SOL", "USD", dec!(150));
        let backfiller =
            HistoryBackfiller::new(Arc::new(provider), prices.clone(), writer, None, i64::MAX, 7);
        let now = Utc::now();
        seed_point(&prices, "SOL", now - Duration::days(400)).await;

        // Ten-year window: a point from last year still counts as fresh
        assert!(backfiller.fresh_until("SOL", now).await.unwrap().is_some());
    }
}
