use crate::domain::repositories::PriceRepository;
use crate::domain::snapshots::{CurrentPriceSnapshot, HistoricalPricePoint};
use crate::domain::types::CurrencyQuotes;
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What a single `persist` call managed to write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub current_written: usize,
    pub current_failed: usize,
    pub history_written: bool,
    pub history_failed: bool,
}

/// Writes one symbol's quotes to `current_prices` and `historical_data`.
///
/// Every row is its own unit of work: a failed row is logged and counted, and
/// the remaining rows are still attempted. Repeating a call with the same
/// timestamp and quotes leaves the store unchanged.
pub struct PriceWriter {
    prices: Arc<dyn PriceRepository>,
    metrics: Option<Metrics>,
}

impl PriceWriter {
    pub fn new(prices: Arc<dyn PriceRepository>, metrics: Option<Metrics>) -> Self {
        Self { prices, metrics }
    }

    pub async fn persist(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
        quotes: &CurrencyQuotes,
    ) -> PersistOutcome {
        let mut outcome = PersistOutcome::default();

        // Sorted for stable write order
        let mut currencies: Vec<&String> = quotes.keys().collect();
        currencies.sort();

        for currency in currencies {
            let quote = &quotes[currency];
            let snapshot = CurrentPriceSnapshot {
                symbol: symbol.to_string(),
                currency: currency.clone(),
                price: quote.price,
                last_updated: timestamp,
            };

            match self.prices.upsert_current_price(&snapshot).await {
                Ok(()) => {
                    outcome.current_written += 1;
                    self.record("current_prices", true);
                }
                Err(e) => {
                    outcome.current_failed += 1;
                    self.record("current_prices", false);
                    error!(
                        "PriceWriter: current price {}/{} @ {} not saved: {:#}",
                        symbol, currency, timestamp, e
                    );
                }
            }
        }

        let Some(point) = HistoricalPricePoint::from_quotes(symbol, timestamp, quotes) else {
            debug!(
                "PriceWriter: no USD/EUR/BTC price for {} @ {}, history skipped",
                symbol, timestamp
            );
            return outcome;
        };

        match self.prices.upsert_historical_point(&point).await {
            Ok(()) => {
                outcome.history_written = true;
                self.record("historical_data", true);
                self.refresh_aggregate(symbol).await;
            }
            Err(e) => {
                outcome.history_failed = true;
                self.record("historical_data", false);
                error!(
                    "PriceWriter: historical point {} @ {} not saved: {:#}",
                    symbol, timestamp, e
                );
            }
        }

        outcome
    }

    /// Recompute the daily roll-up; failures never affect the price write.
    pub async fn refresh_aggregate(&self, symbol: &str) {
        match self.prices.refresh_daily_aggregate(symbol).await {
            Ok(()) => self.record("aggregated_data", true),
            Err(e) => {
                self.record("aggregated_data", false);
                warn!("PriceWriter: daily aggregate for {} not refreshed: {:#}", symbol, e);
            }
        }
    }

    fn record(&self, table: &str, ok: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_write(table, ok);
        }
    }
}
