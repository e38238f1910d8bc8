//! Persisted rows produced by the engine.
//!
//! The engine is the only writer of these tables; the CRUD layer reads them.

use super::types::{CurrencyQuotes, DailyBar};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest known quote, one row per `(symbol, currency)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPriceSnapshot {
    pub symbol: String,
    pub currency: String,
    pub price: Decimal,
    pub last_updated: DateTime<Utc>,
}

/// Time-series point, unique on `(symbol, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPricePoint {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price_usd: Option<Decimal>,
    pub price_eur: Option<Decimal>,
    pub price_btc: Option<Decimal>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume_from: Option<Decimal>,
    pub volume_to: Option<Decimal>,
    pub market_cap: Option<Decimal>,
}

impl HistoricalPricePoint {
    /// Builds a point from a symbol's quotes.
    ///
    /// OHLC, volume and market cap come from the USD quote. Returns `None` when
    /// none of the USD, EUR or BTC prices is present.
    pub fn from_quotes(
        symbol: &str,
        timestamp: DateTime<Utc>,
        quotes: &CurrencyQuotes,
    ) -> Option<Self> {
        let usd = quotes.get("USD");
        let price_usd = usd.map(|q| q.price);
        let price_eur = quotes.get("EUR").map(|q| q.price);
        let price_btc = quotes.get("BTC").map(|q| q.price);

        if price_usd.is_none() && price_eur.is_none() && price_btc.is_none() {
            return None;
        }

        Some(Self {
            symbol: symbol.to_string(),
            timestamp,
            price_usd,
            price_eur,
            price_btc,
            open: usd.and_then(|q| q.open),
            high: usd.and_then(|q| q.high),
            low: usd.and_then(|q| q.low),
            volume_from: usd.and_then(|q| q.volume_from),
            volume_to: usd.and_then(|q| q.volume_to),
            market_cap: usd.and_then(|q| q.market_cap),
        })
    }

    /// Converts a USD daily bar into a point keyed by the bar's open time.
    pub fn from_daily_bar(symbol: &str, bar: &DailyBar) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp: bar.time,
            price_usd: Some(bar.close),
            price_eur: None,
            price_btc: None,
            open: Some(bar.open),
            high: Some(bar.high),
            low: Some(bar.low),
            volume_from: Some(bar.volume_from),
            volume_to: Some(bar.volume_to),
            market_cap: None,
        }
    }
}

/// Value of one portfolio in one currency at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioValuationSnapshot {
    pub user_id: i64,
    pub portfolio_id: i64,
    pub value: Decimal,
    pub currency: String,
    pub last_updated: DateTime<Utc>,
}

/// Daily dominance sample, unique on `(symbol, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDominanceSample {
    pub symbol: String,
    pub sampled_at: DateTime<Utc>,
    pub market_cap_usd: Decimal,
    pub dominance_percentage: Decimal,
}

impl MarketDominanceSample {
    pub fn sample_date(&self) -> NaiveDate {
        self.sampled_at.date_naive()
    }
}

/// A holding read from the collaborator tables (amount > 0, live portfolio).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub portfolio_id: i64,
    pub symbol: String,
    pub amount: Decimal,
}
