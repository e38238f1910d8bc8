//! Repository Pattern Abstractions
//!
//! Storage contracts the engine needs. The holdings side is read-only (the
//! CRUD layer owns it); every other repository is written only by the engine.
//!
//! Each method is atomic at the row level; no method spans several symbols in
//! one transaction except `ValuationRepository::insert_snapshots`, which writes
//! one user's pass at once.

use crate::domain::snapshots::{
    CurrentPriceSnapshot, HistoricalPricePoint, Holding, MarketDominanceSample,
    PortfolioValuationSnapshot,
};
use crate::domain::types::{SupportedToken, TrackedPair};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Read access to portfolios and their holdings.
#[async_trait]
pub trait HoldingsRepository: Send + Sync {
    /// Distinct `(symbol, purchase currency)` held in non-deleted portfolios.
    /// Holdings without a purchase currency are reported in `default_currency`.
    async fn tracked_pairs(&self, default_currency: &str) -> Result<Vec<TrackedPair>>;

    /// Owners of at least one non-deleted portfolio who are not deleted themselves.
    async fn active_user_ids(&self) -> Result<Vec<i64>>;

    /// Holdings with `amount > 0` in the user's non-deleted portfolios.
    async fn holdings_for_user(&self, user_id: i64) -> Result<Vec<Holding>>;
}

#[async_trait]
pub trait PriceRepository: Send + Sync {
    /// Insert or overwrite the latest price for `(symbol, currency)`.
    async fn upsert_current_price(&self, snapshot: &CurrentPriceSnapshot) -> Result<()>;

    /// Insert or update the point keyed by `(symbol, timestamp)`. Fields that are
    /// `None` keep whatever value the row already had.
    async fn upsert_historical_point(&self, point: &HistoricalPricePoint) -> Result<()>;

    async fn latest_historical_timestamp(&self, symbol: &str) -> Result<Option<DateTime<Utc>>>;

    async fn historical_points(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoricalPricePoint>>;

    /// Latest prices for the given symbols, every currency.
    async fn current_prices_for(&self, symbols: &[String]) -> Result<Vec<CurrentPriceSnapshot>>;

    /// Recompute the per-day roll-up of `historical_data` for one symbol.
    async fn refresh_daily_aggregate(&self, symbol: &str) -> Result<()>;
}

#[async_trait]
pub trait DominanceRepository: Send + Sync {
    /// Timestamp of the most recent sample across all symbols.
    async fn latest_sample_time(&self) -> Result<Option<DateTime<Utc>>>;

    async fn upsert_sample(&self, sample: &MarketDominanceSample) -> Result<()>;

    async fn samples_for_date(&self, date: NaiveDate) -> Result<Vec<MarketDominanceSample>>;
}

#[async_trait]
pub trait ValuationRepository: Send + Sync {
    /// Append snapshots; never updates existing rows.
    async fn insert_snapshots(&self, snapshots: &[PortfolioValuationSnapshot]) -> Result<()>;

    async fn latest_for_portfolio(
        &self,
        portfolio_id: i64,
        currency: &str,
    ) -> Result<Option<PortfolioValuationSnapshot>>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Insert tokens that are not known yet. Returns the number of new rows.
    async fn insert_missing(&self, tokens: &[SupportedToken]) -> Result<u64>;

    async fn count(&self) -> Result<usize>;
}
