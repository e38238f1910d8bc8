//! SQLite implementations of the domain repository traits.
//!
//! Money and quantities are stored as REAL and timestamps as unix seconds.

pub mod dominance_repository;
pub mod holdings_repository;
pub mod price_repository;
pub mod token_repository;
pub mod valuation_repository;

pub use dominance_repository::SqliteDominanceRepository;
pub use holdings_repository::SqliteHoldingsRepository;
pub use price_repository::SqlitePriceRepository;
pub use token_repository::SqliteTokenRepository;
pub use valuation_repository::SqliteValuationRepository;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

pub(crate) fn to_real(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

pub(crate) fn to_real_opt(value: Option<Decimal>) -> Option<f64> {
    value.and_then(|v| v.to_f64())
}

pub(crate) fn from_real(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

pub(crate) fn from_real_opt(value: Option<f64>) -> Option<Decimal> {
    value.and_then(Decimal::from_f64)
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
