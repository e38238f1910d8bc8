use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A `(symbol, currency)` combination held by at least one active portfolio.
///
/// Both parts are upper-cased on construction so that `btc/usd` and `BTC/USD`
/// collapse into the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackedPair {
    pub symbol: String,
    pub currency: String,
}

impl TrackedPair {
    pub fn new(symbol: impl AsRef<str>, currency: impl AsRef<str>) -> Self {
        Self {
            symbol: normalize_symbol(symbol.as_ref()),
            currency: normalize_symbol(currency.as_ref()),
        }
    }

    /// Registry key of the polling handle for this pair (`SYMBOL-CURRENCY`).
    pub fn key(&self) -> String {
        format!("{}-{}", self.symbol, self.currency)
    }
}

impl fmt::Display for TrackedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.currency)
    }
}

pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Quote for one symbol in one currency.
///
/// Only `price` is guaranteed; the hourly OHLC, volume and market cap fields are
/// filled when the provider reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteFields {
    pub price: Decimal,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume_from: Option<Decimal>,
    pub volume_to: Option<Decimal>,
    pub market_cap: Option<Decimal>,
}

impl QuoteFields {
    pub fn price_only(price: Decimal) -> Self {
        Self {
            price,
            open: None,
            high: None,
            low: None,
            volume_from: None,
            volume_to: None,
            market_cap: None,
        }
    }
}

/// Quotes keyed by currency for a single symbol.
pub type CurrencyQuotes = HashMap<String, QuoteFields>;

/// Provider response: symbol -> currency -> quote.
pub type QuoteBook = HashMap<String, CurrencyQuotes>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopAsset {
    pub symbol: String,
    pub market_cap_usd: Decimal,
}

/// One daily bar from the provider's historical endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume_from: Decimal,
    pub volume_to: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedToken {
    pub symbol: String,
    pub full_name: String,
    pub coin_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_tracked_pair_normalizes_case_and_whitespace() {
        let pair = TrackedPair::new(" btc", "usd ");
        assert_eq!(pair.symbol, "BTC");
        assert_eq!(pair.currency, "USD");
        assert_eq!(pair.key(), "BTC-USD");
        assert_eq!(pair.to_string(), "BTC/USD");
    }

    #[test]
    fn test_tracked_pairs_dedup_case_insensitively() {
        let pairs: BTreeSet<TrackedPair> = [
            TrackedPair::new("eth", "EUR"),
            TrackedPair::new("ETH", "eur"),
            TrackedPair::new("Eth", "Eur"),
        ]
        .into_iter()
        .collect();

        assert_eq!(pairs.len(), 1);
    }
}
