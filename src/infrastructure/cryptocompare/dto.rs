//! Wire shapes of the provider responses and their conversion into domain types.

use crate::domain::types::{CurrencyQuotes, DailyBar, QuoteBook, QuoteFields, SupportedToken, TopAsset};
use chrono::DateTime;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use std::collections::HashMap;

pub(crate) fn to_decimal(value: Option<f64>) -> Option<Decimal> {
    value.and_then(Decimal::from_f64)
}

/// `Response`/`Message` envelope CryptoCompare attaches to errors (often with HTTP 200).
#[derive(Debug, Default, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Response")]
    pub response: Option<String>,
    #[serde(rename = "Message")]
    pub message: Option<String>,
}

impl Envelope {
    pub fn error_message(&self) -> Option<String> {
        match self.response.as_deref() {
            Some("Error") => Some(
                self.message
                    .clone()
                    .unwrap_or_else(|| "unspecified provider error".to_string()),
            ),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawQuote {
    #[serde(rename = "PRICE")]
    pub price: Option<f64>,
    #[serde(rename = "OPENHOUR")]
    pub open_hour: Option<f64>,
    #[serde(rename = "HIGHHOUR")]
    pub high_hour: Option<f64>,
    #[serde(rename = "LOWHOUR")]
    pub low_hour: Option<f64>,
    #[serde(rename = "VOLUMEHOUR")]
    pub volume_hour: Option<f64>,
    #[serde(rename = "VOLUMEHOURTO")]
    pub volume_hour_to: Option<f64>,
    #[serde(rename = "MKTCAP")]
    pub market_cap: Option<f64>,
}

impl RawQuote {
    /// `None` when the provider sent no usable price.
    pub fn into_fields(self) -> Option<QuoteFields> {
        let price = to_decimal(self.price)?;
        Some(QuoteFields {
            price,
            open: to_decimal(self.open_hour),
            high: to_decimal(self.high_hour),
            low: to_decimal(self.low_hour),
            volume_from: to_decimal(self.volume_hour),
            volume_to: to_decimal(self.volume_hour_to),
            market_cap: to_decimal(self.market_cap),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PriceMultiFullResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(rename = "RAW", default)]
    pub raw: HashMap<String, HashMap<String, RawQuote>>,
}

impl PriceMultiFullResponse {
    pub fn into_book(self) -> QuoteBook {
        let mut book = QuoteBook::new();
        for (symbol, by_currency) in self.raw {
            let quotes: CurrencyQuotes = by_currency
                .into_iter()
                .filter_map(|(currency, raw)| {
                    raw.into_fields()
                        .map(|fields| (currency.to_uppercase(), fields))
                })
                .collect();
            if !quotes.is_empty() {
                book.insert(symbol.to_uppercase(), quotes);
            }
        }
        book
    }
}

#[derive(Debug, Deserialize)]
pub struct CoinInfo {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TopRawUsd {
    #[serde(rename = "MKTCAP")]
    pub market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct TopEntry {
    #[serde(rename = "CoinInfo")]
    pub coin_info: CoinInfo,
    #[serde(rename = "RAW")]
    pub raw: Option<HashMap<String, TopRawUsd>>,
}

#[derive(Debug, Deserialize)]
pub struct TopMarketCapResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(rename = "Data", default)]
    pub data: Vec<TopEntry>,
}

impl TopMarketCapResponse {
    /// Ranked assets; entries without a positive USD market cap are dropped.
    pub fn into_assets(self) -> Vec<TopAsset> {
        self.data
            .into_iter()
            .filter_map(|entry| {
                let cap = entry
                    .raw
                    .as_ref()
                    .and_then(|raw| raw.get("USD"))
                    .and_then(|usd| to_decimal(usd.market_cap))?;
                (cap > Decimal::ZERO).then(|| TopAsset {
                    symbol: entry.coin_info.name.to_uppercase(),
                    market_cap_usd: cap,
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct MarketCapByCurrency {
    pub usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct GlobalData {
    pub total_market_cap: Option<MarketCapByCurrency>,
}

/// Accepts both `{data: {total_market_cap: {usd}}}` and `{total_market_cap: {usd}}`.
#[derive(Debug, Deserialize)]
pub struct GlobalResponse {
    pub data: Option<GlobalData>,
    pub total_market_cap: Option<MarketCapByCurrency>,
}

impl GlobalResponse {
    pub fn total_usd(&self) -> Option<Decimal> {
        let cap = self
            .data
            .as_ref()
            .and_then(|d| d.total_market_cap.as_ref())
            .or(self.total_market_cap.as_ref())?;
        to_decimal(cap.usd)
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoDayBar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volumefrom: f64,
    pub volumeto: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoDayData {
    #[serde(rename = "Data", default)]
    pub data: Vec<HistoDayBar>,
}

#[derive(Debug, Deserialize)]
pub struct HistoDayResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(rename = "Data", default)]
    pub data: HistoDayData,
}

impl HistoDayResponse {
    /// Bars in chronological order; the provider pads pre-listing days with zeros,
    /// which are dropped.
    pub fn into_bars(self) -> Vec<DailyBar> {
        let mut bars: Vec<DailyBar> = self
            .data
            .data
            .into_iter()
            .filter(|bar| bar.close > 0.0)
            .filter_map(|bar| {
                Some(DailyBar {
                    time: DateTime::from_timestamp(bar.time, 0)?,
                    open: Decimal::from_f64(bar.open)?,
                    high: Decimal::from_f64(bar.high)?,
                    low: Decimal::from_f64(bar.low)?,
                    close: Decimal::from_f64(bar.close)?,
                    volume_from: Decimal::from_f64(bar.volumefrom).unwrap_or_default(),
                    volume_to: Decimal::from_f64(bar.volumeto).unwrap_or_default(),
                })
            })
            .collect();
        bars.sort_by_key(|bar| bar.time);
        bars
    }
}

#[derive(Debug, Deserialize)]
pub struct CoinListEntry {
    #[serde(rename = "Symbol", default)]
    pub symbol: String,
    #[serde(rename = "FullName", default)]
    pub full_name: String,
    #[serde(rename = "CoinName", default)]
    pub coin_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CoinListResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(rename = "Data", default)]
    pub data: HashMap<String, CoinListEntry>,
}

impl CoinListResponse {
    pub fn into_tokens(self) -> Vec<SupportedToken> {
        let mut tokens: Vec<SupportedToken> = self
            .data
            .into_values()
            .filter(|entry| !entry.symbol.trim().is_empty())
            .map(|entry| SupportedToken {
                symbol: entry.symbol.trim().to_uppercase(),
                full_name: entry.full_name,
                coin_name: entry.coin_name,
            })
            .collect();
        tokens.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        tokens
    }
}
