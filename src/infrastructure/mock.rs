use crate::domain::errors::ProviderError;
use crate::domain::ports::QuoteProvider;
use crate::domain::types::{
    CurrencyQuotes, DailyBar, QuoteBook, QuoteFields, SupportedToken, TopAsset, normalize_symbol,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Provider endpoints the mock can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockEndpoint {
    Quotes,
    TopAssets,
    GlobalMarketCap,
    DailyHistory,
    CoinList,
    Probe,
}

impl MockEndpoint {
    fn name(self) -> &'static str {
        match self {
            MockEndpoint::Quotes => "pricemultifull",
            MockEndpoint::TopAssets => "top/mktcapfull",
            MockEndpoint::GlobalMarketCap => "global",
            MockEndpoint::DailyHistory => "v2/histoday",
            MockEndpoint::CoinList => "all/coinlist",
            MockEndpoint::Probe => "probe",
        }
    }
}

#[derive(Default)]
struct MockState {
    quotes: QuoteBook,
    omitted: HashSet<(String, String)>,
    failing: HashSet<MockEndpoint>,
    global_market_cap: Decimal,
    top_assets: Vec<TopAsset>,
    history: HashMap<String, Vec<DailyBar>>,
    coin_list: Vec<SupportedToken>,
}

/// Every call the mock received, in order.
#[derive(Debug, Default, Clone)]
pub struct MockCallLog {
    pub quote_batches: Vec<Vec<String>>,
    pub quote_currencies: Vec<Vec<String>>,
    pub top_asset_calls: usize,
    pub global_cap_calls: usize,
    pub history_calls: Vec<(String, String, u32)>,
    pub coin_list_calls: usize,
    pub probe_calls: usize,
}

/// Deterministic in-process market-data provider.
///
/// Used by `MODE=mock` and by the tests. Unknown symbols are absent from quote
/// responses, like the real API. Daily history for a symbol without scripted
/// bars is synthesized from its USD quote.
#[derive(Clone, Default)]
pub struct MockQuoteProvider {
    state: Arc<Mutex<MockState>>,
    calls: Arc<Mutex<MockCallLog>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockQuoteProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A small, fixed market used when running without a real provider.
    pub fn demo() -> Self {
        let provider = Self::new();
        let market = [
            ("BTC", 65_000, 1_280_000_000_000_i64),
            ("ETH", 3_200, 385_000_000_000),
            ("SOL", 150, 68_000_000_000),
            ("ADA", 1, 16_000_000_000),
        ];
        let btc_usd = Decimal::from(65_000);
        let eur_rate = Decimal::new(92, 2);

        let mut top = Vec::new();
        let mut tokens = Vec::new();
        for (symbol, usd, cap) in market {
            let usd = Decimal::from(usd);
            provider.set_quote(
                symbol,
                "USD",
                QuoteFields {
                    market_cap: Some(Decimal::from(cap)),
                    ..QuoteFields::price_only(usd)
                },
            );
            provider.set_price(symbol, "EUR", usd * eur_rate);
            provider.set_price(symbol, "BTC", usd / btc_usd);

            top.push(TopAsset {
                symbol: symbol.to_string(),
                market_cap_usd: Decimal::from(cap),
            });
            tokens.push(SupportedToken {
                symbol: symbol.to_string(),
                full_name: format!("{} ({})", symbol, symbol),
                coin_name: symbol.to_string(),
            });
        }

        provider.set_global_market_cap(Decimal::from(2_400_000_000_000_i64));
        provider.set_top_assets(top);
        provider.set_coin_list(tokens);
        provider
    }

    pub fn with_price(self, symbol: &str, currency: &str, price: Decimal) -> Self {
        self.set_price(symbol, currency, price);
        self
    }

    pub fn set_price(&self, symbol: &str, currency: &str, price: Decimal) {
        self.set_quote(symbol, currency, QuoteFields::price_only(price));
    }

    pub fn set_quote(&self, symbol: &str, currency: &str, quote: QuoteFields) {
        lock(&self.state)
            .quotes
            .entry(normalize_symbol(symbol))
            .or_default()
            .insert(normalize_symbol(currency), quote);
    }

    /// Drop `currency` from every response for `symbol`, as if the provider had
    /// no quote for that pair.
    pub fn omit_quote(&self, symbol: &str, currency: &str) {
        lock(&self.state)
            .omitted
            .insert((normalize_symbol(symbol), normalize_symbol(currency)));
    }

    pub fn fail_endpoint(&self, endpoint: MockEndpoint) {
        lock(&self.state).failing.insert(endpoint);
    }

    pub fn recover_endpoint(&self, endpoint: MockEndpoint) {
        lock(&self.state).failing.remove(&endpoint);
    }

    pub fn set_global_market_cap(&self, cap: Decimal) {
        lock(&self.state).global_market_cap = cap;
    }

    pub fn set_top_assets(&self, assets: Vec<TopAsset>) {
        lock(&self.state).top_assets = assets;
    }

    pub fn set_history(&self, symbol: &str, bars: Vec<DailyBar>) {
        lock(&self.state)
            .history
            .insert(normalize_symbol(symbol), bars);
    }

    pub fn set_coin_list(&self, tokens: Vec<SupportedToken>) {
        lock(&self.state).coin_list = tokens;
    }

    pub fn calls(&self) -> MockCallLog {
        lock(&self.calls).clone()
    }

    /// Sizes of the symbol lists of every quote call, in call order.
    pub fn quote_batch_sizes(&self) -> Vec<usize> {
        lock(&self.calls)
            .quote_batches
            .iter()
            .map(Vec::len)
            .collect()
    }

    pub fn global_cap_calls(&self) -> usize {
        lock(&self.calls).global_cap_calls
    }

    pub fn history_calls(&self) -> usize {
        lock(&self.calls).history_calls.len()
    }

    fn check(&self, endpoint: MockEndpoint) -> Result<(), ProviderError> {
        if lock(&self.state).failing.contains(&endpoint) {
            return Err(ProviderError::Transport {
                endpoint: endpoint.name().to_string(),
                reason: "mock endpoint configured to fail".to_string(),
            });
        }
        Ok(())
    }

    fn synthetic_bars(&self, symbol: &str, days: u32) -> Vec<DailyBar> {
        let state = lock(&self.state);
        let Some(close) = state
            .quotes
            .get(symbol)
            .and_then(|q| q.get("USD"))
            .map(|q| q.price)
        else {
            return Vec::new();
        };

        let Some(today) = Utc::now().date_naive().and_hms_opt(0, 0, 0) else {
            return Vec::new();
        };
        let today = today.and_utc();

        (1..=i64::from(days))
            .rev()
            .map(|back| DailyBar {
                time: today - Duration::days(back),
                open: close,
                high: close,
                low: close,
                close,
                volume_from: Decimal::ONE,
                volume_to: close,
            })
            .collect()
    }
}

#[async_trait]
impl QuoteProvider for MockQuoteProvider {
    async fn fetch_quotes(
        &self,
        symbols: &[String],
        currencies: &[String],
    ) -> Result<QuoteBook, ProviderError> {
        {
            let mut calls = lock(&self.calls);
            calls.quote_batches.push(symbols.to_vec());
            calls.quote_currencies.push(currencies.to_vec());
        }
        self.check(MockEndpoint::Quotes)?;

        let state = lock(&self.state);
        let mut book = QuoteBook::new();
        for symbol in symbols {
            let symbol = normalize_symbol(symbol);
            let Some(known) = state.quotes.get(&symbol) else {
                continue;
            };

            let mut quotes = CurrencyQuotes::new();
            for currency in currencies {
                let currency = normalize_symbol(currency);
                if state.omitted.contains(&(symbol.clone(), currency.clone())) {
                    continue;
                }
                if let Some(quote) = known.get(&currency) {
                    quotes.insert(currency, quote.clone());
                }
            }

            if !quotes.is_empty() {
                book.insert(symbol, quotes);
            }
        }

        debug!(
            "MockQuoteProvider: {} symbol(s) requested, {} quoted",
            symbols.len(),
            book.len()
        );
        Ok(book)
    }

    async fn fetch_top_assets(&self, limit: usize) -> Result<Vec<TopAsset>, ProviderError> {
        lock(&self.calls).top_asset_calls += 1;
        self.check(MockEndpoint::TopAssets)?;

        let mut assets = lock(&self.state).top_assets.clone();
        assets.sort_by(|a, b| b.market_cap_usd.cmp(&a.market_cap_usd));
        assets.truncate(limit);
        Ok(assets)
    }

    async fn fetch_global_market_cap_usd(&self) -> Result<Decimal, ProviderError> {
        lock(&self.calls).global_cap_calls += 1;
        self.check(MockEndpoint::GlobalMarketCap)?;
        Ok(lock(&self.state).global_market_cap)
    }

    async fn fetch_daily_history(
        &self,
        symbol: &str,
        currency: &str,
        days: u32,
    ) -> Result<Vec<DailyBar>, ProviderError> {
        lock(&self.calls)
            .history_calls
            .push((symbol.to_string(), currency.to_string(), days));
        self.check(MockEndpoint::DailyHistory)?;

        let symbol = normalize_symbol(symbol);
        let scripted = lock(&self.state).history.get(&symbol).cloned();
        let mut bars = match scripted {
            Some(bars) => bars,
            None => self.synthetic_bars(&symbol, days),
        };

        let keep = days as usize;
        if bars.len() > keep {
            bars.drain(..bars.len() - keep);
        }
        Ok(bars)
    }

    async fn fetch_coin_list(&self) -> Result<Vec<SupportedToken>, ProviderError> {
        lock(&self.calls).coin_list_calls += 1;
        self.check(MockEndpoint::CoinList)?;
        Ok(lock(&self.state).coin_list.clone())
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        lock(&self.calls).probe_calls += 1;
        self.check(MockEndpoint::Probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_quotes_only_for_known_pairs() {
        let provider = MockQuoteProvider::new()
            .with_price("BTC", "USD", dec!(50000))
            .with_price("BTC", "EUR", dec!(46000));
        provider.omit_quote("BTC", "EUR");

        let book = provider
            .fetch_quotes(&strings(&["BTC", "XYZ"]), &strings(&["USD", "EUR"]))
            .await
            .unwrap();

        assert_eq!(book.len(), 1);
        assert_eq!(book["BTC"].len(), 1);
        assert_eq!(book["BTC"]["USD"].price, dec!(50000));
        assert_eq!(provider.quote_batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn test_failing_endpoint_returns_error_and_still_counts() {
        let provider = MockQuoteProvider::demo();
        provider.fail_endpoint(MockEndpoint::GlobalMarketCap);

        let err = provider.fetch_global_market_cap_usd().await.unwrap_err();
        assert_eq!(err.endpoint(), "global");
        assert_eq!(provider.global_cap_calls(), 1);

        provider.recover_endpoint(MockEndpoint::GlobalMarketCap);
        assert!(provider.fetch_global_market_cap_usd().await.unwrap() > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_synthetic_history_is_bounded() {
        let provider = MockQuoteProvider::demo();
        let bars = provider.fetch_daily_history("ETH", "USD", 7).await.unwrap();

        assert_eq!(bars.len(), 7);
        assert!(bars.windows(2).all(|w| w[0].time < w[1].time));
        assert!(provider.fetch_daily_history("NOPE", "USD", 7).await.unwrap().is_empty());
    }
}
