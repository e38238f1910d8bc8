use crate::domain::errors::ProviderError;
use crate::domain::types::{DailyBar, QuoteBook, SupportedToken, TopAsset};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// External market-data API.
///
/// Every method is a single remote call without client-side retry.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Multi-symbol, multi-currency quotes. Symbols or currencies the provider
    /// does not know are simply absent from the returned book.
    async fn fetch_quotes(
        &self,
        symbols: &[String],
        currencies: &[String],
    ) -> Result<QuoteBook, ProviderError>;

    /// Top `limit` assets ranked by market capitalization (USD).
    async fn fetch_top_assets(&self, limit: usize) -> Result<Vec<TopAsset>, ProviderError>;

    /// Total market capitalization across all assets, in USD.
    async fn fetch_global_market_cap_usd(&self) -> Result<Decimal, ProviderError>;

    /// The last `days` daily bars for `symbol` quoted in `currency`.
    async fn fetch_daily_history(
        &self,
        symbol: &str,
        currency: &str,
        days: u32,
    ) -> Result<Vec<DailyBar>, ProviderError>;

    /// Every coin the provider can quote.
    async fn fetch_coin_list(&self) -> Result<Vec<SupportedToken>, ProviderError>;

    /// Cheap request confirming the provider accepts our credentials.
    async fn probe(&self) -> Result<(), ProviderError>;
}
