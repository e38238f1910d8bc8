//! CryptoCompare market-data client
//!
//! Provides the quote provider used in live mode:
//! - Multi-symbol / multi-currency quotes (`pricemultifull`)
//! - Top assets by market cap (`top/mktcapfull`)
//! - Daily history for backfills (`v2/histoday`)
//! - The supported coin list (`all/coinlist`)
//!
//! Global market capitalization comes from a separate provider (`/global`).

use super::dto::{
    CoinListResponse, GlobalResponse, HistoDayResponse, PriceMultiFullResponse,
    TopMarketCapResponse,
};
use crate::config::ProviderEnvConfig;
use crate::domain::errors::ProviderError;
use crate::domain::ports::QuoteProvider;
use crate::domain::types::{DailyBar, QuoteBook, SupportedToken, TopAsset};
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};
use crate::infrastructure::observability::Metrics;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const ENDPOINT_QUOTES: &str = "pricemultifull";
const ENDPOINT_TOP: &str = "top/mktcapfull";
const ENDPOINT_GLOBAL: &str = "global";
const ENDPOINT_HISTODAY: &str = "v2/histoday";
const ENDPOINT_COINLIST: &str = "all/coinlist";

/// Error bodies are truncated to this many characters in logs and errors.
const MAX_ERROR_BODY: usize = 256;

pub struct CryptoCompareClient {
    client: ClientWithMiddleware,
    api_key: String,
    base_url: String,
    global_market_cap_url: String,
    metrics: Option<Metrics>,
}

impl CryptoCompareClient {
    pub fn builder() -> CryptoCompareClientBuilder {
        CryptoCompareClientBuilder::default()
    }

    pub fn from_config(config: &ProviderEnvConfig, metrics: Option<Metrics>) -> Self {
        Self::builder()
            .api_key(config.api_key.clone())
            .base_url(config.base_url.clone())
            .global_market_cap_url(config.global_market_cap_url.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .metrics(metrics)
            .build()
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut params: Vec<(&str, String)> = params.to_vec();
        if !self.api_key.is_empty() {
            params.push(("api_key", self.api_key.clone()));
        }
        build_url_with_query(&format!("{}/{}", self.base_url, path), &params)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: &str,
    ) -> Result<T, ProviderError> {
        let started = Instant::now();
        let result = self.get_json_inner(endpoint, url).await;

        if let Some(metrics) = &self.metrics {
            let outcome = if result.is_ok() { "ok" } else { "error" };
            metrics
                .provider_requests_total
                .with_label_values(&[endpoint, outcome])
                .inc();
            metrics
                .provider_latency_seconds
                .with_label_values(&[endpoint])
                .observe(started.elapsed().as_secs_f64());
        }

        result
    }

    async fn get_json_inner<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: &str,
    ) -> Result<T, ProviderError> {
        debug!("CryptoCompareClient: GET {}", endpoint);

        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| ProviderError::Transport {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        serde_json::from_str::<T>(&body).map_err(|e| ProviderError::Decode {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{}…", cut)
    }
}

fn api_error(endpoint: &str, message: String) -> ProviderError {
    ProviderError::Api {
        endpoint: endpoint.to_string(),
        message,
    }
}

#[derive(Default)]
pub struct CryptoCompareClientBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    global_market_cap_url: Option<String>,
    timeout: Option<Duration>,
    metrics: Option<Metrics>,
}

impl CryptoCompareClientBuilder {
    pub fn api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn global_market_cap_url(mut self, url: String) -> Self {
        self.global_market_cap_url = Some(url);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn metrics(mut self, metrics: Option<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> CryptoCompareClient {
        let defaults = ProviderEnvConfig::default();
        let api_key = self.api_key.unwrap_or_default();
        if api_key.is_empty() {
            warn!("CryptoCompareClient: No API key configured, requests will be rate limited");
        }

        CryptoCompareClient {
            client: HttpClientFactory::create_client(
                self.timeout
                    .unwrap_or(Duration::from_secs(defaults.timeout_secs)),
            ),
            api_key,
            base_url: self
                .base_url
                .unwrap_or(defaults.base_url)
                .trim_end_matches('/')
                .to_string(),
            global_market_cap_url: self
                .global_market_cap_url
                .unwrap_or(defaults.global_market_cap_url)
                .trim_end_matches('/')
                .to_string(),
            metrics: self.metrics,
        }
    }
}

#[async_trait]
impl QuoteProvider for CryptoCompareClient {
    async fn fetch_quotes(
        &self,
        symbols: &[String],
        currencies: &[String],
    ) -> Result<QuoteBook, ProviderError> {
        if symbols.is_empty() || currencies.is_empty() {
            return Ok(QuoteBook::new());
        }

        let url = self.url(
            ENDPOINT_QUOTES,
            &[("fsyms", symbols.join(",")), ("tsyms", currencies.join(","))],
        );
        let parsed: PriceMultiFullResponse = self.get_json(ENDPOINT_QUOTES, &url).await?;

        if let Some(message) = parsed.envelope.error_message() {
            return Err(api_error(ENDPOINT_QUOTES, message));
        }

        let book = parsed.into_book();
        debug!(
            "CryptoCompareClient: {} of {} symbols quoted",
            book.len(),
            symbols.len()
        );
        Ok(book)
    }

    async fn fetch_top_assets(&self, limit: usize) -> Result<Vec<TopAsset>, ProviderError> {
        let url = self.url(
            ENDPOINT_TOP,
            &[("limit", limit.to_string()), ("tsym", "USD".to_string())],
        );
        let parsed: TopMarketCapResponse = self.get_json(ENDPOINT_TOP, &url).await?;

        if let Some(message) = parsed.envelope.error_message() {
            return Err(api_error(ENDPOINT_TOP, message));
        }

        let mut assets = parsed.into_assets();
        assets.truncate(limit);
        Ok(assets)
    }

    async fn fetch_global_market_cap_usd(&self) -> Result<Decimal, ProviderError> {
        let url = format!("{}/{}", self.global_market_cap_url, ENDPOINT_GLOBAL);
        let parsed: GlobalResponse = self.get_json(ENDPOINT_GLOBAL, &url).await?;

        parsed
            .total_usd()
            .ok_or_else(|| ProviderError::MissingData {
                endpoint: ENDPOINT_GLOBAL.to_string(),
                what: "total_market_cap.usd".to_string(),
            })
    }

    async fn fetch_daily_history(
        &self,
        symbol: &str,
        currency: &str,
        days: u32,
    ) -> Result<Vec<DailyBar>, ProviderError> {
        let url = self.url(
            ENDPOINT_HISTODAY,
            &[
                ("fsym", symbol.to_string()),
                ("tsym", currency.to_string()),
                ("limit", days.to_string()),
            ],
        );
        let parsed: HistoDayResponse = self.get_json(ENDPOINT_HISTODAY, &url).await?;

        if let Some(message) = parsed.envelope.error_message() {
            return Err(api_error(ENDPOINT_HISTODAY, message));
        }

        let mut bars = parsed.into_bars();
        // `limit=N` yields N+1 bars; keep the most recent `days`.
        let excess = bars.len().saturating_sub(days as usize);
        bars.drain(..excess);
        Ok(bars)
    }

    async fn fetch_coin_list(&self) -> Result<Vec<SupportedToken>, ProviderError> {
        let url = self.url(ENDPOINT_COINLIST, &[]);
        let parsed: CoinListResponse = self.get_json(ENDPOINT_COINLIST, &url).await?;

        if let Some(message) = parsed.envelope.error_message() {
            return Err(api_error(ENDPOINT_COINLIST, message));
        }

        let tokens = parsed.into_tokens();
        info!("CryptoCompareClient: Coin list contains {} tokens", tokens.len());
        Ok(tokens)
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let url = self.url(
            ENDPOINT_HISTODAY,
            &[
                ("fsym", "BTC".to_string()),
                ("tsym", "USD".to_string()),
                ("limit", "1".to_string()),
            ],
        );
        let parsed: HistoDayResponse = self.get_json(ENDPOINT_HISTODAY, &url).await?;

        match parsed.envelope.response.as_deref() {
            Some("Success") => Ok(()),
            _ => Err(api_error(
                ENDPOINT_HISTODAY,
                parsed
                    .envelope
                    .message
                    .unwrap_or_else(|| "probe did not report success".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_appends_api_key_last() {
        let client = CryptoCompareClient::builder()
            .api_key("k3y".to_string())
            .base_url("https://min-api.cryptocompare.com/data/".to_string())
            .build();

        let url = client.url(ENDPOINT_QUOTES, &[("fsyms", "BTC,ETH".to_string())]);
        assert_eq!(
            url,
            "https://min-api.cryptocompare.com/data/pricemultifull?fsyms=BTC%2CETH&api_key=k3y"
        );
    }

    #[test]
    fn test_url_without_api_key() {
        let client = CryptoCompareClient::builder().build();
        let url = client.url(ENDPOINT_COINLIST, &[]);
        assert_eq!(url, "https://min-api.cryptocompare.com/data/all/coinlist");
    }

    #[test]
    fn test_truncate_long_bodies() {
        let body = "x".repeat(MAX_ERROR_BODY + 10);
        let cut = truncate(&body);
        assert_eq!(cut.chars().count(), MAX_ERROR_BODY + 1);
        assert!(truncate("short").eq("short"));
    }

    #[tokio::test]
    async fn test_empty_request_short_circuits() {
        let client = CryptoCompareClient::builder().build();
        let book = client
            .fetch_quotes(&[], &["USD".to_string()])
            .await
            .unwrap();
        assert!(book.is_empty());
    }
}
