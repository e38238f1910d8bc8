use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, Mode};
use crate::domain::ports::QuoteProvider;
use crate::infrastructure::cryptocompare::CryptoCompareClient;
use crate::infrastructure::mock::MockQuoteProvider;
use crate::infrastructure::observability::Metrics;

pub struct ServicesHandle {
    pub quote_provider: Arc<dyn QuoteProvider>,
}

pub struct ServicesBootstrap;

impl ServicesBootstrap {
    /// Build the market-data provider for the configured mode and probe it.
    /// A failed probe is only a warning: the first cycles will retry anyway.
    pub async fn init(config: &Config, metrics: Option<Metrics>) -> ServicesHandle {
        let quote_provider: Arc<dyn QuoteProvider> = match config.mode {
            Mode::Live => {
                if config.provider.api_key.is_empty() {
                    warn!("API_KEY_CRYPTOCOMPARE is not set, requests may be rate limited");
                }
                Arc::new(CryptoCompareClient::from_config(&config.provider, metrics))
            }
            Mode::Mock => {
                info!("Using deterministic mock market data");
                Arc::new(MockQuoteProvider::demo())
            }
        };

        match quote_provider.probe().await {
            Ok(()) => info!("Market-data provider reachable"),
            Err(e) => warn!("Market-data provider probe failed: {}", e),
        }

        ServicesHandle { quote_provider }
    }
}
