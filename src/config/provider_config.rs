//! Market-data provider configuration parsing from environment variables.

use super::env_or;
use std::env;

pub const DEFAULT_CRYPTOCOMPARE_BASE_URL: &str = "https://min-api.cryptocompare.com/data";
pub const DEFAULT_GLOBAL_MARKET_CAP_URL: &str = "https://api.coingecko.com/api/v3";

#[derive(Clone)]
pub struct ProviderEnvConfig {
    pub base_url: String,
    pub api_key: String,
    pub global_market_cap_url: String,
    pub timeout_secs: u64,
}

// Keep the API key out of logs.
impl std::fmt::Debug for ProviderEnvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEnvConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("global_market_cap_url", &self.global_market_cap_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ProviderEnvConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CRYPTOCOMPARE_BASE_URL.to_string(),
            api_key: String::new(),
            global_market_cap_url: DEFAULT_GLOBAL_MARKET_CAP_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl ProviderEnvConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env::var("CRYPTOCOMPARE_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            api_key: env::var("API_KEY_CRYPTOCOMPARE").unwrap_or_default(),
            global_market_cap_url: env::var("GLOBAL_MARKET_CAP_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.global_market_cap_url),
            timeout_secs: env_or("HTTP_TIMEOUT_SECS", defaults.timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_api_key() {
        let config = ProviderEnvConfig {
            api_key: "super-secret".to_string(),
            ..ProviderEnvConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
