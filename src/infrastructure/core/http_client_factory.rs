use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use std::time::Duration;
use url::Url;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Creates the HTTP client used for market-data calls.
    ///
    /// No retry middleware: a failed call is reported to the caller, which skips
    /// that unit of work until the next scheduled tick.
    pub fn create_client(timeout: Duration) -> ClientWithMiddleware {
        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("folio-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client).build()
    }
}

/// Helper function to build a URL with query parameters.
/// Since reqwest-middleware 0.5.0 doesn't expose the .query() method,
/// we encode the query string here and pass the finished URL.
pub fn build_url_with_query<K, V>(base_url: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if params.is_empty() {
        return base_url.to_string();
    }

    match Url::parse(base_url) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (k.as_ref(), v.as_ref())));
            url.to_string()
        }
        Err(_) => {
            // Relative or otherwise unparsable base: encode the pairs by hand.
            let query: String = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params.iter().map(|(k, v)| (k.as_ref(), v.as_ref())))
                .finish();
            let separator = if base_url.contains('?') { '&' } else { '?' };
            format!("{}{}{}", base_url, separator, query)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_encodes_csv_values() {
        let url = build_url_with_query(
            "https://min-api.cryptocompare.com/data/pricemultifull",
            &[("fsyms", "BTC,ETH"), ("tsyms", "USD,EUR")],
        );
        assert_eq!(
            url,
            "https://min-api.cryptocompare.com/data/pricemultifull?fsyms=BTC%2CETH&tsyms=USD%2CEUR"
        );
    }

    #[test]
    fn test_build_url_appends_to_existing_query() {
        let url = build_url_with_query("https://example.com/x?a=1", &[("b", "2")]);
        assert_eq!(url, "https://example.com/x?a=1&b=2");
    }

    #[test]
    fn test_build_url_without_params_is_unchanged() {
        let params: [(&str, &str); 0] = [];
        assert_eq!(
            build_url_with_query("https://example.com/global", &params),
            "https://example.com/global"
        );
    }
}
