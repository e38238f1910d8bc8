use crate::domain::ports::QuoteProvider;
use crate::domain::repositories::TokenRepository;
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Daily refresh of the `supported_tokens` catalog from the provider's coin list.
pub struct TokenCatalog {
    provider: Arc<dyn QuoteProvider>,
    repository: Arc<dyn TokenRepository>,
    metrics: Option<Metrics>,
    last_refresh: Mutex<Option<NaiveDate>>,
}

impl TokenCatalog {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        repository: Arc<dyn TokenRepository>,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            provider,
            repository,
            metrics,
            last_refresh: Mutex::new(None),
        }
    }

    /// Returns the number of new tokens, or `None` when today's refresh
    /// already happened. A failed refresh is retried on the next call.
    pub async fn refresh_if_due(&self, now: DateTime<Utc>) -> Result<Option<u64>> {
        let today = now.date_naive();
        if *self.last_refresh.lock().unwrap_or_else(|e| e.into_inner()) == Some(today) {
            return Ok(None);
        }

        let tokens = self
            .provider
            .fetch_coin_list()
            .await
            .context("Coin list fetch failed")?;

        let inserted = match self.repository.insert_missing(&tokens).await {
            Ok(n) => n,
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_write("supported_tokens", false);
                }
                return Err(e.context("Failed to store supported tokens"));
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics
                .rows_written_total
                .with_label_values(&["supported_tokens"])
                .inc_by(inserted as f64);
        }

        *self.last_refresh.lock().unwrap_or_else(|e| e.into_inner()) = Some(today);
        info!(
            "TokenCatalog: {} token(s) listed, {} new",
            tokens.len(),
            inserted
        );
        Ok(Some(inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::{MockEndpoint, MockQuoteProvider};
    use crate::infrastructure::persistence::Database;
    use crate::infrastructure::persistence::repositories::SqliteTokenRepository;
    use chrono::Duration;

    #[tokio::test]
    async fn test_refresh_once_per_day_and_retry_after_failure() {
        let db = Database::in_memory().await.unwrap();
        let repo = Arc::new(SqliteTokenRepository::new(db.pool.clone()));
        let provider = MockQuoteProvider::demo();
        let catalog = TokenCatalog::new(Arc::new(provider.clone()), repo.clone(), None);
        let now = Utc::now();

        provider.fail_endpoint(MockEndpoint::CoinList);
        assert!(catalog.refresh_if_due(now).await.is_err());

        provider.recover_endpoint(MockEndpoint::CoinList);
        assert_eq!(catalog.refresh_if_due(now).await.unwrap(), Some(4));
        assert_eq!(catalog.refresh_if_due(now).await.unwrap(), None);
        assert_eq!(
            catalog.refresh_if_due(now + Duration::days(1)).await.unwrap(),
            Some(0)
        );
        assert_eq!(provider.calls().coin_list_calls, 3);
        assert_eq!(repo.count().await.unwrap(), 4);
    }
}
