use crate::domain::repositories::HoldingsRepository;
use crate::domain::types::TrackedPair;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Computes the set of pairs the engine must keep fresh.
///
/// The result is deduplicated, sorted and always contains the baseline pair so
/// there is at least one live feed even when nobody holds anything. Nothing is
/// cached between calls.
pub struct TrackedPairResolver {
    holdings: Arc<dyn HoldingsRepository>,
    baseline: TrackedPair,
}

impl TrackedPairResolver {
    pub fn new(holdings: Arc<dyn HoldingsRepository>, baseline: TrackedPair) -> Self {
        Self { holdings, baseline }
    }

    pub fn baseline(&self) -> &TrackedPair {
        &self.baseline
    }

    pub async fn resolve(&self) -> Result<Vec<TrackedPair>> {
        let held = self
            .holdings
            .tracked_pairs(&self.baseline.currency)
            .await
            .context("Failed to resolve tracked pairs")?;

        let mut pairs: BTreeSet<TrackedPair> = held
            .into_iter()
            .map(|p| TrackedPair::new(&p.symbol, &p.currency))
            .collect();
        pairs.insert(self.baseline.clone());

        debug!("TrackedPairResolver: {} pair(s)", pairs.len());
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshots::Holding;
    use async_trait::async_trait;

    struct StaticHoldings(Vec<TrackedPair>);

    #[async_trait]
    impl HoldingsRepository for StaticHoldings {
        async fn tracked_pairs(&self, _default_currency: &str) -> Result<Vec<TrackedPair>> {
            Ok(self.0.clone())
        }
        async fn active_user_ids(&self) -> Result<Vec<i64>> {
            Ok(vec![])
        }
        async fn holdings_for_user(&self, _user_id: i64) -> Result<Vec<Holding>> {
            Ok(vec![])
        }
    }

    struct BrokenHoldings;

    #[async_trait]
    impl HoldingsRepository for BrokenHoldings {
        async fn tracked_pairs(&self, _default_currency: &str) -> Result<Vec<TrackedPair>> {
            anyhow::bail!("database is locked")
        }
        async fn active_user_ids(&self) -> Result<Vec<i64>> {
            Ok(vec![])
        }
        async fn holdings_for_user(&self, _user_id: i64) -> Result<Vec<Holding>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_baseline_present_without_holdings() {
        let resolver = TrackedPairResolver::new(
            Arc::new(StaticHoldings(vec![])),
            TrackedPair::new("BTC", "USD"),
        );
        assert_eq!(
            resolver.resolve().await.unwrap(),
            vec![TrackedPair::new("BTC", "USD")]
        );
    }

    #[tokio::test]
    async fn test_case_insensitive_dedup_with_baseline() {
        let holdings = StaticHoldings(vec![
            TrackedPair {
                symbol: "btc".to_string(),
                currency: "usd".to_string(),
            },
            TrackedPair::new("BTC", "EUR"),
            TrackedPair::new("ETH", "USD"),
        ]);
        let resolver = TrackedPairResolver::new(Arc::new(holdings), TrackedPair::new("BTC", "USD"));

        let pairs = resolver.resolve().await.unwrap();
        assert_eq!(pairs.len(), 3);
    }

    #[tokio::test]
    async fn test_query_failure_propagates() {
        let resolver =
            TrackedPairResolver::new(Arc::new(BrokenHoldings), TrackedPair::new("BTC", "USD"));
        assert!(resolver.resolve().await.is_err());
    }
}
