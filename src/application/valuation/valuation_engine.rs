//! Portfolio Valuation Engine
//!
//! Periodically values every active user's portfolios from the latest stored
//! prices and appends one snapshot per portfolio and currency.

use crate::domain::repositories::{HoldingsRepository, PriceRepository, ValuationRepository};
use crate::domain::snapshots::{CurrentPriceSnapshot, Holding, PortfolioValuationSnapshot};
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of one `recompute_all` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValuationReport {
    pub users: usize,
    pub failed_users: usize,
    pub snapshots: usize,
}

/// Value each of a user's portfolios in each currency.
///
/// Holdings without a price in a currency contribute zero to that currency's
/// total. Every portfolio that has at least one holding yields one snapshot per
/// currency.
pub fn value_portfolios(
    user_id: i64,
    holdings: &[Holding],
    prices: &[CurrentPriceSnapshot],
    currencies: &[String],
    at: DateTime<Utc>,
) -> Vec<PortfolioValuationSnapshot> {
    let price_of: HashMap<(&str, &str), Decimal> = prices
        .iter()
        .map(|p| ((p.symbol.as_str(), p.currency.as_str()), p.price))
        .collect();

    let mut by_portfolio: BTreeMap<i64, Vec<&Holding>> = BTreeMap::new();
    for holding in holdings {
        by_portfolio.entry(holding.portfolio_id).or_default().push(holding);
    }

    let mut snapshots = Vec::with_capacity(by_portfolio.len() * currencies.len());
    for (portfolio_id, items) in by_portfolio {
        for currency in currencies {
            let value = items
                .iter()
                .map(|h| {
                    price_of
                        .get(&(h.symbol.as_str(), currency.as_str()))
                        .map_or(Decimal::ZERO, |price| h.amount * *price)
                })
                .sum::<Decimal>();

            snapshots.push(PortfolioValuationSnapshot {
                user_id,
                portfolio_id,
                value,
                currency: currency.clone(),
                last_updated: at,
            });
        }
    }

    snapshots
}

pub struct ValuationEngine {
    holdings: Arc<dyn HoldingsRepository>,
    prices: Arc<dyn PriceRepository>,
    valuations: Arc<dyn ValuationRepository>,
    currencies: Vec<String>,
    metrics: Option<Metrics>,
}

impl ValuationEngine {
    pub fn new(
        holdings: Arc<dyn HoldingsRepository>,
        prices: Arc<dyn PriceRepository>,
        valuations: Arc<dyn ValuationRepository>,
        currencies: Vec<String>,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            holdings,
            prices,
            valuations,
            currencies,
            metrics,
        }
    }

    /// Value every active user. A failure for one user is logged and does not
    /// stop the others; only failing to list users aborts the pass.
    pub async fn recompute_all(&self) -> Result<ValuationReport> {
        let users = self
            .holdings
            .active_user_ids()
            .await
            .context("Failed to list active users")?;

        let at = Utc::now();
        let mut report = ValuationReport {
            users: users.len(),
            ..Default::default()
        };

        for user_id in users {
            match self.recompute_user(user_id, at).await {
                Ok(written) => report.snapshots += written,
                Err(e) => {
                    report.failed_users += 1;
                    error!("ValuationEngine: user {} not valued: {:#}", user_id, e);
                }
            }
        }

        info!(
            "ValuationEngine: {} snapshot(s) for {} user(s), {} failed",
            report.snapshots, report.users, report.failed_users
        );
        Ok(report)
    }

    async fn recompute_user(&self, user_id: i64, at: DateTime<Utc>) -> Result<usize> {
        let holdings = self.holdings.holdings_for_user(user_id).await?;
        if holdings.is_empty() {
            debug!("ValuationEngine: user {} has no holdings", user_id);
            return Ok(0);
        }

        let symbols: Vec<String> = holdings
            .iter()
            .map(|h| h.symbol.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let prices = self.prices.current_prices_for(&symbols).await?;

        let snapshots = value_portfolios(user_id, &holdings, &prices, &self.currencies, at);
        let result = self.valuations.insert_snapshots(&snapshots).await;

        if let Some(metrics) = &self.metrics {
            for _ in &snapshots {
                metrics.record_write("portfolio_values", result.is_ok());
            }
        }

        result?;
        Ok(snapshots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn holding(portfolio_id: i64, symbol: &str, amount: Decimal) -> Holding {
        Holding {
            portfolio_id,
            symbol: symbol.to_string(),
            amount,
        }
    }

    fn price(symbol: &str, currency: &str, value: Decimal) -> CurrentPriceSnapshot {
        CurrentPriceSnapshot {
            symbol: symbol.to_string(),
            currency: currency.to_string(),
            price: value,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn test_sums_amount_times_price_per_currency() {
        let holdings = vec![holding(1, "BTC", dec!(2)), holding(1, "ETH", dec!(10))];
        let prices = vec![
            price("BTC", "USD", dec!(50000)),
            price("ETH", "USD", dec!(3000)),
            price("BTC", "EUR", dec!(46000)),
        ];
        let currencies = vec!["USD".to_string(), "EUR".to_string()];

        let snapshots = value_portfolios(7, &holdings, &prices, &currencies, Utc::now());

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].currency, "USD");
        assert_eq!(snapshots[0].value, dec!(130000));
        // ETH has no EUR price and counts as zero
        assert_eq!(snapshots[1].value, dec!(92000));
        assert!(snapshots.iter().all(|s| s.user_id == 7 && s.portfolio_id == 1));
    }

    #[test]
    fn test_one_snapshot_set_per_portfolio() {
        let holdings = vec![holding(2, "BTC", dec!(1)), holding(1, "BTC", dec!(0.5))];
        let prices = vec![price("BTC", "USD", dec!(40000))];

        let snapshots =
            value_portfolios(1, &holdings, &prices, &["USD".to_string()], Utc::now());

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].portfolio_id, 1);
        assert_eq!(snapshots[0].value, dec!(20000));
        assert_eq!(snapshots[1].value, dec!(40000));
    }

    #[test]
    fn test_no_prices_values_at_zero() {
        let snapshots = value_portfolios(
            1,
            &[holding(1, "XYZ", dec!(5))],
            &[],
            &["USD".to_string()],
            Utc::now(),
        );
        assert_eq!(snapshots[0].value, Decimal::ZERO);
    }
}
