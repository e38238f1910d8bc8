use super::from_real;
use crate::domain::repositories::HoldingsRepository;
use crate::domain::snapshots::Holding;
use crate::domain::types::TrackedPair;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;

/// Reads the collaborator tables (`users`, `portfolios`, `user_cryptos`).
pub struct SqliteHoldingsRepository {
    pool: SqlitePool,
}

impl SqliteHoldingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HoldingsRepository for SqliteHoldingsRepository {
    async fn tracked_pairs(&self, default_currency: &str) -> Result<Vec<TrackedPair>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT
                uc.crypto_symbol AS symbol,
                COALESCE(NULLIF(TRIM(uc.purchase_currency), ''), ?) AS currency
            FROM user_cryptos uc
            JOIN portfolios p ON p.id = uc.portfolio_id
            WHERE COALESCE(p.deleted, 0) = 0
              AND TRIM(uc.crypto_symbol) <> ''
            "#,
        )
        .bind(default_currency)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query tracked pairs")?;

        // SQL DISTINCT is case-sensitive; normalizing here merges "btc" and "BTC".
        let mut pairs = BTreeSet::new();
        for row in rows {
            let symbol: String = row.try_get("symbol")?;
            let currency: String = row.try_get("currency")?;
            pairs.insert(TrackedPair::new(&symbol, &currency));
        }

        Ok(pairs.into_iter().collect())
    }

    async fn active_user_ids(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT p.user_id AS user_id
            FROM portfolios p
            LEFT JOIN users u ON u.id = p.user_id
            WHERE COALESCE(p.deleted, 0) = 0
              AND COALESCE(u.deleted, 0) = 0
            ORDER BY p.user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query active users")?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("user_id").map_err(Into::into))
            .collect()
    }

    async fn holdings_for_user(&self, user_id: i64) -> Result<Vec<Holding>> {
        let rows = sqlx::query(
            r#"
            SELECT uc.portfolio_id AS portfolio_id, uc.crypto_symbol AS symbol, uc.amount AS amount
            FROM user_cryptos uc
            JOIN portfolios p ON p.id = uc.portfolio_id
            WHERE p.user_id = ?
              AND COALESCE(p.deleted, 0) = 0
              AND uc.amount > 0
            ORDER BY uc.portfolio_id, uc.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to query holdings for user {}", user_id))?;

        let mut holdings = Vec::with_capacity(rows.len());
        for row in rows {
            let symbol: String = row.try_get("symbol")?;
            let amount: f64 = row.try_get("amount")?;
            holdings.push(Holding {
                portfolio_id: row.try_get("portfolio_id")?,
                symbol: symbol.trim().to_uppercase(),
                amount: from_real(amount),
            });
        }

        Ok(holdings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Database;
    use rust_decimal_macros::dec;

    async fn seed(db: &Database) {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, deleted) VALUES (1, 'alice', 0), (2, 'bob', 0), (3, 'gone', 1);
            INSERT INTO portfolios (id, user_id, name, deleted) VALUES
                (10, 1, 'main', 0),
                (11, 1, 'old', 1),
                (20, 2, 'main', 0),
                (30, 3, 'main', 0);
            INSERT INTO user_cryptos (user_id, crypto_symbol, purchase_currency, amount, portfolio_id) VALUES
                (1, 'btc', 'usd', 2, 10),
                (1, 'ETH', NULL, 10, 10),
                (1, 'DOGE', 'USD', 1000, 11),
                (2, 'BTC', 'EUR', 1, 20),
                (2, 'ADA', 'EUR', 0, 20);
            "#,
        )
        .execute(&db.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_tracked_pairs_skip_deleted_portfolios_and_normalize() {
        let db = Database::in_memory().await.unwrap();
        seed(&db).await;
        let repo = SqliteHoldingsRepository::new(db.pool.clone());

        let pairs = repo.tracked_pairs("USD").await.unwrap();

        assert!(pairs.contains(&TrackedPair::new("BTC", "USD")));
        assert!(pairs.contains(&TrackedPair::new("BTC", "EUR")));
        assert!(pairs.contains(&TrackedPair::new("ETH", "USD")));
        assert!(pairs.contains(&TrackedPair::new("ADA", "EUR")));
        assert!(!pairs.iter().any(|p| p.symbol == "DOGE"));
        assert_eq!(pairs.len(), 4);
    }

    #[tokio::test]
    async fn test_active_users_exclude_deleted_users() {
        let db = Database::in_memory().await.unwrap();
        seed(&db).await;
        let repo = SqliteHoldingsRepository::new(db.pool.clone());

        assert_eq!(repo.active_user_ids().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_holdings_only_positive_amounts_in_live_portfolios() {
        let db = Database::in_memory().await.unwrap();
        seed(&db).await;
        let repo = SqliteHoldingsRepository::new(db.pool.clone());

        let alice = repo.holdings_for_user(1).await.unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].symbol, "BTC");
        assert_eq!(alice[0].amount, dec!(2));

        let bob = repo.holdings_for_user(2).await.unwrap();
        assert_eq!(bob.len(), 1, "zero-amount ADA must be ignored");
    }
}
