use super::{from_real, from_unix, to_real};
use crate::domain::repositories::ValuationRepository;
use crate::domain::snapshots::PortfolioValuationSnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

pub struct SqliteValuationRepository {
    pool: SqlitePool,
}

impl SqliteValuationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ValuationRepository for SqliteValuationRepository {
    async fn insert_snapshots(&self, snapshots: &[PortfolioValuationSnapshot]) -> Result<()> {
        if snapshots.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open valuation transaction")?;

        for snapshot in snapshots {
            sqlx::query(
                r#"
                INSERT INTO portfolio_values (user_id, portfolio_id, value, currency, last_updated)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(snapshot.user_id)
            .bind(snapshot.portfolio_id)
            .bind(to_real(snapshot.value))
            .bind(&snapshot.currency)
            .bind(snapshot.last_updated.timestamp())
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "Failed to insert valuation for portfolio {} ({})",
                    snapshot.portfolio_id, snapshot.currency
                )
            })?;
        }

        tx.commit()
            .await
            .context("Failed to commit valuation snapshots")?;
        Ok(())
    }

    async fn latest_for_portfolio(
        &self,
        portfolio_id: i64,
        currency: &str,
    ) -> Result<Option<PortfolioValuationSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, portfolio_id, value, currency, last_updated
            FROM portfolio_values
            WHERE portfolio_id = ? AND currency = ?
            ORDER BY last_updated DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(portfolio_id)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to read valuation for portfolio {}", portfolio_id))?;

        match row {
            Some(row) => Ok(Some(PortfolioValuationSnapshot {
                user_id: row.try_get("user_id")?,
                portfolio_id: row.try_get("portfolio_id")?,
                value: from_real(row.try_get("value")?),
                currency: row.try_get("currency")?,
                last_updated: from_unix(row.try_get("last_updated")?),
            })),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Database;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_snapshots_are_appended() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteValuationRepository::new(db.pool.clone());
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let first = PortfolioValuationSnapshot {
            user_id: 1,
            portfolio_id: 10,
            value: dec!(100),
            currency: "USD".to_string(),
            last_updated: t0,
        };
        let second = PortfolioValuationSnapshot {
            value: dec!(120),
            last_updated: t0 + Duration::minutes(5),
            ..first.clone()
        };

        repo.insert_snapshots(&[first]).await.unwrap();
        repo.insert_snapshots(&[second]).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM portfolio_values")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let latest = repo.latest_for_portfolio(10, "USD").await.unwrap().unwrap();
        assert_eq!(latest.value, dec!(120));
        assert!(repo.latest_for_portfolio(10, "EUR").await.unwrap().is_none());
    }
}
