use super::{from_real, from_unix, to_real};
use crate::domain::repositories::DominanceRepository;
use crate::domain::snapshots::MarketDominanceSample;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};

pub struct SqliteDominanceRepository {
    pool: SqlitePool,
}

impl SqliteDominanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DominanceRepository for SqliteDominanceRepository {
    async fn latest_sample_time(&self) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(date_time) FROM market_dominance")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read latest dominance sample")?;

        Ok(latest.map(from_unix))
    }

    async fn upsert_sample(&self, sample: &MarketDominanceSample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO market_dominance
            (crypto_symbol, date_time, sample_date, market_cap_usd, dominance_percentage)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(crypto_symbol, sample_date) DO UPDATE SET
                date_time = excluded.date_time,
                market_cap_usd = excluded.market_cap_usd,
                dominance_percentage = excluded.dominance_percentage
            "#,
        )
        .bind(&sample.symbol)
        .bind(sample.sampled_at.timestamp())
        .bind(sample.sample_date().format("%Y-%m-%d").to_string())
        .bind(to_real(sample.market_cap_usd))
        .bind(to_real(sample.dominance_percentage))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert dominance sample for {}", sample.symbol))?;

        Ok(())
    }

    async fn samples_for_date(&self, date: NaiveDate) -> Result<Vec<MarketDominanceSample>> {
        let rows = sqlx::query(
            r#"
            SELECT crypto_symbol, date_time, market_cap_usd, dominance_percentage
            FROM market_dominance
            WHERE sample_date = ?
            ORDER BY market_cap_usd DESC
            "#,
        )
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to read dominance samples for {}", date))?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in rows {
            samples.push(MarketDominanceSample {
                symbol: row.try_get("crypto_symbol")?,
                sampled_at: from_unix(row.try_get("date_time")?),
                market_cap_usd: from_real(row.try_get("market_cap_usd")?),
                dominance_percentage: from_real(row.try_get("dominance_percentage")?),
            });
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Database;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_one_sample_per_symbol_per_day() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteDominanceRepository::new(db.pool.clone());
        let morning = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();

        let mut sample = MarketDominanceSample {
            symbol: "BTC".to_string(),
            sampled_at: morning,
            market_cap_usd: dec!(1000),
            dominance_percentage: dec!(50),
        };
        repo.upsert_sample(&sample).await.unwrap();

        sample.sampled_at = morning + Duration::hours(3);
        sample.dominance_percentage = dec!(52);
        repo.upsert_sample(&sample).await.unwrap();

        let day = morning.date_naive();
        let samples = repo.samples_for_date(day).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].dominance_percentage, dec!(52));
        assert_eq!(
            repo.latest_sample_time().await.unwrap(),
            Some(morning + Duration::hours(3))
        );
    }

    #[tokio::test]
    async fn test_empty_table_has_no_latest_sample() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteDominanceRepository::new(db.pool.clone());
        assert_eq!(repo.latest_sample_time().await.unwrap(), None);
    }
}
