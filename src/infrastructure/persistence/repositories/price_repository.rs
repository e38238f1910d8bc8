use super::{from_real, from_real_opt, from_unix, to_real, to_real_opt};
use crate::domain::repositories::PriceRepository;
use crate::domain::snapshots::{CurrentPriceSnapshot, HistoricalPricePoint};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

pub struct SqlitePriceRepository {
    pool: SqlitePool,
}

impl SqlitePriceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_historical_row(row: &SqliteRow) -> Result<HistoricalPricePoint> {
        Ok(HistoricalPricePoint {
            symbol: row.try_get("crypto_symbol")?,
            timestamp: from_unix(row.try_get("date_time")?),
            price_usd: from_real_opt(row.try_get("price_usd")?),
            price_eur: from_real_opt(row.try_get("price_eur")?),
            price_btc: from_real_opt(row.try_get("price_btc")?),
            open: from_real_opt(row.try_get("open")?),
            high: from_real_opt(row.try_get("high")?),
            low: from_real_opt(row.try_get("low")?),
            volume_from: from_real_opt(row.try_get("volume_from")?),
            volume_to: from_real_opt(row.try_get("volume_to")?),
            market_cap: from_real_opt(row.try_get("market_cap")?),
        })
    }
}

#[async_trait]
impl PriceRepository for SqlitePriceRepository {
    async fn upsert_current_price(&self, snapshot: &CurrentPriceSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO current_prices (crypto_symbol, currency, price, last_updated)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(crypto_symbol, currency) DO UPDATE SET
                price = excluded.price,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(&snapshot.symbol)
        .bind(&snapshot.currency)
        .bind(to_real(snapshot.price))
        .bind(snapshot.last_updated.timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "Failed to upsert current price {}/{}",
                snapshot.symbol, snapshot.currency
            )
        })?;

        Ok(())
    }

    async fn upsert_historical_point(&self, point: &HistoricalPricePoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO historical_data
            (crypto_symbol, date_time, price_usd, price_eur, price_btc, open, high, low, volume_from, volume_to, market_cap)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(crypto_symbol, date_time) DO UPDATE SET
                price_usd = COALESCE(excluded.price_usd, historical_data.price_usd),
                price_eur = COALESCE(excluded.price_eur, historical_data.price_eur),
                price_btc = COALESCE(excluded.price_btc, historical_data.price_btc),
                open = COALESCE(excluded.open, historical_data.open),
                high = COALESCE(excluded.high, historical_data.high),
                low = COALESCE(excluded.low, historical_data.low),
                volume_from = COALESCE(excluded.volume_from, historical_data.volume_from),
                volume_to = COALESCE(excluded.volume_to, historical_data.volume_to),
                market_cap = COALESCE(excluded.market_cap, historical_data.market_cap)
            "#,
        )
        .bind(&point.symbol)
        .bind(point.timestamp.timestamp())
        .bind(to_real_opt(point.price_usd))
        .bind(to_real_opt(point.price_eur))
        .bind(to_real_opt(point.price_btc))
        .bind(to_real_opt(point.open))
        .bind(to_real_opt(point.high))
        .bind(to_real_opt(point.low))
        .bind(to_real_opt(point.volume_from))
        .bind(to_real_opt(point.volume_to))
        .bind(to_real_opt(point.market_cap))
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "Failed to upsert historical point {} @ {}",
                point.symbol, point.timestamp
            )
        })?;

        Ok(())
    }

    async fn latest_historical_timestamp(&self, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(date_time) FROM historical_data WHERE crypto_symbol = ?")
                .bind(symbol)
                .fetch_one(&self.pool)
                .await
                .with_context(|| format!("Failed to read latest history time for {}", symbol))?;

        Ok(latest.map(from_unix))
    }

    async fn historical_points(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoricalPricePoint>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM historical_data
            WHERE crypto_symbol = ? AND date_time >= ?
            ORDER BY date_time ASC
            "#,
        )
        .bind(symbol)
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to read history for {}", symbol))?;

        rows.iter().map(Self::map_historical_row).collect()
    }

    async fn current_prices_for(&self, symbols: &[String]) -> Result<Vec<CurrentPriceSnapshot>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT crypto_symbol, currency, price, last_updated FROM current_prices WHERE crypto_symbol IN (",
        );
        let mut separated = builder.separated(", ");
        for symbol in symbols {
            separated.push_bind(symbol);
        }
        separated.push_unseparated(")");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to read current prices")?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            snapshots.push(CurrentPriceSnapshot {
                symbol: row.try_get("crypto_symbol")?,
                currency: row.try_get("currency")?,
                price: from_real(row.try_get("price")?),
                last_updated: from_unix(row.try_get("last_updated")?),
            });
        }

        Ok(snapshots)
    }

    async fn refresh_daily_aggregate(&self, symbol: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO aggregated_data (crypto_symbol, date, avg_price, total_volume, market_cap)
            SELECT
                crypto_symbol,
                date(date_time, 'unixepoch') AS day,
                AVG(price_usd),
                SUM(volume_from),
                AVG(market_cap)
            FROM historical_data
            WHERE crypto_symbol = ?
            GROUP BY crypto_symbol, day
            ON CONFLICT(crypto_symbol, date) DO UPDATE SET
                avg_price = excluded.avg_price,
                total_volume = excluded.total_volume,
                market_cap = excluded.market_cap
            "#,
        )
        .bind(symbol)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to refresh daily aggregate for {}", symbol))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Database;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn point(ts: DateTime<Utc>) -> HistoricalPricePoint {
        HistoricalPricePoint {
            symbol: "BTC".to_string(),
            timestamp: ts,
            price_usd: Some(dec!(50000)),
            price_eur: None,
            price_btc: Some(dec!(1)),
            open: Some(dec!(49000)),
            high: Some(dec!(51000)),
            low: Some(dec!(48000)),
            volume_from: Some(dec!(10)),
            volume_to: Some(dec!(500000)),
            market_cap: None,
        }
    }

    #[tokio::test]
    async fn test_current_price_upsert_overwrites() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqlitePriceRepository::new(db.pool.clone());
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let mut snap = CurrentPriceSnapshot {
            symbol: "BTC".to_string(),
            currency: "USD".to_string(),
            price: dec!(50000),
            last_updated: t0,
        };
        repo.upsert_current_price(&snap).await.unwrap();
        snap.price = dec!(51000);
        snap.last_updated = t0 + Duration::minutes(5);
        repo.upsert_current_price(&snap).await.unwrap();

        let rows = repo.current_prices_for(&["BTC".to_string()]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, dec!(51000));
        assert_eq!(rows[0].last_updated, t0 + Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_partial_historical_write_keeps_known_fields() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqlitePriceRepository::new(db.pool.clone());
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        repo.upsert_historical_point(&point(ts)).await.unwrap();

        let mut eur_only = point(ts);
        eur_only.price_usd = None;
        eur_only.open = None;
        eur_only.price_eur = Some(dec!(46000));
        repo.upsert_historical_point(&eur_only).await.unwrap();

        let points = repo.historical_points("BTC", ts).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].price_usd, Some(dec!(50000)));
        assert_eq!(points[0].price_eur, Some(dec!(46000)));
        assert_eq!(points[0].open, Some(dec!(49000)));
        assert_eq!(points[0].market_cap, None);
    }

    #[tokio::test]
    async fn test_latest_timestamp_and_empty_symbol() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqlitePriceRepository::new(db.pool.clone());
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(repo.latest_historical_timestamp("BTC").await.unwrap(), None);

        repo.upsert_historical_point(&point(ts - Duration::days(1))).await.unwrap();
        repo.upsert_historical_point(&point(ts)).await.unwrap();

        assert_eq!(repo.latest_historical_timestamp("BTC").await.unwrap(), Some(ts));
        assert!(repo.current_prices_for(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_daily_aggregate_rollup() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqlitePriceRepository::new(db.pool.clone());
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

        let mut later = point(ts + Duration::hours(2));
        later.price_usd = Some(dec!(52000));
        repo.upsert_historical_point(&point(ts)).await.unwrap();
        repo.upsert_historical_point(&later).await.unwrap();

        repo.refresh_daily_aggregate("BTC").await.unwrap();
        // Second run updates in place
        repo.refresh_daily_aggregate("BTC").await.unwrap();

        let rows: Vec<(String, f64, f64)> = sqlx::query_as(
            "SELECT date, avg_price, total_volume FROM aggregated_data WHERE crypto_symbol = 'BTC'",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "2024-03-01");
        assert!((rows[0].1 - 51000.0).abs() < 1e-6);
        assert!((rows[0].2 - 20.0).abs() < 1e-6);
    }
}
