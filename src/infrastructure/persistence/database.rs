use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared database wrapper
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .foreign_keys(false)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Private in-memory database on a single connection, so every query sees
    /// the same data.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Fails when the store does not answer a trivial query.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // 1. Collaborator tables (owned by the CRUD layer, read by the engine)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL DEFAULT '',
                email TEXT,
                deleted INTEGER DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS portfolios (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                deleted INTEGER DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS user_cryptos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                crypto_symbol TEXT NOT NULL,
                purchase_price REAL,
                purchase_currency TEXT,
                purchase_date DATE,
                amount REAL DEFAULT 0,
                portfolio_id INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_portfolio_user
            ON user_cryptos (portfolio_id, user_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create collaborator tables")?;

        // 2. Current Prices Table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS current_prices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                crypto_symbol TEXT NOT NULL,
                currency TEXT NOT NULL,
                price REAL NOT NULL,
                last_updated INTEGER NOT NULL,
                UNIQUE (crypto_symbol, currency)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create current_prices table")?;

        // 3. Historical Data Table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS historical_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                crypto_symbol TEXT NOT NULL,
                date_time INTEGER NOT NULL,
                price_usd REAL,
                price_eur REAL,
                price_btc REAL,
                open REAL,
                high REAL,
                low REAL,
                volume_from REAL,
                volume_to REAL,
                market_cap REAL,
                UNIQUE (crypto_symbol, date_time)
            );
            CREATE INDEX IF NOT EXISTS idx_historical_data
            ON historical_data (crypto_symbol, date_time);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create historical_data table")?;

        // 4. Daily roll-up of historical data
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aggregated_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                crypto_symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                avg_price REAL,
                total_volume REAL,
                market_cap REAL,
                UNIQUE (crypto_symbol, date)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create aggregated_data table")?;

        // 5. Market Dominance Table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_dominance (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                crypto_symbol TEXT NOT NULL,
                date_time INTEGER NOT NULL,
                sample_date TEXT NOT NULL,
                market_cap_usd REAL NOT NULL,
                dominance_percentage REAL NOT NULL,
                UNIQUE (crypto_symbol, sample_date)
            );
            CREATE INDEX IF NOT EXISTS idx_market_dominance_time
            ON market_dominance (date_time);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create market_dominance table")?;

        // 6. Portfolio Values Table (append-only time series)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_values (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                portfolio_id INTEGER NOT NULL,
                value REAL NOT NULL,
                currency TEXT NOT NULL,
                last_updated INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_portfolio_values_last_updated
            ON portfolio_values (portfolio_id, last_updated);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create portfolio_values table")?;

        // 7. Supported Tokens Table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS supported_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL UNIQUE,
                full_name TEXT NOT NULL,
                coin_name TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create supported_tokens table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
