use crate::domain::repositories::TokenRepository;
use crate::domain::types::SupportedToken;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

pub struct SqliteTokenRepository {
    pool: SqlitePool,
}

impl SqliteTokenRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for SqliteTokenRepository {
    async fn insert_missing(&self, tokens: &[SupportedToken]) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open token transaction")?;

        let mut inserted = 0;
        for token in tokens {
            let result = sqlx::query(
                r#"
                INSERT INTO supported_tokens (symbol, full_name, coin_name)
                VALUES (?, ?, ?)
                ON CONFLICT(symbol) DO NOTHING
                "#,
            )
            .bind(&token.symbol)
            .bind(&token.full_name)
            .bind(&token.coin_name)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert token {}", token.symbol))?;
            inserted += result.rows_affected();
        }

        tx.commit().await.context("Failed to commit token catalog")?;
        Ok(inserted)
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM supported_tokens")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count supported tokens")?;
        Ok(count.max(0) as usize)
    }
}
