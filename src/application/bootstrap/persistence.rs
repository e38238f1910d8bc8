use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::domain::repositories::{
    DominanceRepository, HoldingsRepository, PriceRepository, TokenRepository, ValuationRepository,
};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteDominanceRepository, SqliteHoldingsRepository, SqlitePriceRepository,
    SqliteTokenRepository, SqliteValuationRepository,
};

pub struct PersistenceHandle {
    pub db: Database,
    pub holdings_repository: Arc<dyn HoldingsRepository>,
    pub price_repository: Arc<dyn PriceRepository>,
    pub dominance_repository: Arc<dyn DominanceRepository>,
    pub valuation_repository: Arc<dyn ValuationRepository>,
    pub token_repository: Arc<dyn TokenRepository>,
}

pub struct PersistenceBootstrap;

impl PersistenceBootstrap {
    /// Open the store, create the schema and fail fast when it does not answer.
    pub async fn init(db_url: &str) -> Result<PersistenceHandle> {
        info!("Initializing Database at {}", db_url);

        let db = Database::new(db_url)
            .await
            .context("Failed to initialize database")?;

        Self::from_database(db).await
    }

    pub async fn from_database(db: Database) -> Result<PersistenceHandle> {
        db.health_check()
            .await
            .context("Database is not answering")?;

        Ok(PersistenceHandle {
            holdings_repository: Arc::new(SqliteHoldingsRepository::new(db.pool.clone())),
            price_repository: Arc::new(SqlitePriceRepository::new(db.pool.clone())),
            dominance_repository: Arc::new(SqliteDominanceRepository::new(db.pool.clone())),
            valuation_repository: Arc::new(SqliteValuationRepository::new(db.pool.clone())),
            token_repository: Arc::new(SqliteTokenRepository::new(db.pool.clone())),
            db,
        })
    }
}
