use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::application::bootstrap::{
    persistence::{PersistenceBootstrap, PersistenceHandle},
    services::{ServicesBootstrap, ServicesHandle},
};
use crate::application::sync::{AdmissionOutcome, CycleReport, MarketSyncScheduler};
use crate::application::valuation::ValuationReport;
use crate::config::Config;
use crate::domain::events::EngineEvent;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::persistence::Database;

pub struct SystemHandle {
    pub scheduler: Arc<MarketSyncScheduler>,
    pub events: EventBus,
    pub metrics: Metrics,
    db: Database,
    reporter_shutdown: watch::Sender<bool>,
    reporter: Option<JoinHandle<()>>,
}

impl SystemHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Admit a pair on behalf of a collaborator (e.g. a holding was just added).
    pub async fn admit(&self, symbol: &str, currency: &str) -> AdmissionOutcome {
        self.scheduler.admit(symbol, currency).await
    }

    /// Stop every timer, wait for in-flight work, then stop the reporter.
    pub async fn shutdown(mut self) {
        info!("Initiating Graceful Shutdown Sequence...");
        self.scheduler.shutdown().await;

        self.reporter_shutdown.send_replace(true);
        if let Some(reporter) = self.reporter.take() {
            let _ = reporter.await;
        }

        self.db.pool.close().await;
        info!("Graceful Shutdown Complete.");
    }
}

pub struct Application {
    pub config: Config,
    pub persistence: PersistenceHandle,
    pub services: ServicesHandle,
    pub events: EventBus,
    pub metrics: Metrics,
    pub scheduler: Arc<MarketSyncScheduler>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!("Building folio-sync (Mode: {:?})...", config.mode);
        let persistence = PersistenceBootstrap::init(&config.database_url).await?;
        Self::assemble(config, persistence).await
    }

    /// Build on an already opened database (in-memory stores in tests).
    pub async fn build_with_database(config: Config, db: Database) -> Result<Self> {
        let persistence = PersistenceBootstrap::from_database(db).await?;
        Self::assemble(config, persistence).await
    }

    async fn assemble(config: Config, persistence: PersistenceHandle) -> Result<Self> {
        let metrics = Metrics::new()?;
        let events = EventBus::default();
        let services = ServicesBootstrap::init(&config, Some(metrics.clone())).await;

        let scheduler = MarketSyncScheduler::builder()
            .provider(services.quote_provider.clone())
            .holdings(persistence.holdings_repository.clone())
            .prices(persistence.price_repository.clone())
            .dominance(persistence.dominance_repository.clone())
            .valuations(persistence.valuation_repository.clone())
            .tokens(persistence.token_repository.clone())
            .events(events.clone())
            .metrics(Some(metrics.clone()))
            .config(config.sync.clone())
            .build()?;

        Ok(Self {
            config,
            persistence,
            services,
            events,
            metrics,
            scheduler,
        })
    }

    /// One refresh cycle and one valuation pass, without timers.
    pub async fn run_once(&self) -> Result<(CycleReport, ValuationReport)> {
        let cycle = self.scheduler.run_cycle().await;
        let valuation = self.scheduler.run_valuation().await?;
        Ok((cycle, valuation))
    }

    pub async fn start(self) -> Result<SystemHandle> {
        info!("Starting market sync...");
        self.scheduler.start();

        let (reporter_shutdown, reporter_rx) = watch::channel(false);
        let reporter = if self.config.observability.enabled {
            let reporter =
                MetricsReporter::new(self.metrics.clone(), self.config.observability.interval_secs);
            info!(
                "Metrics reporter started (interval: {}s)",
                self.config.observability.interval_secs
            );
            Some(tokio::spawn(reporter.run(reporter_rx)))
        } else {
            info!("Metrics reporting disabled.");
            None
        };

        Ok(SystemHandle {
            scheduler: self.scheduler,
            events: self.events,
            metrics: self.metrics,
            db: self.persistence.db,
            reporter_shutdown,
            reporter,
        })
    }
}
