//! Market Sync Scheduler
//!
//! Owns every timer of the engine:
//! - the refresh cycle (resolve pairs, batch quote calls, persist, dominance,
//!   token catalog, notify)
//! - the valuation pass
//! - one repoll timer per admitted pair, kept in an explicit registry
//!
//! At most one refresh cycle runs at a time; an overlapping call is skipped.
//! The refresh timer admits every tracked pair on its first tick, then the
//! pairs each cycle newly discovers, and waits for those admissions itself.
//! `stop` flips a watch signal and cancels every handle; timers exit at their
//! next await point and no new cycle starts afterwards.

use crate::application::market_data::batching::{partition_batches, quote_currencies};
use crate::application::market_data::dominance_sampler::{DominanceOutcome, DominanceSampler};
use crate::application::market_data::history_backfill::{BackfillOutcome, HistoryBackfiller};
use crate::application::market_data::price_writer::PriceWriter;
use crate::application::market_data::token_catalog::TokenCatalog;
use crate::application::market_data::tracked_pairs::TrackedPairResolver;
use crate::application::sync::polling::{CycleGuard, PollingHandle};
use crate::application::valuation::{ValuationEngine, ValuationReport};
use crate::config::SyncEnvConfig;
use crate::domain::events::EngineEvent;
use crate::domain::ports::QuoteProvider;
use crate::domain::repositories::{
    DominanceRepository, HoldingsRepository, PriceRepository, TokenRepository, ValuationRepository,
};
use crate::domain::types::TrackedPair;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::Metrics;
use anyhow::{Result, anyhow};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval, interval_at};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// History tick of a refresh: the instant truncated to the whole minute.
pub fn minute_tick(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::minutes(1)).unwrap_or(at)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// Another cycle was still running.
    SkippedOverlap,
    /// Shutdown had already begun.
    SkippedShutdown,
    /// The tracked pairs could not be resolved.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub outcome: CycleOutcome,
    pub pairs: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub symbols_persisted: usize,
    pub symbols_missing: usize,
    pub rows_failed: usize,
    pub dominance: Option<DominanceOutcome>,
    /// Pairs that appeared since the previous cycle.
    pub new_pairs: Vec<TrackedPair>,
}

impl CycleReport {
    fn new(cycle_id: Uuid, outcome: CycleOutcome) -> Self {
        Self {
            cycle_id,
            outcome,
            pairs: 0,
            batches: 0,
            failed_batches: 0,
            symbols_persisted: 0,
            symbols_missing: 0,
            rows_failed: 0,
            dominance: None,
            new_pairs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionReport {
    pub pair: TrackedPair,
    /// Whether the immediate fetch produced quotes that were persisted.
    pub refreshed: bool,
    pub backfill: BackfillOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted(AdmissionReport),
    AlreadyPolling,
    /// Shutdown has begun or the pair is blank.
    Rejected,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub sync_interval: Duration,
    pub valuation_interval: Duration,
    pub pair_poll_interval: Duration,
    pub batch_size: usize,
    pub base_currencies: Vec<String>,
}

impl From<&SyncEnvConfig> for SchedulerSettings {
    fn from(config: &SyncEnvConfig) -> Self {
        Self {
            sync_interval: Duration::from_secs(config.sync_interval_secs.max(1)),
            valuation_interval: Duration::from_secs(config.valuation_interval_secs.max(1)),
            pair_poll_interval: Duration::from_secs(config.pair_poll_interval_secs.max(1)),
            batch_size: config.quote_batch_size,
            base_currencies: config.base_currencies.clone(),
        }
    }
}

pub struct MarketSyncScheduler {
    provider: Arc<dyn QuoteProvider>,
    resolver: TrackedPairResolver,
    writer: Arc<PriceWriter>,
    backfiller: HistoryBackfiller,
    dominance: DominanceSampler,
    tokens: Option<TokenCatalog>,
    valuation: ValuationEngine,
    events: EventBus,
    metrics: Option<Metrics>,
    settings: SchedulerSettings,
    cycle_running: AtomicBool,
    started: AtomicBool,
    known_pairs: Mutex<Option<BTreeSet<TrackedPair>>>,
    handles: Mutex<HashMap<String, PollingHandle>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl MarketSyncScheduler {
    pub fn builder() -> MarketSyncSchedulerBuilder {
        MarketSyncSchedulerBuilder::default()
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn is_cycle_running(&self) -> bool {
        self.cycle_running.load(Ordering::Acquire)
    }

    pub fn polling_count(&self) -> usize {
        lock(&self.handles).len()
    }

    pub fn is_polling(&self, symbol: &str, currency: &str) -> bool {
        lock(&self.handles).contains_key(&TrackedPair::new(symbol, currency).key())
    }

    pub fn polling_pairs(&self) -> Vec<TrackedPair> {
        let mut pairs: Vec<TrackedPair> = lock(&self.handles)
            .values()
            .map(|h| h.pair().clone())
            .collect();
        pairs.sort();
        pairs
    }

    /// Schedule the refresh cycle and the valuation pass, each running once
    /// immediately. Has no effect when already started or stopped.
    pub fn start(self: &Arc<Self>) {
        if self.is_shutting_down() {
            warn!("MarketSyncScheduler: start after shutdown ignored");
            return;
        }
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("MarketSyncScheduler: already started");
            return;
        }

        info!(
            "MarketSyncScheduler: starting (sync every {:?}, valuation every {:?})",
            self.settings.sync_interval, self.settings.valuation_interval
        );

        let sync = tokio::spawn(Self::sync_loop(
            Arc::downgrade(self),
            self.settings.sync_interval,
            self.shutdown_tx.subscribe(),
        ));
        let valuation = tokio::spawn(Self::valuation_loop(
            Arc::downgrade(self),
            self.settings.valuation_interval,
            self.shutdown_tx.subscribe(),
        ));

        lock(&self.timers).extend([sync, valuation]);
    }

    /// Stop every timer and polling handle. Synchronous and idempotent; an
    /// in-flight cycle or HTTP call is left to finish.
    pub fn stop(&self) {
        let already = self.shutdown_tx.send_replace(true);

        let drained: Vec<PollingHandle> = lock(&self.handles).drain().map(|(_, h)| h).collect();
        let cancelled = drained.len();
        let tasks: Vec<JoinHandle<()>> = drained.into_iter().map(PollingHandle::cancel).collect();
        lock(&self.timers).extend(tasks);

        if let Some(metrics) = &self.metrics {
            metrics.polling_handles.set(0.0);
        }

        if !already || cancelled > 0 {
            info!(
                "MarketSyncScheduler: stopped, {} polling handle(s) cancelled",
                cancelled
            );
        }
    }

    /// `stop`, then wait for every timer task to wind down, including the
    /// admissions the refresh timer is running.
    pub async fn shutdown(&self) {
        self.stop();

        let tasks = std::mem::take(&mut *lock(&self.timers));
        for task in tasks {
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                error!("MarketSyncScheduler: timer task failed: {}", e);
            }
        }
        info!("MarketSyncScheduler: all timers finished");
    }

    /// Run one refresh cycle now. Never runs concurrently with another cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        self.execute_cycle(cycle_id)
            .instrument(info_span!("sync_cycle", %cycle_id))
            .await
    }

    /// One valuation pass over every active user.
    pub async fn run_valuation(&self) -> Result<ValuationReport> {
        self.valuation.recompute_all().await
    }

    /// Start polling a pair that was not polled so far.
    ///
    /// The pair gets a repoll timer, one immediate fetch and persist, and a
    /// backfill when its history has no point newer than the staleness
    /// threshold (checked before the immediate fetch writes one).
    pub async fn admit(self: &Arc<Self>, symbol: &str, currency: &str) -> AdmissionOutcome {
        let pair = TrackedPair::new(symbol, currency);
        if pair.symbol.is_empty() || pair.currency.is_empty() {
            warn!("MarketSyncScheduler: blank pair '{}' rejected", pair);
            return AdmissionOutcome::Rejected;
        }

        {
            let mut handles = lock(&self.handles);
            // Checked under the registry lock so `stop` cannot miss a new handle
            if self.is_shutting_down() {
                debug!("MarketSyncScheduler: {} rejected, shutting down", pair);
                return AdmissionOutcome::Rejected;
            }
            if handles.contains_key(&pair.key()) {
                debug!("MarketSyncScheduler: {} already polling", pair);
                return AdmissionOutcome::AlreadyPolling;
            }

            let handle = self.spawn_pair_poller(pair.clone());
            handles.insert(pair.key(), handle);
            if let Some(metrics) = &self.metrics {
                metrics.polling_handles.set(handles.len() as f64);
            }
        }

        info!("MarketSyncScheduler: admitted {}", pair);

        let now = Utc::now();
        let freshness = self.backfiller.fresh_until(&pair.symbol, now).await;
        let refreshed = self.refresh_pair(&pair).await;
        let backfill = match freshness {
            Ok(Some(latest)) => BackfillOutcome::UpToDate { latest },
            Ok(None) => self.backfiller.run(&pair.symbol).await,
            Err(e) => {
                warn!("MarketSyncScheduler: {:#}", e);
                BackfillOutcome::Failed
            }
        };

        debug!(
            "MarketSyncScheduler: {} admission done (refreshed: {}, backfill: {:?})",
            pair, refreshed, backfill
        );
        AdmissionOutcome::Admitted(AdmissionReport {
            pair,
            refreshed,
            backfill,
        })
    }

    /// Admit every currently tracked pair, baseline included. Pairs that are
    /// already polled report `AlreadyPolling`.
    pub async fn admit_tracked(self: &Arc<Self>) -> Result<Vec<AdmissionOutcome>> {
        let pairs = self.resolver.resolve().await?;
        info!("MarketSyncScheduler: admitting {} tracked pair(s)", pairs.len());
        Ok(self.admit_all(pairs).await)
    }

    /// Admit pairs concurrently and wait for every admission to finish.
    async fn admit_all(self: &Arc<Self>, pairs: Vec<TrackedPair>) -> Vec<AdmissionOutcome> {
        let mut admissions = JoinSet::new();
        for pair in pairs {
            let scheduler = self.clone();
            admissions.spawn(async move { scheduler.admit(&pair.symbol, &pair.currency).await });
        }

        let mut outcomes = Vec::with_capacity(admissions.len());
        while let Some(joined) = admissions.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("MarketSyncScheduler: admission task failed: {}", e),
            }
        }
        outcomes
    }

    async fn execute_cycle(&self, cycle_id: Uuid) -> CycleReport {
        if self.is_shutting_down() {
            debug!("Refresh cycle not started, shutting down");
            return CycleReport::new(cycle_id, CycleOutcome::SkippedShutdown);
        }

        let Some(_guard) = CycleGuard::try_acquire(&self.cycle_running) else {
            warn!("Previous refresh cycle still running, tick skipped");
            self.count_cycle("skipped");
            return CycleReport::new(cycle_id, CycleOutcome::SkippedOverlap);
        };

        let clock = Instant::now();
        let started_at = Utc::now();
        let tick = minute_tick(started_at);
        let mut report = CycleReport::new(cycle_id, CycleOutcome::Completed);

        let pairs = match self.resolver.resolve().await {
            Ok(pairs) => pairs,
            Err(e) => {
                error!("Refresh cycle aborted: {:#}", e);
                self.count_cycle("aborted");
                report.outcome = CycleOutcome::Aborted;
                return report;
            }
        };

        report.pairs = pairs.len();
        report.new_pairs = self.track_new_pairs(&pairs);
        if let Some(metrics) = &self.metrics {
            metrics.tracked_pairs.set(pairs.len() as f64);
        }

        let batches = partition_batches(
            &pairs,
            &self.settings.base_currencies,
            self.settings.batch_size,
        );
        report.batches = batches.len();

        for (index, batch) in batches.iter().enumerate() {
            let book = match self
                .provider
                .fetch_quotes(&batch.symbols, &batch.currencies)
                .await
            {
                Ok(book) => book,
                Err(e) => {
                    warn!(
                        "Batch {}/{} ({} symbols, first {:?}) failed: {}",
                        index + 1,
                        batches.len(),
                        batch.symbols.len(),
                        batch.symbols.first(),
                        e
                    );
                    report.failed_batches += 1;
                    continue;
                }
            };

            for symbol in &batch.symbols {
                match book.get(symbol) {
                    Some(quotes) if !quotes.is_empty() => {
                        let outcome = self.writer.persist(symbol, tick, quotes).await;
                        report.symbols_persisted += 1;
                        report.rows_failed +=
                            outcome.current_failed + usize::from(outcome.history_failed);
                    }
                    _ => {
                        debug!("{} absent from quote response @ {}", symbol, tick);
                        report.symbols_missing += 1;
                    }
                }
            }
        }

        report.dominance = match self.dominance.run_if_due(started_at).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Dominance step failed: {:#}", e);
                None
            }
        };

        if let Some(tokens) = &self.tokens
            && let Err(e) = tokens.refresh_if_due(started_at).await
        {
            warn!("Token catalog refresh failed: {:#}", e);
        }

        self.events.publish(EngineEvent::DataUpdated {
            at: Utc::now(),
            symbols: report.symbols_persisted,
        });

        let elapsed = clock.elapsed();
        self.count_cycle("completed");
        if let Some(metrics) = &self.metrics {
            metrics.cycle_duration_seconds.set(elapsed.as_secs_f64());
        }

        info!(
            "Refresh cycle done in {:?}: {} pair(s), {} batch(es) ({} failed), {} symbol(s) saved, {} missing",
            elapsed,
            report.pairs,
            report.batches,
            report.failed_batches,
            report.symbols_persisted,
            report.symbols_missing
        );
        report
    }

    /// Pairs not seen by the previous cycle. The first cycle only records.
    fn track_new_pairs(&self, pairs: &[TrackedPair]) -> Vec<TrackedPair> {
        let current: BTreeSet<TrackedPair> = pairs.iter().cloned().collect();
        let mut known = lock(&self.known_pairs);
        let new_pairs = match known.as_ref() {
            Some(previous) => current.difference(previous).cloned().collect(),
            None => Vec::new(),
        };
        *known = Some(current);
        new_pairs
    }

    /// Fetch and persist one pair outside the main cycle.
    async fn refresh_pair(&self, pair: &TrackedPair) -> bool {
        let symbols = vec![pair.symbol.clone()];
        let currencies = quote_currencies([pair.currency.as_str()], &self.settings.base_currencies);
        let tick = minute_tick(Utc::now());

        let book = match self.provider.fetch_quotes(&symbols, &currencies).await {
            Ok(book) => book,
            Err(e) => {
                warn!("Refresh of {} @ {} failed: {}", pair, tick, e);
                return false;
            }
        };

        match book.get(&pair.symbol) {
            Some(quotes) if !quotes.is_empty() => {
                let outcome = self.writer.persist(&pair.symbol, tick, quotes).await;
                let persisted = outcome.current_written > 0 || outcome.history_written;
                if persisted {
                    self.events.publish(EngineEvent::DataUpdated {
                        at: Utc::now(),
                        symbols: 1,
                    });
                } else {
                    warn!("Refresh of {} @ {} saved no row", pair, tick);
                }
                persisted
            }
            _ => {
                warn!("No quote for {} @ {}", pair, tick);
                false
            }
        }
    }

    fn spawn_pair_poller(self: &Arc<Self>, pair: TrackedPair) -> PollingHandle {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let scheduler = Arc::downgrade(self);
        let period = self.settings.pair_poll_interval;
        let polled = pair.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(scheduler) = scheduler.upgrade() else { break };
                        scheduler.refresh_pair(&polled).await;
                    }
                    _ = cancel_rx.changed() => break,
                }
            }
            debug!("Polling for {} stopped", polled);
        });

        PollingHandle::new(pair, cancel_tx, task)
    }

    async fn sync_loop(
        scheduler: Weak<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut admitted_at_boot = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let Some(scheduler) = scheduler.upgrade() else {
                break;
            };

            // Before the first cycle writes, so the backfill gate sees the
            // history as it was at boot. Retried on the next tick on failure.
            if !admitted_at_boot {
                match scheduler.admit_tracked().await {
                    Ok(_) => admitted_at_boot = true,
                    Err(e) => warn!("MarketSyncScheduler: startup admission failed: {:#}", e),
                }
            }

            let report = scheduler.run_cycle().await;
            if !report.new_pairs.is_empty() {
                scheduler.admit_all(report.new_pairs).await;
            }
        }
        info!("MarketSyncScheduler: refresh timer stopped");
    }

    async fn valuation_loop(
        scheduler: Weak<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let Some(scheduler) = scheduler.upgrade() else {
                break;
            };
            if scheduler.is_shutting_down() {
                break;
            }
            if let Err(e) = scheduler.run_valuation().await {
                error!("Valuation pass failed: {:#}", e);
            }
        }
        info!("MarketSyncScheduler: valuation timer stopped");
    }

    fn count_cycle(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.sync_cycles_total.with_label_values(&[outcome]).inc();
        }
    }
}

impl Drop for MarketSyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wires the scheduler's collaborators. Provider and repositories are required.
#[derive(Default)]
pub struct MarketSyncSchedulerBuilder {
    provider: Option<Arc<dyn QuoteProvider>>,
    holdings: Option<Arc<dyn HoldingsRepository>>,
    prices: Option<Arc<dyn PriceRepository>>,
    dominance: Option<Arc<dyn DominanceRepository>>,
    valuations: Option<Arc<dyn ValuationRepository>>,
    tokens: Option<Arc<dyn TokenRepository>>,
    events: Option<EventBus>,
    metrics: Option<Metrics>,
    config: SyncEnvConfig,
}

impl MarketSyncSchedulerBuilder {
    pub fn provider(mut self, provider: Arc<dyn QuoteProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn holdings(mut self, holdings: Arc<dyn HoldingsRepository>) -> Self {
        self.holdings = Some(holdings);
        self
    }

    pub fn prices(mut self, prices: Arc<dyn PriceRepository>) -> Self {
        self.prices = Some(prices);
        self
    }

    pub fn dominance(mut self, dominance: Arc<dyn DominanceRepository>) -> Self {
        self.dominance = Some(dominance);
        self
    }

    pub fn valuations(mut self, valuations: Arc<dyn ValuationRepository>) -> Self {
        self.valuations = Some(valuations);
        self
    }

    /// Optional; without it the token catalog is not refreshed.
    pub fn tokens(mut self, tokens: Arc<dyn TokenRepository>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn metrics(mut self, metrics: Option<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(mut self, config: SyncEnvConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Arc<MarketSyncScheduler>> {
        let provider = self.provider.ok_or_else(|| anyhow!("quote provider is required"))?;
        let holdings = self.holdings.ok_or_else(|| anyhow!("holdings repository is required"))?;
        let prices = self.prices.ok_or_else(|| anyhow!("price repository is required"))?;
        let dominance = self
            .dominance
            .ok_or_else(|| anyhow!("dominance repository is required"))?;
        let valuations = self
            .valuations
            .ok_or_else(|| anyhow!("valuation repository is required"))?;

        let config = self.config;
        let metrics = self.metrics;
        let baseline = TrackedPair::new(&config.baseline_symbol, &config.baseline_currency);

        let writer = Arc::new(PriceWriter::new(prices.clone(), metrics.clone()));
        let tokens = match self.tokens {
            Some(repo) if config.token_catalog_enabled => Some(TokenCatalog::new(
                provider.clone(),
                repo,
                metrics.clone(),
            )),
            _ => None,
        };

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(MarketSyncScheduler {
            resolver: TrackedPairResolver::new(holdings.clone(), baseline),
            backfiller: HistoryBackfiller::new(
                provider.clone(),
                prices.clone(),
                writer.clone(),
                metrics.clone(),
                config.backfill_staleness_days,
                config.backfill_depth_days,
            ),
            dominance: DominanceSampler::new(
                provider.clone(),
                dominance,
                metrics.clone(),
                config.dominance_top_n,
            ),
            valuation: ValuationEngine::new(
                holdings,
                prices,
                valuations,
                config.base_currencies.clone(),
                metrics.clone(),
            ),
            settings: SchedulerSettings::from(&config),
            provider,
            writer,
            tokens,
            events: self.events.unwrap_or_default(),
            metrics,
            cycle_running: AtomicBool::new(false),
            started: AtomicBool::new(false),
            known_pairs: Mutex::new(None),
            handles: Mutex::new(HashMap::new()),
            timers: Mutex::new(Vec::new()),
            shutdown_tx,
        }))
    }
}
