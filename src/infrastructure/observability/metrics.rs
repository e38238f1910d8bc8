//! Prometheus metrics definitions for folio-sync
//!
//! All metrics use the `folio_sync_` prefix and are read-only.

use prometheus::{
    CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

/// Prometheus metrics for the sync engine
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Refresh cycles by outcome (completed, skipped, aborted)
    pub sync_cycles_total: CounterVec,
    /// Provider requests by endpoint and outcome
    pub provider_requests_total: CounterVec,
    /// Provider request latency in seconds
    pub provider_latency_seconds: HistogramVec,
    /// Rows written by table
    pub rows_written_total: CounterVec,
    /// Row writes that failed, by table
    pub write_failures_total: CounterVec,
    /// Tracked pairs seen by the last cycle
    pub tracked_pairs: GenericGauge<AtomicF64>,
    /// Live polling handles
    pub polling_handles: GenericGauge<AtomicF64>,
    /// Duration of the last refresh cycle
    pub cycle_duration_seconds: GenericGauge<AtomicF64>,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let sync_cycles_total = CounterVec::new(
            Opts::new("folio_sync_cycles_total", "Refresh cycles by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(sync_cycles_total.clone()))?;

        let provider_requests_total = CounterVec::new(
            Opts::new(
                "folio_sync_provider_requests_total",
                "Market-data requests by endpoint and outcome",
            ),
            &["endpoint", "outcome"],
        )?;
        registry.register(Box::new(provider_requests_total.clone()))?;

        let provider_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "folio_sync_provider_latency_seconds",
                "Market-data request latency in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["endpoint"],
        )?;
        registry.register(Box::new(provider_latency_seconds.clone()))?;

        let rows_written_total = CounterVec::new(
            Opts::new("folio_sync_rows_written_total", "Rows written by table"),
            &["table"],
        )?;
        registry.register(Box::new(rows_written_total.clone()))?;

        let write_failures_total = CounterVec::new(
            Opts::new(
                "folio_sync_write_failures_total",
                "Failed row writes by table",
            ),
            &["table"],
        )?;
        registry.register(Box::new(write_failures_total.clone()))?;

        let tracked_pairs = Gauge::with_opts(Opts::new(
            "folio_sync_tracked_pairs",
            "Tracked (symbol, currency) pairs in the last cycle",
        ))?;
        registry.register(Box::new(tracked_pairs.clone()))?;

        let polling_handles = Gauge::with_opts(Opts::new(
            "folio_sync_polling_handles",
            "Admitted pairs with a live polling handle",
        ))?;
        registry.register(Box::new(polling_handles.clone()))?;

        let cycle_duration_seconds = Gauge::with_opts(Opts::new(
            "folio_sync_cycle_duration_seconds",
            "Duration of the last refresh cycle",
        ))?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "folio_sync_uptime_seconds",
            "Process uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            sync_cycles_total,
            provider_requests_total,
            provider_latency_seconds,
            rows_written_total,
            write_failures_total,
            tracked_pairs,
            polling_handles,
            cycle_duration_seconds,
            uptime_seconds,
        })
    }

    pub fn record_write(&self, table: &str, ok: bool) {
        if ok {
            self.rows_written_total.with_label_values(&[table]).inc();
        } else {
            self.write_failures_total.with_label_values(&[table]).inc();
        }
    }

    pub fn cycles(&self, outcome: &str) -> u64 {
        self.sync_cycles_total.with_label_values(&[outcome]).get() as u64
    }

    pub fn rows_written(&self, table: &str) -> u64 {
        self.rows_written_total.with_label_values(&[table]).get() as u64
    }

    pub fn write_failures(&self, table: &str) -> u64 {
        self.write_failures_total.with_label_values(&[table]).get() as u64
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}
