//! Push-based metrics reporter for folio-sync
//!
//! Periodically outputs metrics as structured JSON through the log pipeline.
//!
//! **Security**: This system only SENDS data, never accepts requests.

use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

/// Metrics snapshot for JSON output
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub sync: SyncSnapshot,
    pub storage: StorageSnapshot,
}

#[derive(Debug, Serialize)]
pub struct SyncSnapshot {
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub cycles_aborted: u64,
    pub tracked_pairs: u64,
    pub polling_handles: u64,
    pub last_cycle_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct StorageSnapshot {
    pub current_prices_written: u64,
    pub historical_points_written: u64,
    pub valuations_written: u64,
    pub dominance_samples_written: u64,
    pub write_failures: u64,
}

const TABLES: [&str; 6] = [
    "current_prices",
    "historical_data",
    "portfolio_values",
    "market_dominance",
    "aggregated_data",
    "supported_tokens",
];

/// Push-based metrics reporter
///
/// Outputs metrics as structured JSON logs on a configurable interval.
/// No HTTP server, no incoming connections - only outbound data.
pub struct MetricsReporter {
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }

    /// Run the reporter until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "MetricsReporter: Starting push-based metrics (interval: {:?})",
            self.interval
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("MetricsReporter: Stopped");
                        return;
                    }
                    continue;
                }
            }

            let snapshot = self.collect_snapshot();
            match serde_json::to_string(&snapshot) {
                Ok(json) => {
                    // Special prefix so log shippers can pick these lines out
                    info!(target: "metrics", "METRICS_JSON:{}", json);
                }
                Err(e) => warn!("Failed to serialize metrics: {}", e),
            }
        }
    }

    /// Collect current metrics snapshot
    pub fn collect_snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        self.metrics.uptime_seconds.set(uptime as f64);

        let write_failures = TABLES
            .iter()
            .map(|table| self.metrics.write_failures(table))
            .sum();

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            sync: SyncSnapshot {
                cycles_completed: self.metrics.cycles("completed"),
                cycles_skipped: self.metrics.cycles("skipped"),
                cycles_aborted: self.metrics.cycles("aborted"),
                tracked_pairs: self.metrics.tracked_pairs.get() as u64,
                polling_handles: self.metrics.polling_handles.get() as u64,
                last_cycle_seconds: self.metrics.cycle_duration_seconds.get(),
            },
            storage: StorageSnapshot {
                current_prices_written: self.metrics.rows_written("current_prices"),
                historical_points_written: self.metrics.rows_written("historical_data"),
                valuations_written: self.metrics.rows_written("portfolio_values"),
                dominance_samples_written: self.metrics.rows_written("market_dominance"),
                write_failures,
            },
        }
    }
}
