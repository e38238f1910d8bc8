//! Push-only observability for the sync engine.
//!
//! Counters and gauges live in a Prometheus registry; a reporter task logs them
//! as one JSON line per interval. Nothing listens for incoming requests.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
