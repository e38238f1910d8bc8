pub mod bootstrap;

// Refresh building blocks: pair resolution, batching, persistence, backfill
pub mod market_data;

// Scheduler, timers and admission
pub mod sync;

pub mod valuation;

// System orchestrator
pub mod system;
