// Market data refresh building blocks
pub mod batching;
pub mod dominance_sampler;
pub mod history_backfill;
pub mod price_writer;
pub mod token_catalog;
pub mod tracked_pairs;
