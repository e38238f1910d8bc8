pub mod valuation_engine;

pub use valuation_engine::{ValuationEngine, ValuationReport, value_portfolios};
