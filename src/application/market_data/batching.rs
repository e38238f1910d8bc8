use crate::config::MAX_QUOTE_BATCH_SIZE;
use crate::domain::types::TrackedPair;
use std::collections::{BTreeMap, BTreeSet};

/// Currency every quote request asks for, so history can carry a BTC cross rate.
pub const CROSS_RATE_CURRENCY: &str = "BTC";

/// One provider call: a bounded symbol list and the currencies to quote them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteBatch {
    pub symbols: Vec<String>,
    pub currencies: Vec<String>,
}

/// Currencies to request for a set of tracked currencies: those plus the base
/// currencies plus the BTC cross rate, sorted and deduplicated.
pub fn quote_currencies<'a>(
    tracked: impl IntoIterator<Item = &'a str>,
    base_currencies: &[String],
) -> Vec<String> {
    let mut currencies: BTreeSet<String> = tracked.into_iter().map(str::to_string).collect();
    currencies.extend(base_currencies.iter().cloned());
    currencies.insert(CROSS_RATE_CURRENCY.to_string());
    currencies.into_iter().collect()
}

/// Split tracked pairs into provider calls of at most `batch_size` distinct
/// symbols.
///
/// Every symbol lands in exactly one batch. A batch asks for the currencies its
/// own pairs need (see [`quote_currencies`]).
pub fn partition_batches(
    pairs: &[TrackedPair],
    base_currencies: &[String],
    batch_size: usize,
) -> Vec<QuoteBatch> {
    let batch_size = batch_size.clamp(1, MAX_QUOTE_BATCH_SIZE);

    let mut by_symbol: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for pair in pairs {
        by_symbol
            .entry(pair.symbol.as_str())
            .or_default()
            .insert(pair.currency.as_str());
    }

    let symbols: Vec<(&str, BTreeSet<&str>)> = by_symbol.into_iter().collect();
    symbols
        .chunks(batch_size)
        .map(|chunk| QuoteBatch {
            symbols: chunk.iter().map(|(s, _)| s.to_string()).collect(),
            currencies: quote_currencies(
                chunk.iter().flat_map(|(_, c)| c.iter().copied()),
                base_currencies,
            ),
        })
        .collect()
}
