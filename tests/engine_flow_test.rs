use folio_sync::application::market_data::dominance_sampler::DominanceOutcome;
use folio_sync::application::sync::{CycleOutcome, MarketSyncScheduler};
use folio_sync::config::SyncEnvConfig;
use folio_sync::domain::events::EngineEvent;
use folio_sync::domain::ports::QuoteProvider;
use folio_sync::domain::repositories::{DominanceRepository, PriceRepository, ValuationRepository};
use folio_sync::domain::types::TrackedPair;
use folio_sync::infrastructure::EventBus;
use folio_sync::infrastructure::mock::{MockEndpoint, MockQuoteProvider};
use folio_sync::infrastructure::persistence::Database;
use folio_sync::infrastructure::persistence::repositories::{
    SqliteDominanceRepository, SqliteHoldingsRepository, SqlitePriceRepository,
    SqliteTokenRepository, SqliteValuationRepository,
};
use rust_decimal_macros::dec;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

struct Engine {
    db: Database,
    events: EventBus,
    prices: Arc<SqlitePriceRepository>,
    scheduler: Arc<MarketSyncScheduler>,
}

async fn engine(provider: &MockQuoteProvider) -> Engine {
    let db = Database::in_memory().await.unwrap();
    let events = EventBus::default();
    let prices = Arc::new(SqlitePriceRepository::new(db.pool.clone()));

    let scheduler = MarketSyncScheduler::builder()
        .provider(Arc::new(provider.clone()) as Arc<dyn QuoteProvider>)
        .holdings(Arc::new(SqliteHoldingsRepository::new(db.pool.clone())))
        .prices(prices.clone())
        .dominance(Arc::new(SqliteDominanceRepository::new(db.pool.clone())))
        .valuations(Arc::new(SqliteValuationRepository::new(db.pool.clone())))
        .tokens(Arc::new(SqliteTokenRepository::new(db.pool.clone())))
        .events(events.clone())
        .config(SyncEnvConfig::default())
        .build()
        .unwrap();

    Engine {
        db,
        events,
        prices,
        scheduler,
    }
}

async fn add_portfolio(pool: &SqlitePool, user_id: i64, portfolio_id: i64) {
    sqlx::query("INSERT OR IGNORE INTO users (id, username) VALUES (?, ?)")
        .bind(user_id)
        .bind(format!("user{}", user_id))
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO portfolios (id, user_id, name) VALUES (?, ?, 'main')")
        .bind(portfolio_id)
        .bind(user_id)
        .execute(pool)
        .await
        .unwrap();
}

async fn add_holding(
    pool: &SqlitePool,
    user_id: i64,
    portfolio_id: i64,
    symbol: &str,
    currency: &str,
    amount: f64,
) {
    sqlx::query(
        "INSERT INTO user_cryptos (user_id, crypto_symbol, purchase_currency, amount, portfolio_id)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(symbol)
    .bind(currency)
    .bind(amount)
    .bind(portfolio_id)
    .execute(pool)
    .await
    .unwrap();
}

async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

fn market() -> MockQuoteProvider {
    MockQuoteProvider::new()
        .with_price("BTC", "USD", dec!(50000))
        .with_price("BTC", "EUR", dec!(46000))
        .with_price("BTC", "BTC", dec!(1))
        .with_price("ETH", "USD", dec!(3000))
        .with_price("ETH", "EUR", dec!(2760))
        .with_price("ETH", "BTC", dec!(0.06))
}

#[tokio::test]
async fn test_cycle_persists_current_prices_and_history() {
    let provider = market();
    let e = engine(&provider).await;
    add_portfolio(&e.db.pool, 1, 10).await;
    add_holding(&e.db.pool, 1, 10, "ETH", "USD", 1.0).await;

    let report = e.scheduler.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::Completed);
    // ETH/USD plus the BTC/USD baseline
    assert_eq!(report.pairs, 2);
    assert_eq!(report.symbols_persisted, 2);
    assert_eq!(report.rows_failed, 0);

    let current = e
        .prices
        .current_prices_for(&["ETH".to_string()])
        .await
        .unwrap();
    assert_eq!(current.len(), 3);
    let usd = current.iter().find(|p| p.currency == "USD").unwrap();
    assert_eq!(usd.price, dec!(3000));

    assert!(
        e.prices
            .latest_historical_timestamp("ETH")
            .await
            .unwrap()
            .is_some()
    );
    assert_eq!(count(&e.db.pool, "aggregated_data").await, 2);
}

#[tokio::test]
async fn test_repeated_cycles_do_not_duplicate_rows() {
    let provider = market();
    let e = engine(&provider).await;
    add_portfolio(&e.db.pool, 1, 10).await;
    add_holding(&e.db.pool, 1, 10, "ETH", "USD", 1.0).await;

    e.scheduler.run_cycle().await;
    let current_after_first = count(&e.db.pool, "current_prices").await;
    e.scheduler.run_cycle().await;
    e.scheduler.run_cycle().await;

    assert_eq!(count(&e.db.pool, "current_prices").await, current_after_first);
    assert_eq!(current_after_first, 6);
    // One point per symbol and minute; a minute boundary may add one more
    assert!(count(&e.db.pool, "historical_data").await <= 4);
    assert_eq!(count(&e.db.pool, "aggregated_data").await, 2);
}

#[tokio::test]
async fn test_quote_requests_never_exceed_one_hundred_symbols() {
    let provider = market();
    let e = engine(&provider).await;
    add_portfolio(&e.db.pool, 1, 10).await;
    add_holding(&e.db.pool, 1, 10, "BTC", "USD", 1.0).await;
    for i in 1..250 {
        add_holding(&e.db.pool, 1, 10, &format!("TK{:03}", i), "USD", 1.0).await;
    }

    let report = e.scheduler.run_cycle().await;

    assert_eq!(report.pairs, 250);
    assert_eq!(report.batches, 3);
    assert_eq!(provider.quote_batch_sizes(), vec![100, 100, 50]);
    assert_eq!(report.symbols_persisted, 1);
    assert_eq!(report.symbols_missing, 249);

    let calls = provider.calls();
    assert!(calls.quote_batches.iter().all(|b| b.len() <= 100));
    assert!(
        calls
            .quote_currencies
            .iter()
            .all(|c| c == &vec!["BTC".to_string(), "EUR".to_string(), "USD".to_string()])
    );
}

#[tokio::test]
async fn test_pairs_dedup_across_users_and_case() {
    let provider = market();
    let e = engine(&provider).await;
    add_portfolio(&e.db.pool, 1, 10).await;
    add_portfolio(&e.db.pool, 2, 20).await;
    add_holding(&e.db.pool, 1, 10, "BTC", "USD", 1.0).await;
    add_holding(&e.db.pool, 2, 20, "btc", "usd", 0.5).await;
    add_holding(&e.db.pool, 2, 20, "BTC", "EUR", 2.0).await;

    let report = e.scheduler.run_cycle().await;

    assert_eq!(report.pairs, 2);
    // Both pairs share one symbol, so a single one-symbol request
    assert_eq!(provider.quote_batch_sizes(), vec![1]);
}

#[tokio::test]
async fn test_valuation_from_stored_prices() {
    let provider = market();
    let e = engine(&provider).await;
    add_portfolio(&e.db.pool, 1, 10).await;
    add_holding(&e.db.pool, 1, 10, "BTC", "USD", 2.0).await;
    add_holding(&e.db.pool, 1, 10, "ETH", "USD", 10.0).await;
    // Unknown to the provider: contributes zero
    add_holding(&e.db.pool, 1, 10, "NOPE", "USD", 5.0).await;

    e.scheduler.run_cycle().await;
    let report = e.scheduler.run_valuation().await.unwrap();

    assert_eq!(report.users, 1);
    assert_eq!(report.failed_users, 0);
    assert_eq!(report.snapshots, 2);

    let valuations = SqliteValuationRepository::new(e.db.pool.clone());
    let usd = valuations
        .latest_for_portfolio(10, "USD")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(usd.value, dec!(130000));
    assert_eq!(usd.user_id, 1);

    let eur = valuations
        .latest_for_portfolio(10, "EUR")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(eur.value, dec!(119600));
}

#[tokio::test]
async fn test_valuation_is_append_only() {
    let provider = market();
    let e = engine(&provider).await;
    add_portfolio(&e.db.pool, 1, 10).await;
    add_holding(&e.db.pool, 1, 10, "BTC", "USD", 1.0).await;

    e.scheduler.run_cycle().await;
    e.scheduler.run_valuation().await.unwrap();
    e.scheduler.run_valuation().await.unwrap();

    assert_eq!(count(&e.db.pool, "portfolio_values").await, 4);
}

#[tokio::test]
async fn test_missing_currency_does_not_block_other_rows() {
    let provider = market();
    provider.omit_quote("ETH", "EUR");
    let e = engine(&provider).await;
    add_portfolio(&e.db.pool, 1, 10).await;
    add_holding(&e.db.pool, 1, 10, "ETH", "EUR", 1.0).await;

    let report = e.scheduler.run_cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Completed);

    let eth = e
        .prices
        .current_prices_for(&["ETH".to_string()])
        .await
        .unwrap();
    assert!(eth.iter().any(|p| p.currency == "USD"));
    assert!(!eth.iter().any(|p| p.currency == "EUR"));

    let btc = e
        .prices
        .current_prices_for(&["BTC".to_string()])
        .await
        .unwrap();
    assert!(btc.iter().any(|p| p.currency == "EUR"));
}

#[tokio::test]
async fn test_failed_batch_does_not_abort_cycle() {
    let provider = MockQuoteProvider::demo();
    provider.fail_endpoint(MockEndpoint::Quotes);
    let e = engine(&provider).await;
    let mut rx = e.events.subscribe();

    let report = e.scheduler.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.batches, 1);
    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.symbols_persisted, 0);
    assert_eq!(report.dominance, Some(DominanceOutcome::Sampled { assets: 4 }));
    assert!(matches!(
        rx.try_recv(),
        Ok(EngineEvent::DataUpdated { symbols: 0, .. })
    ));

    provider.recover_endpoint(MockEndpoint::Quotes);
    let report = e.scheduler.run_cycle().await;
    assert_eq!(report.symbols_persisted, 1);
}

#[tokio::test]
async fn test_unreadable_holdings_abort_cycle_without_event() {
    let provider = market();
    let e = engine(&provider).await;
    let mut rx = e.events.subscribe();
    sqlx::query("DROP TABLE user_cryptos")
        .execute(&e.db.pool)
        .await
        .unwrap();

    let report = e.scheduler.run_cycle().await;

    assert_eq!(report.outcome, CycleOutcome::Aborted);
    assert!(provider.quote_batch_sizes().is_empty());
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_dominance_sampled_once_per_day() {
    let provider = MockQuoteProvider::demo();
    let e = engine(&provider).await;

    let first = e.scheduler.run_cycle().await;
    let second = e.scheduler.run_cycle().await;

    assert_eq!(first.dominance, Some(DominanceOutcome::Sampled { assets: 4 }));
    assert_eq!(second.dominance, Some(DominanceOutcome::AlreadySampled));
    assert_eq!(provider.global_cap_calls(), 1);

    let dominance = SqliteDominanceRepository::new(e.db.pool.clone());
    let today = chrono::Utc::now().date_naive();
    let samples = dominance.samples_for_date(today).await.unwrap();
    assert_eq!(samples.len(), 4);
    assert_eq!(samples[0].symbol, "BTC");
    // 1.28T of 2.4T
    assert!((samples[0].dominance_percentage - dec!(53.33)).abs() < dec!(0.01));
}

#[tokio::test]
async fn test_token_catalog_filled_on_first_cycle() {
    let provider = MockQuoteProvider::demo();
    let e = engine(&provider).await;

    e.scheduler.run_cycle().await;
    e.scheduler.run_cycle().await;

    assert_eq!(count(&e.db.pool, "supported_tokens").await, 4);
    assert_eq!(provider.calls().coin_list_calls, 1);
}

#[tokio::test]
async fn test_cycle_publishes_data_updated() {
    let provider = market();
    let e = engine(&provider).await;
    let mut rx = e.events.subscribe();

    e.scheduler.run_cycle().await;

    match rx.try_recv() {
        Ok(EngineEvent::DataUpdated { symbols, .. }) => assert_eq!(symbols, 1),
        other => panic!("expected dataUpdated, got {:?}", other),
    }
}

#[tokio::test]
async fn test_new_pairs_reported_after_first_cycle() {
    let provider = market();
    let e = engine(&provider).await;
    add_portfolio(&e.db.pool, 1, 10).await;
    add_holding(&e.db.pool, 1, 10, "BTC", "USD", 1.0).await;

    let first = e.scheduler.run_cycle().await;
    assert!(first.new_pairs.is_empty());

    add_holding(&e.db.pool, 1, 10, "ETH", "EUR", 1.0).await;
    let second = e.scheduler.run_cycle().await;
    assert_eq!(second.new_pairs, vec![TrackedPair::new("ETH", "EUR")]);

    let third = e.scheduler.run_cycle().await;
    assert!(third.new_pairs.is_empty());
}
