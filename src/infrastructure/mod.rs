pub mod core;
pub mod cryptocompare;
pub mod event_bus;
pub mod mock;
pub mod observability;
pub mod persistence;

pub use event_bus::EventBus;
pub use mock::MockQuoteProvider;
