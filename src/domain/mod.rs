// Event signals for subscribers
pub mod events;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;

// Persisted rows
pub mod snapshots;

// Core market types
pub mod types;

// Domain-specific error types
pub mod errors;
