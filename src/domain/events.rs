use chrono::{DateTime, Utc};
use serde::Serialize;

/// Signals broadcast to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Price data changed: emitted once per refresh cycle and after each
    /// refresh of an admitted pair.
    DataUpdated {
        at: DateTime<Utc>,
        symbols: usize,
    },
}

impl EngineEvent {
    /// Wire name of the event as seen by subscribers.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::DataUpdated { .. } => "dataUpdated",
        }
    }
}
