use crate::domain::events::EngineEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Fire-and-forget fan-out of engine events to live subscribers.
///
/// Publishing with nobody listening is not an error. Slow subscribers that fall
/// more than `capacity` events behind lose the oldest ones.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; returns how many subscribers it reached.
    pub fn publish(&self, event: EngineEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(reached) => {
                debug!("EventBus: '{}' delivered to {} subscriber(s)", name, reached);
                reached
            }
            Err(_) => {
                debug!("EventBus: '{}' dropped, no subscribers", name);
                0
            }
        }
    }

    /// Get count of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
