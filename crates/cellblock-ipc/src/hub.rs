//! Event fan-out

use cellblock_api::{Event, EventPayload};
use tokio::sync::broadcast;

/// Events a subscriber may fall behind by before it starts missing some
const EVENT_BACKLOG: usize = 256;

/// Publishes engine notifications and host directives to every subscribed
/// connection
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Event>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BACKLOG);
        Self { tx }
    }

    /// Stamp and publish a payload
    pub fn publish(&self, payload: EventPayload) {
        self.emit(Event::new(payload));
    }

    /// Publish a built event; dropped when nobody is listening
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Live connections receiving events
    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
