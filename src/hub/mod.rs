//! Progress hub: local fan-out of serialized progress envelopes to observers.

pub mod ws;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

pub use ws::hub_routes;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Broadcast sink. Every subscriber receives every value published after it subscribed.
pub struct ProgressHub {
    tx: broadcast::Sender<String>,
}

impl ProgressHub {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(capacity);
        Arc::new(Self { tx })
    }

    /// Subscribe to future envelopes. Each observer connection calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Push an envelope to all current subscribers.
    pub fn publish(&self, envelope: String) {
        // Ok if nobody is listening
        let delivered = self.tx.send(envelope).unwrap_or(0);
        trace!(observers = delivered, "Progress envelope published");
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
