//! Price-updated notifications.
//!
//! Fan-out is a `tokio::sync::broadcast` channel: publishing never blocks
//! the worker that stores the snapshot, and a receiver that falls behind
//! loses its oldest events instead of slowing anyone else down.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use crate::{InstrumentId, PriceSnapshot};

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdateEvent {
    pub instrument: InstrumentId,
    pub snapshot: Arc<PriceSnapshot>,
}

#[derive(Debug, Clone)]
pub struct PriceEventBus {
    sender: broadcast::Sender<PriceUpdateEvent>,
}

impl Default for PriceEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl PriceEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Registers a listener. Events published before this call are not seen.
    pub fn subscribe(&self) -> broadcast::Receiver<PriceUpdateEvent> {
        self.sender.subscribe()
    }

    /// Best-effort publish. Returns the number of listeners reached.
    pub fn publish(&self, instrument: InstrumentId, snapshot: Arc<PriceSnapshot>) -> usize {
        match self.sender.send(PriceUpdateEvent {
            instrument,
            snapshot,
        }) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(instrument = %event.instrument, "no price listeners registered");
                0
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
