//! Gate event system.

use tokio::sync::broadcast;

/// Events emitted by the payment gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// A 402 was issued with a fresh reference.
    PaymentRequired {
        /// Reference the client must bind its payment to.
        reference: String,
    },

    /// A request was admitted from the settlement cache.
    CacheHit {
        /// Settled reference.
        reference: String,
    },

    /// A client transaction was broadcast.
    Submitted {
        /// Reference it pays.
        reference: String,
        /// Broadcast signature.
        signature: String,
    },

    /// A payment was confirmed and cached.
    Settled {
        /// Settled reference.
        reference: String,
        /// Settlement signature.
        signature: String,
    },

    /// A proof was rejected.
    Rejected {
        /// Reference carried by the proof, if any could be read.
        reference: Option<String>,
        /// Why it was rejected. Never shown to the client.
        reason: String,
    },

    /// The sweeper pruned expired state.
    CacheSwept {
        /// Settlement cache entries removed.
        settlements: usize,
        /// Lapsed requirements removed.
        requirements: usize,
    },
}

/// Channel for receiving gate events.
pub type GateEventsChannel = broadcast::Receiver<GateEvent>;

/// Sender for gate events.
pub type GateEventsSender = broadcast::Sender<GateEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (GateEventsSender, GateEventsChannel) {
    broadcast::channel(256)
}
