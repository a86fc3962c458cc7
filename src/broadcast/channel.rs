//! Single named broadcast channel
//!
//! Thin wrapper over `tokio::sync::broadcast`. `Bytes` is reference counted,
//! so every subscriber shares one allocation per fragment.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;

/// Channel name used by the relay
pub const DEFAULT_CHANNEL_NAME: &str = "broadcast";

/// Fragments buffered per subscriber before it starts lagging
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Fan-out channel every session subscribes to
#[derive(Debug, Clone)]
pub struct BroadcastChannel {
    name: Arc<str>,
    tx: broadcast::Sender<Bytes>,
}

impl BroadcastChannel {
    /// Create a channel buffering up to `capacity` payloads per subscriber
    pub fn new(name: &str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));

        Self {
            name: Arc::from(name),
            tx,
        }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish one payload to every current subscriber
    ///
    /// Returns the number of subscribers it was queued for; with no
    /// subscribers the payload is discarded and 0 is returned.
    pub fn publish(&self, payload: Bytes) -> usize {
        self.tx.send(payload).unwrap_or(0)
    }

    /// Join the channel; only payloads published from now on are received
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_NAME, DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

/// Result of waiting on a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Next payload in publish order
    Payload(Bytes),
    /// The subscriber fell behind and this many payloads were skipped
    Lagged(u64),
    /// The channel was dropped
    Closed,
}

/// Membership in a [`BroadcastChannel`]; dropping it leaves the channel
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Bytes>,
}

impl Subscription {
    /// Wait for the next delivery
    ///
    /// Cancel safe, so it can be used as a `tokio::select!` branch.
    pub async fn recv(&mut self) -> Delivery {
        match self.rx.recv().await {
            Ok(payload) => Delivery::Payload(payload),
            Err(broadcast::error::RecvError::Lagged(n)) => Delivery::Lagged(n),
            Err(broadcast::error::RecvError::Closed) => Delivery::Closed,
        }
    }
}
