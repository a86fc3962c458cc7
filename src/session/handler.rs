//! Per-client session handling
//!
//! Transport independent: the WebSocket loop feeds events in and sends
//! whatever comes back out. Every client is subscribed to the broadcast
//! channel on connect; the only command it can send is `get_init`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::broadcast::{BroadcastChannel, Subscription};
use crate::segment::SegmentStore;
use crate::stats::RelayMetrics;

use super::context::SessionContext;

/// The literal text command requesting the init segment
pub const GET_INIT: &str = "get_init";

/// Commands a client may send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    /// Send me the initialization segment
    GetInit,
}

impl ClientCommand {
    /// Parse a text message; anything but an exact command is `None`
    pub fn parse(text: &str) -> Option<Self> {
        (text == GET_INIT).then_some(ClientCommand::GetInit)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Accepted, not yet a channel member
    Connected,
    /// Member of the broadcast channel
    Subscribed,
    /// Closed; channel membership released
    Disconnected,
}

/// Creates sessions bound to the shared store and channel
///
/// Cheap to clone; one clone per connection task.
#[derive(Debug, Clone)]
pub struct SessionHandler {
    store: Arc<SegmentStore>,
    channel: BroadcastChannel,
    metrics: Arc<RelayMetrics>,
    next_session_id: Arc<AtomicU64>,
}

impl SessionHandler {
    /// Create a handler
    pub fn new(
        store: Arc<SegmentStore>,
        channel: BroadcastChannel,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            store,
            channel,
            metrics,
            next_session_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The broadcast channel sessions join
    pub fn channel(&self) -> &BroadcastChannel {
        &self.channel
    }

    /// Accept a client and subscribe it to the broadcast channel
    ///
    /// The subscription is returned separately so the transport can await
    /// fragments while still handling messages through the session.
    pub fn connect(&self, peer_addr: SocketAddr) -> (Session, Subscription) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.metrics.session_opened();

        let mut session = Session {
            context: SessionContext::new(session_id, peer_addr),
            phase: SessionPhase::Connected,
            store: Arc::clone(&self.store),
            metrics: Arc::clone(&self.metrics),
        };

        let subscription = self.channel.subscribe();
        session.phase = SessionPhase::Subscribed;

        tracing::info!(
            session_id = session_id,
            peer = %peer_addr,
            channel = self.channel.name(),
            subscribers = self.channel.subscriber_count(),
            "Client connected, subscribed to broadcast"
        );

        (session, subscription)
    }
}

/// State of one connected client
#[derive(Debug)]
pub struct Session {
    context: SessionContext,
    phase: SessionPhase,
    store: Arc<SegmentStore>,
    metrics: Arc<RelayMetrics>,
}

impl Session {
    /// Session ID
    pub fn id(&self) -> u64 {
        self.context.session_id
    }

    /// Client information
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Handle a text message, returning a payload to unicast back
    ///
    /// `get_init` yields the init segment once the store is ready. Before
    /// that, and for any other text, nothing is returned.
    pub fn on_text(&mut self, text: &str) -> Option<Bytes> {
        if self.phase == SessionPhase::Disconnected {
            return None;
        }

        match ClientCommand::parse(text) {
            Some(ClientCommand::GetInit) => self.init_segment(),
            None => {
                tracing::trace!(
                    session_id = self.id(),
                    len = text.len(),
                    "Ignoring unrecognized text message"
                );
                None
            }
        }
    }

    /// Handle a binary message; clients have no binary commands
    pub fn on_binary(&mut self, data: &[u8]) -> Option<Bytes> {
        tracing::trace!(
            session_id = self.id(),
            len = data.len(),
            "Ignoring binary message"
        );
        None
    }

    /// Note that the subscription skipped `skipped` fragments
    pub fn on_lagged(&self, skipped: u64) {
        self.metrics.record_lagged(skipped);
        tracing::warn!(
            session_id = self.id(),
            skipped = skipped,
            "Client fell behind, fragments skipped"
        );
    }

    /// Leave the broadcast channel and mark the session closed
    pub fn disconnect(&mut self, subscription: Subscription) {
        drop(subscription);
        self.close();
    }

    fn init_segment(&self) -> Option<Bytes> {
        let reply = self
            .store
            .snapshot_init()
            .into_bytes()
            .filter(|bytes| !bytes.is_empty());

        self.metrics.record_init_request(reply.is_some());

        match &reply {
            Some(bytes) => tracing::debug!(
                session_id = self.id(),
                bytes = bytes.len(),
                "Sending init segment"
            ),
            None => tracing::debug!(session_id = self.id(), "Init segment not ready yet"),
        }

        reply
    }

    fn close(&mut self) {
        if self.phase == SessionPhase::Disconnected {
            return;
        }
        self.phase = SessionPhase::Disconnected;
        self.metrics.session_closed();

        tracing::info!(
            session_id = self.id(),
            peer = %self.context.peer_addr,
            duration_secs = self.context.duration().as_secs(),
            "Client disconnected"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
