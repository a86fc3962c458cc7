//! Session context
//!
//! Identity of a connected client, carried through log fields.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Read-only information about a connected client
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique session ID
    pub session_id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// When the client connected
    pub connected_at: Instant,
}

impl SessionContext {
    /// Create a new context
    pub fn new(session_id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            session_id,
            peer_addr,
            connected_at: Instant::now(),
        }
    }

    /// Time since the client connected
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
