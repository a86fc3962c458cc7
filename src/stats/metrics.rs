//! Statistics and metrics for the relay

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters shared by the scheduler and every session
///
/// Updated with relaxed atomics; readers take a [`RelayStats`] snapshot.
#[derive(Debug)]
pub struct RelayMetrics {
    started_at: Instant,
    sessions_active: AtomicU64,
    sessions_total: AtomicU64,
    fragments_published: AtomicU64,
    bytes_published: AtomicU64,
    init_requests: AtomicU64,
    init_replies: AtomicU64,
    fragments_lagged: AtomicU64,
}

impl RelayMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            sessions_active: AtomicU64::new(0),
            sessions_total: AtomicU64::new(0),
            fragments_published: AtomicU64::new(0),
            bytes_published: AtomicU64::new(0),
            init_requests: AtomicU64::new(0),
            init_replies: AtomicU64::new(0),
            fragments_lagged: AtomicU64::new(0),
        }
    }

    /// A session connected
    pub fn session_opened(&self) {
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A session disconnected
    pub fn session_closed(&self) {
        // Saturate instead of wrapping if closes ever outnumber opens
        let _ = self
            .sessions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    /// The scheduler published `fragments` totalling `bytes`
    pub fn record_publish(&self, fragments: u64, bytes: u64) {
        self.fragments_published.fetch_add(fragments, Ordering::Relaxed);
        self.bytes_published.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A client asked for the init segment
    pub fn record_init_request(&self, replied: bool) {
        self.init_requests.fetch_add(1, Ordering::Relaxed);
        if replied {
            self.init_replies.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A subscriber fell behind and skipped `count` fragments
    pub fn record_lagged(&self, count: u64) {
        self.fragments_lagged.fetch_add(count, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot
    pub fn snapshot(&self) -> RelayStats {
        RelayStats {
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            fragments_published: self.fragments_published.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            init_requests: self.init_requests.load(Ordering::Relaxed),
            init_replies: self.init_replies.load(Ordering::Relaxed),
            fragments_lagged: self.fragments_lagged.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay-wide statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Sessions currently connected
    pub sessions_active: u64,
    /// Sessions ever connected
    pub sessions_total: u64,
    /// Fragments handed to the broadcast channel
    pub fragments_published: u64,
    /// Bytes handed to the broadcast channel
    pub bytes_published: u64,
    /// `get_init` requests received
    pub init_requests: u64,
    /// `get_init` requests answered with the init segment
    pub init_replies: u64,
    /// Fragments skipped by subscribers that fell behind
    pub fragments_lagged: u64,
    /// Time since the metrics were created
    pub uptime: Duration,
}

impl RelayStats {
    /// Average publish bitrate in bits per second
    pub fn publish_bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_published * 8) / secs
        } else {
            0
        }
    }
}
