//! Store state and snapshot types

use bytes::Bytes;

/// Lifecycle of the segment store
///
/// Moves from `CollectingInit` to `Streaming` exactly once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Appended chunks extend the initialization segment
    CollectingInit,
    /// Appended chunks are queued as individual fragments
    Streaming,
}

impl ReadyState {
    /// Whether the init segment is sealed
    pub fn is_ready(self) -> bool {
        self == ReadyState::Streaming
    }
}

/// Point-in-time view of the initialization segment
///
/// Cheap to clone: the ready payload is a reference-counted `Bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitSnapshot {
    /// The muxer has not finished writing its header yet
    NotReady,
    /// The sealed init segment
    Ready(Bytes),
}

impl InitSnapshot {
    /// Whether the init segment has been sealed
    pub fn is_ready(&self) -> bool {
        matches!(self, InitSnapshot::Ready(_))
    }

    /// The init segment bytes, if sealed
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            InitSnapshot::Ready(bytes) => Some(bytes),
            InitSnapshot::NotReady => None,
        }
    }

    /// Consume the snapshot, returning the sealed bytes
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            InitSnapshot::Ready(bytes) => Some(bytes),
            InitSnapshot::NotReady => None,
        }
    }
}

/// Statistics for the segment store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Current lifecycle state
    pub state: ReadyState,
    /// Size of the init segment (collected so far, or sealed)
    pub init_size: usize,
    /// Fragments waiting for the scheduler
    pub pending_fragments: usize,
    /// Bytes waiting for the scheduler
    pub pending_bytes: usize,
    /// Fragments appended since the ready transition
    pub fragments_appended: u64,
    /// Fragments evicted by the overflow policy
    pub fragments_dropped: u64,
    /// Bytes evicted by the overflow policy
    pub bytes_dropped: u64,
}
