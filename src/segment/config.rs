//! Segment store configuration

/// Default bound on queued fragments
pub const DEFAULT_MAX_PENDING_FRAGMENTS: usize = 1024;

/// Default bound on queued fragment bytes (64MB)
pub const DEFAULT_MAX_PENDING_BYTES: usize = 64 * 1024 * 1024;

/// Bounds for the pending fragment queue
///
/// When an append pushes the queue past either bound, the oldest pending
/// fragments are evicted until it fits again. The newest fragment is always
/// kept, so a single oversized fragment still gets published. A bound of 0
/// disables that check.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of fragments waiting for the scheduler (0 = unlimited)
    pub max_pending_fragments: usize,

    /// Maximum total size of fragments waiting for the scheduler (0 = unlimited)
    pub max_pending_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_pending_fragments: DEFAULT_MAX_PENDING_FRAGMENTS,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }
}

impl StoreConfig {
    /// Configuration with no queue bounds at all
    pub fn unbounded() -> Self {
        Self {
            max_pending_fragments: 0,
            max_pending_bytes: 0,
        }
    }

    /// Set the maximum number of pending fragments
    pub fn max_pending_fragments(mut self, max: usize) -> Self {
        self.max_pending_fragments = max;
        self
    }

    /// Set the maximum number of pending bytes
    pub fn max_pending_bytes(mut self, max: usize) -> Self {
        self.max_pending_bytes = max;
        self
    }

    /// Whether a queue of `fragments` entries totalling `bytes` exceeds a bound
    pub(crate) fn exceeded_by(&self, fragments: usize, bytes: usize) -> bool {
        (self.max_pending_fragments > 0 && fragments > self.max_pending_fragments)
            || (self.max_pending_bytes > 0 && bytes > self.max_pending_bytes)
    }
}
