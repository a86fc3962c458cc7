//! Segment store implementation
//!
//! Holds the initialization segment, the queue of fragments waiting to be
//! broadcast, and the one-way ready transition between them.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use super::config::StoreConfig;
use super::error::StoreError;
use super::state::{InitSnapshot, ReadyState, StoreStats};

/// Init segment storage; the variant is the ready flag
#[derive(Debug)]
enum InitBuffer {
    /// Header bytes still arriving
    Collecting(BytesMut),
    /// Header complete, shared read-only with late joiners
    Sealed(Bytes),
}

/// Fragments evicted by a single append
#[derive(Debug, Default, Clone, Copy)]
struct Eviction {
    fragments: u64,
    bytes: u64,
}

#[derive(Debug)]
struct StoreInner {
    init: InitBuffer,
    pending: VecDeque<Bytes>,
    pending_bytes: usize,
    fragments_appended: u64,
    fragments_dropped: u64,
    bytes_dropped: u64,
}

impl StoreInner {
    fn new() -> Self {
        Self {
            init: InitBuffer::Collecting(BytesMut::new()),
            pending: VecDeque::new(),
            pending_bytes: 0,
            fragments_appended: 0,
            fragments_dropped: 0,
            bytes_dropped: 0,
        }
    }

    fn state(&self) -> ReadyState {
        match self.init {
            InitBuffer::Collecting(_) => ReadyState::CollectingInit,
            InitBuffer::Sealed(_) => ReadyState::Streaming,
        }
    }

    fn append(&mut self, chunk: Bytes, config: &StoreConfig) -> Eviction {
        match self.init {
            InitBuffer::Collecting(ref mut buf) => {
                buf.extend_from_slice(&chunk);
                Eviction::default()
            }
            InitBuffer::Sealed(_) => self.enqueue(chunk, config),
        }
    }

    fn enqueue(&mut self, fragment: Bytes, config: &StoreConfig) -> Eviction {
        self.pending_bytes += fragment.len();
        self.pending.push_back(fragment);
        self.fragments_appended += 1;

        let mut eviction = Eviction::default();

        // Drop-oldest, but never the fragment just queued
        while self.pending.len() > 1 && config.exceeded_by(self.pending.len(), self.pending_bytes)
        {
            if let Some(old) = self.pending.pop_front() {
                self.pending_bytes -= old.len();
                eviction.fragments += 1;
                eviction.bytes += old.len() as u64;
            }
        }

        self.fragments_dropped += eviction.fragments;
        self.bytes_dropped += eviction.bytes;
        eviction
    }
}

/// Thread-safe store shared by the ingest thread, the scheduler and sessions
///
/// Wrap it in an `Arc` and hand clones to each component. All operations take
/// the same mutex for a bounded amount of work and never perform I/O while
/// holding it.
#[derive(Debug)]
pub struct SegmentStore {
    inner: Mutex<StoreInner>,
    config: StoreConfig,
}

impl SegmentStore {
    /// Create a store with the default queue bounds
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a store with custom queue bounds
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Mutex::new(StoreInner::new()),
            config,
        }
    }

    /// Get the store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Append one chunk of muxer output
    ///
    /// Before the ready transition the chunk extends the init segment; after
    /// it, the chunk becomes one pending fragment. The caller's buffer is
    /// copied and not retained. Returns the number of bytes consumed, which is
    /// always the full chunk length. Empty chunks create no fragment.
    pub fn append(&self, chunk: &[u8]) -> usize {
        if chunk.is_empty() {
            return 0;
        }

        let chunk_bytes = Bytes::copy_from_slice(chunk);

        let eviction = {
            let mut inner = self.inner.lock();
            inner.append(chunk_bytes, &self.config)
        };

        if eviction.fragments > 0 {
            tracing::warn!(
                dropped_fragments = eviction.fragments,
                dropped_bytes = eviction.bytes,
                "Pending fragment queue overflowed, dropped oldest fragments"
            );
        }

        chunk.len()
    }

    /// Seal the init segment and switch to fragment mode
    ///
    /// Must be called exactly once per run. A second call is a caller bug and
    /// is reported as [`StoreError::AlreadyReady`] without touching state.
    /// Returns the size of the sealed init segment.
    pub fn mark_ready(&self) -> Result<usize, StoreError> {
        let init_size = {
            let mut inner = self.inner.lock();
            match std::mem::replace(&mut inner.init, InitBuffer::Sealed(Bytes::new())) {
                InitBuffer::Collecting(buf) => {
                    let sealed = buf.freeze();
                    let size = sealed.len();
                    inner.init = InitBuffer::Sealed(sealed);
                    size
                }
                InitBuffer::Sealed(sealed) => {
                    let init_size = sealed.len();
                    inner.init = InitBuffer::Sealed(sealed);
                    return Err(StoreError::AlreadyReady { init_size });
                }
            }
        };

        tracing::info!(init_size = init_size, "Initialization segment ready");

        Ok(init_size)
    }

    /// Detach and return every pending fragment in arrival order
    ///
    /// The queue is swapped out whole, so a drain never observes a partial
    /// append. An empty result is normal.
    pub fn drain_all(&self) -> Vec<Bytes> {
        let drained = {
            let mut inner = self.inner.lock();
            inner.pending_bytes = 0;
            std::mem::take(&mut inner.pending)
        };

        Vec::from(drained)
    }

    /// Snapshot the init segment for a late joiner
    pub fn snapshot_init(&self) -> InitSnapshot {
        let inner = self.inner.lock();
        match inner.init {
            InitBuffer::Sealed(ref bytes) => InitSnapshot::Ready(bytes.clone()),
            InitBuffer::Collecting(_) => InitSnapshot::NotReady,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ReadyState {
        self.inner.lock().state()
    }

    /// Whether the init segment has been sealed
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Get store statistics
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        let init_size = match inner.init {
            InitBuffer::Collecting(ref buf) => buf.len(),
            InitBuffer::Sealed(ref bytes) => bytes.len(),
        };

        StoreStats {
            state: inner.state(),
            init_size,
            pending_fragments: inner.pending.len(),
            pending_bytes: inner.pending_bytes,
            fragments_appended: inner.fragments_appended,
            fragments_dropped: inner.fragments_dropped,
            bytes_dropped: inner.bytes_dropped,
        }
    }
}

impl Default for SegmentStore {
    fn default() -> Self {
        Self::new()
    }
}
