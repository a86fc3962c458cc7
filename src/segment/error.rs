//! Segment store error types

use thiserror::Error;

/// Error type for segment store operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// `mark_ready` was called after the store already left `CollectingInit`
    #[error("segment store is already streaming (init segment: {init_size} bytes)")]
    AlreadyReady {
        /// Size of the sealed init segment
        init_size: usize,
    },
}
