//! Crate-level error type

use std::io;

use thiserror::Error;

use crate::ingest::IngestError;
use crate::segment::StoreError;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level relay errors
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The source could not be relayed
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Segment store misuse
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io() {
        let err: Error = io::Error::new(io::ErrorKind::AddrInUse, "taken").into();

        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.to_string(), "I/O error: taken");
    }

    #[test]
    fn test_store_error_is_transparent() {
        let inner = StoreError::AlreadyReady { init_size: 4 };
        let err: Error = inner.clone().into();

        assert_eq!(err.to_string(), inner.to_string());
    }
}
