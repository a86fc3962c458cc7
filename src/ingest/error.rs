//! Ingest error types

use std::io;
use std::process::ExitStatus;

use thiserror::Error;

use crate::segment::StoreError;

/// Failure reported by a remux engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// I/O failure reading engine output
    #[error("engine I/O error: {0}")]
    Io(#[from] io::Error),

    /// An engine process could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// An engine process exited unsuccessfully
    #[error("{program} exited with {status}: {detail}")]
    Exited {
        /// Program that exited
        program: String,
        /// Exit status
        status: ExitStatus,
        /// Last diagnostic line, if any
        detail: String,
    },

    /// Stream probe output could not be parsed
    #[error("invalid probe output: {0}")]
    Probe(#[from] serde_json::Error),

    /// The fMP4 byte stream is malformed
    #[error("malformed fMP4 output: {0}")]
    Format(String),

    /// The sink consumed fewer bytes than it was given
    #[error("sink accepted {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes the sink consumed
        written: usize,
        /// Bytes offered to the sink
        expected: usize,
    },
}

/// Fatal ingest failure, tagged with the pipeline stage that failed
#[derive(Debug, Error)]
pub enum IngestError {
    /// The source could not be opened
    #[error("could not open source {locator}: {source}")]
    Open {
        /// Source locator
        locator: String,
        /// Engine failure
        #[source]
        source: EngineError,
    },

    /// Probing stream information failed
    #[error("could not read stream information: {0}")]
    Probe(#[source] EngineError),

    /// The source reported no streams at all
    #[error("source reported no stream information")]
    NoStreamInfo,

    /// None of the source streams is a usable video stream
    #[error("source has no video stream")]
    NoVideoStream,

    /// The fragmented output could not be configured
    #[error("could not configure fragmented output: {0}")]
    Output(#[source] EngineError),

    /// Writing the initialization segment failed
    #[error("failed to write header: {0}")]
    Header(#[source] EngineError),

    /// Writing a fragment failed mid-stream
    #[error("failed to write fragment {index}: {source}")]
    Fragment {
        /// Zero-based fragment index
        index: u64,
        /// Engine failure
        #[source]
        source: EngineError,
    },

    /// The segment store rejected a transition
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The ingest thread panicked
    #[error("ingest worker panicked")]
    WorkerPanicked,
}
