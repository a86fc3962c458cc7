//! Muxer output sink
//!
//! The engine never sees the segment store directly. It writes through a
//! [`SegmentSink`], a single-method capability with the same shape as a
//! muxer's custom write callback: bytes in, bytes consumed out.

use std::sync::Arc;

use crate::segment::SegmentStore;

use super::error::EngineError;

/// Destination for muxer output chunks
pub trait SegmentSink {
    /// Accept one chunk, returning the number of bytes consumed
    fn write(&mut self, chunk: &[u8]) -> usize;
}

/// Write a whole chunk, treating a short write as an engine failure
pub fn write_all(sink: &mut dyn SegmentSink, chunk: &[u8]) -> Result<(), EngineError> {
    let written = sink.write(chunk);
    if written != chunk.len() {
        return Err(EngineError::ShortWrite {
            written,
            expected: chunk.len(),
        });
    }
    Ok(())
}

/// Sink that forwards every chunk into a [`SegmentStore`]
#[derive(Debug, Clone)]
pub struct StoreSink {
    store: Arc<SegmentStore>,
    bytes_written: u64,
}

impl StoreSink {
    /// Create a sink writing into `store`
    pub fn new(store: Arc<SegmentStore>) -> Self {
        Self {
            store,
            bytes_written: 0,
        }
    }

    /// Total bytes forwarded through this sink
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl SegmentSink for StoreSink {
    fn write(&mut self, chunk: &[u8]) -> usize {
        let consumed = self.store.append(chunk);
        self.bytes_written += consumed as u64;
        consumed
    }
}

/// Records every chunk as written, for tests
#[cfg(test)]
impl SegmentSink for Vec<Vec<u8>> {
    fn write(&mut self, chunk: &[u8]) -> usize {
        self.push(chunk.to_vec());
        chunk.len()
    }
}
