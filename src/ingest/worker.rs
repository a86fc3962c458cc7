//! Dedicated ingest thread
//!
//! The pipeline is blocking, so it runs on its own OS thread rather than on
//! the async runtime. [`IngestWorker`] owns that thread.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::watch;

use super::engine::RemuxEngine;
use super::error::IngestError;
use super::pipeline::{IngestPipeline, IngestStatus, IngestSummary};

/// Owned handle to the ingest thread
///
/// `stop` is cooperative: the pipeline checks it between fragments, so a
/// thread blocked waiting on its source only notices once the next fragment
/// arrives. Dropping an unfinished worker requests a stop and detaches.
pub struct IngestWorker {
    handle: Option<JoinHandle<Result<IngestSummary, IngestError>>>,
    stop: Arc<AtomicBool>,
    status: watch::Receiver<IngestStatus>,
}

impl IngestWorker {
    /// Start `pipeline` on a new thread named `ingest`
    pub fn spawn<E>(pipeline: IngestPipeline<E>) -> io::Result<Self>
    where
        E: RemuxEngine + Send + 'static,
    {
        let stop = pipeline.stop_flag();
        let status = pipeline.status();

        let handle = thread::Builder::new()
            .name("ingest".to_string())
            .spawn(move || pipeline.run())?;

        Ok(Self {
            handle: Some(handle),
            stop,
            status,
        })
    }

    /// Subscribe to status updates
    pub fn status(&self) -> watch::Receiver<IngestStatus> {
        self.status.clone()
    }

    /// Ask the pipeline to stop before its next fragment
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether the thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the thread and return the run's outcome
    pub fn join(mut self) -> Result<IngestSummary, IngestError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| IngestError::WorkerPanicked)?,
            None => Err(IngestError::WorkerPanicked),
        }
    }
}

impl Drop for IngestWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop();
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::debug!("Ingest worker still running, detaching");
            }
        }
    }
}
