//! Ingest pipeline
//!
//! Runs one remux session start to finish on the calling thread:
//! open, probe, select video, open output, write header, seal the init
//! segment, forward fragments until end of stream, write trailer.
//!
//! Any stage failure ends the run. There is no retry; if the header never
//! completes, the store stays in `CollectingInit` for the life of the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::segment::SegmentStore;

use super::engine::{
    select_video_stream, FragmentWriter, MediaInput, OutputOptions, RemuxEngine, StreamInfo,
};
use super::error::IngestError;
use super::sink::StoreSink;

/// Outcome of a completed ingest run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    /// Stream that was relayed
    pub video: StreamInfo,
    /// Size of the sealed init segment
    pub init_size: usize,
    /// Fragments forwarded to the store
    pub fragments: u64,
    /// Bytes forwarded as fragments
    pub fragment_bytes: u64,
    /// Whether the run ended because a stop was requested
    pub stopped: bool,
}

/// Observable progress of the ingest run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    /// Opening and probing the source
    Starting,
    /// Header written, fragments flowing
    Streaming {
        /// Size of the sealed init segment
        init_size: usize,
    },
    /// Ended without error
    Finished(IngestSummary),
    /// Ended with a fatal error
    Failed(String),
}

impl IngestStatus {
    /// Whether the run has ended, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestStatus::Finished(_) | IngestStatus::Failed(_))
    }
}

/// A single ingest run bound to one engine, source and store
pub struct IngestPipeline<E> {
    engine: E,
    locator: String,
    options: OutputOptions,
    store: Arc<SegmentStore>,
    stop: Arc<AtomicBool>,
    status: watch::Sender<IngestStatus>,
}

impl<E: RemuxEngine> IngestPipeline<E> {
    /// Create a pipeline relaying `locator` into `store`
    pub fn new(engine: E, locator: impl Into<String>, store: Arc<SegmentStore>) -> Self {
        let (status, _) = watch::channel(IngestStatus::Starting);

        Self {
            engine,
            locator: locator.into(),
            options: OutputOptions::default(),
            store,
            stop: Arc::new(AtomicBool::new(false)),
            status,
        }
    }

    /// Set the fragmented output options
    pub fn output_options(mut self, options: OutputOptions) -> Self {
        self.options = options;
        self
    }

    /// Source locator
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Subscribe to status updates
    pub fn status(&self) -> watch::Receiver<IngestStatus> {
        self.status.subscribe()
    }

    /// Flag that stops the run before the next fragment when set
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run the pipeline to completion on the current thread
    pub fn run(&self) -> Result<IngestSummary, IngestError> {
        let result = self.run_stages();

        match &result {
            Ok(summary) => {
                tracing::info!(
                    locator = %self.locator,
                    fragments = summary.fragments,
                    fragment_bytes = summary.fragment_bytes,
                    stopped = summary.stopped,
                    "Ingest finished"
                );
                self.status.send_replace(IngestStatus::Finished(summary.clone()));
            }
            Err(e) => {
                tracing::error!(locator = %self.locator, error = %e, "Ingest failed");
                self.status.send_replace(IngestStatus::Failed(e.to_string()));
            }
        }

        result
    }

    fn run_stages(&self) -> Result<IngestSummary, IngestError> {
        // Declaration order matters: `output` is dropped before `input`
        let mut input = self.engine.open(&self.locator).map_err(|source| IngestError::Open {
            locator: self.locator.clone(),
            source,
        })?;

        let streams = input.probe().map_err(IngestError::Probe)?;
        if streams.is_empty() {
            return Err(IngestError::NoStreamInfo);
        }

        let video = select_video_stream(&streams)
            .cloned()
            .ok_or(IngestError::NoVideoStream)?;

        tracing::info!(
            locator = %self.locator,
            streams = streams.len(),
            video = %video,
            "Selected video stream"
        );

        let mut output = input
            .open_output(&video, &self.options)
            .map_err(IngestError::Output)?;

        let mut sink = StoreSink::new(Arc::clone(&self.store));

        output.write_header(&mut sink).map_err(IngestError::Header)?;

        // Header complete: every later write is a fragment
        let init_size = self.store.mark_ready()?;
        self.status.send_replace(IngestStatus::Streaming { init_size });

        let mut fragments = 0u64;
        let mut fragment_bytes = 0u64;
        let mut stopped = false;

        loop {
            if self.stop.load(Ordering::Acquire) {
                tracing::info!(locator = %self.locator, "Ingest stop requested");
                stopped = true;
                break;
            }

            let before = sink.bytes_written();
            let more = output
                .write_fragment(&mut sink)
                .map_err(|source| IngestError::Fragment {
                    index: fragments,
                    source,
                })?;

            if !more {
                break;
            }

            fragments += 1;
            fragment_bytes += sink.bytes_written() - before;

            tracing::trace!(fragment = fragments, "Fragment forwarded");
        }

        if !stopped {
            if let Err(e) = output.write_trailer(&mut sink) {
                tracing::warn!(locator = %self.locator, error = %e, "Failed to write trailer");
            }
        }

        Ok(IngestSummary {
            video,
            init_size,
            fragments,
            fragment_bytes,
            stopped,
        })
    }
}
