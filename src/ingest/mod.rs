//! Source ingest
//!
//! Drives a remux engine on a dedicated thread and forwards everything it
//! writes into the [`SegmentStore`](crate::segment::SegmentStore):
//!
//! - [`engine`]: the staged engine contract and video stream selection
//! - [`sink`]: the single-method sink the engine writes through
//! - [`fmp4`]: splitting an fMP4 byte stream into header, fragments, trailer
//! - [`ffmpeg`]: the ffprobe/ffmpeg subprocess engine
//! - [`pipeline`]: one ingest run, stage by stage
//! - [`worker`]: the owned thread running the pipeline

pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod fmp4;
pub mod pipeline;
pub mod sink;
pub mod worker;

pub use engine::{
    select_video_stream, FragmentWriter, MediaInput, MediaKind, OutputOptions, RemuxEngine,
    StreamInfo,
};
pub use error::{EngineError, IngestError};
pub use ffmpeg::{FfmpegConfig, FfmpegEngine};
pub use fmp4::{BoxReader, Fmp4Output, Mp4Box};
pub use pipeline::{IngestPipeline, IngestStatus, IngestSummary};
pub use sink::{SegmentSink, StoreSink};
pub use worker::IngestWorker;
