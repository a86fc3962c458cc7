//! Live fMP4 relay
//!
//! Remuxes one live source into fragmented MP4 and fans it out to any
//! number of browser clients over WebSocket.
//!
//! ```text
//!   source ──► [ingest thread] ──append──► SegmentStore ──drain──► BroadcastScheduler
//!                                              │                        │ publish
//!                                        snapshot_init                  ▼
//!                                              │                 BroadcastChannel
//!                                              └──── get_init ───► Session (per client)
//! ```
//!
//! The ingest side is blocking and runs on its own OS thread. Everything
//! else runs on the async runtime.

pub mod broadcast;
pub mod error;
pub mod ingest;
pub mod segment;
pub mod server;
pub mod session;
pub mod stats;

pub use broadcast::{BroadcastChannel, BroadcastScheduler, Delivery, Subscription};
pub use error::{Error, Result};
pub use ingest::{FfmpegConfig, FfmpegEngine, IngestPipeline, IngestStatus, IngestWorker};
pub use segment::{SegmentStore, StoreConfig};
pub use server::{RelayServer, ServerConfig};
pub use session::{Session, SessionHandler};
pub use stats::{RelayMetrics, RelayStats};
