//! Shared segment store
//!
//! The store is the only state shared between the blocking ingest thread and
//! the async distribution side. It classifies every chunk the muxer emits as
//! either part of the initialization segment (before the ready transition) or
//! as one pending fragment (after it).
//!
//! # Architecture
//!
//! ```text
//!      ingest thread                         tokio runtime
//!   ┌────────────────┐                ┌──────────────────────────┐
//!   │ FragmentWriter │                │ BroadcastScheduler::tick │
//!   │   sink.write() │                │   store.drain_all()      │
//!   └───────┬────────┘                └────────────┬─────────────┘
//!           │ append()                             │
//!           ▼                                      ▼
//!   ┌──────────────────────────────────────────────────────────┐
//!   │ Arc<SegmentStore>                                        │
//!   │   Mutex<StoreInner {                                     │
//!   │     init:    Collecting(BytesMut) | Sealed(Bytes),       │
//!   │     pending: VecDeque<Bytes>,                            │
//!   │   }>                                                     │
//!   └──────────────────────────────────────────────────────────┘
//!                               ▲
//!                               │ snapshot_init()
//!                     [Session: "get_init"]
//! ```
//!
//! Every critical section is constant time with respect to I/O: chunk copies
//! are made before the lock is taken and logging happens after it is released.

pub mod config;
pub mod error;
pub mod state;
pub mod store;

pub use config::StoreConfig;
pub use error::StoreError;
pub use state::{InitSnapshot, ReadyState, StoreStats};
pub use store::SegmentStore;
