//! Fragment fan-out
//!
//! ```text
//!  Arc<SegmentStore> ──drain_all()──► BroadcastScheduler (every 40ms)
//!                                            │ publish(Bytes)
//!                                            ▼
//!                                    BroadcastChannel
//!                                    ┌───────┼───────┐
//!                                    ▼       ▼       ▼
//!                               [Session] [Session] [Session]
//! ```
//!
//! Delivery is best effort and at most once. Each subscriber has a bounded
//! queue; one that falls behind skips ahead without slowing the others.

pub mod channel;
pub mod scheduler;

pub use channel::{BroadcastChannel, Delivery, Subscription};
pub use scheduler::{BroadcastScheduler, TickReport, DEFAULT_BROADCAST_INTERVAL};
