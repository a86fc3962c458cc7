//! Client sessions
//!
//! ```text
//!   connect ──► Connected ──► Subscribed ──close──► Disconnected
//!                                 │
//!                       "get_init" ──► snapshot_init() ──► unicast reply
//! ```

pub mod context;
pub mod handler;

pub use context::SessionContext;
pub use handler::{ClientCommand, Session, SessionHandler, SessionPhase, GET_INIT};
