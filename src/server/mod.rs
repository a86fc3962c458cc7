//! HTTP and WebSocket front end
//!
//! `GET <stream_path>` upgrades to a WebSocket session; every other path is
//! served from the public directory.

pub mod assets;
pub mod config;
pub mod listener;
pub mod ws;

pub use config::ServerConfig;
pub use listener::RelayServer;
