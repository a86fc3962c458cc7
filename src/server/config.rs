//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::broadcast::channel::DEFAULT_SUBSCRIBER_CAPACITY;
use crate::broadcast::DEFAULT_BROADCAST_INTERVAL;

/// Default HTTP bind address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Default WebSocket endpoint path
pub const DEFAULT_STREAM_PATH: &str = "/stream";

/// Default largest accepted client message
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// WebSocket endpoint path
    pub stream_path: String,

    /// Directory served for every other path
    pub public_dir: PathBuf,

    /// Broadcast scheduler period
    pub broadcast_interval: Duration,

    /// Per-subscriber queue depth before a slow client starts skipping
    pub subscriber_capacity: usize,

    /// Largest client message accepted
    pub max_message_size: usize,

    /// Idle timeout (disconnect if nothing received, pongs included)
    pub idle_timeout: Duration,

    /// Maximum concurrent WebSocket clients (0 = unlimited)
    pub max_connections: usize,

    /// Stats log interval (zero disables)
    pub stats_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            public_dir: PathBuf::from("public"),
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            idle_timeout: Duration::from_secs(30),
            max_connections: 0, // Unlimited
            stats_interval: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the WebSocket path; a missing leading slash is added
    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.stream_path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    /// Set the static asset directory
    pub fn public_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.public_dir = dir.into();
        self
    }

    /// Set the broadcast period
    pub fn broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval = interval;
        self
    }

    /// Set the per-subscriber queue depth (at least 1)
    pub fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity.max(1);
        self
    }

    /// Set the largest accepted client message
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the stats log interval
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Ping period: half the idle timeout
    pub fn heartbeat_interval(&self) -> Duration {
        (self.idle_timeout / 2).max(Duration::from_millis(10))
    }
}
