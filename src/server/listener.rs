//! Relay server
//!
//! Binds the HTTP listener, runs the broadcast scheduler alongside it and
//! routes the stream path to the WebSocket handler.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::broadcast::channel::DEFAULT_CHANNEL_NAME;
use crate::broadcast::{BroadcastChannel, BroadcastScheduler};
use crate::error::Result;
use crate::segment::SegmentStore;
use crate::server::assets;
use crate::server::config::ServerConfig;
use crate::server::ws::{stream_handler, StreamState};
use crate::session::SessionHandler;
use crate::stats::RelayMetrics;

/// HTTP/WebSocket front end for one segment store
pub struct RelayServer {
    config: ServerConfig,
    store: Arc<SegmentStore>,
    channel: BroadcastChannel,
    metrics: Arc<RelayMetrics>,
    sessions: SessionHandler,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RelayServer {
    /// Create a new server relaying from `store`
    pub fn new(config: ServerConfig, store: Arc<SegmentStore>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let channel = BroadcastChannel::new(DEFAULT_CHANNEL_NAME, config.subscriber_capacity);
        let metrics = Arc::new(RelayMetrics::new());
        let sessions =
            SessionHandler::new(Arc::clone(&store), channel.clone(), Arc::clone(&metrics));

        Self {
            config,
            store,
            channel,
            metrics,
            sessions,
            connection_semaphore,
        }
    }

    /// Server counters
    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// The channel fragments are published on
    pub fn channel(&self) -> &BroadcastChannel {
        &self.channel
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Build the HTTP router: the stream path plus static assets
    pub fn router(&self) -> Router {
        let state = StreamState {
            sessions: self.sessions.clone(),
            config: Arc::new(self.config.clone()),
            limiter: self.connection_semaphore.clone(),
        };

        let router = Router::new()
            .route(&self.config.stream_path, get(stream_handler))
            .with_state(state);

        assets::with_public_dir(router, &self.config.public_dir).layer(TraceLayer::new_for_http())
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            addr = %addr,
            path = %self.config.stream_path,
            public_dir = %self.config.public_dir.display(),
            "Relay server listening"
        );

        let scheduler = BroadcastScheduler::new(
            Arc::clone(&self.store),
            self.channel.clone(),
            Arc::clone(&self.metrics),
        )
        .interval(self.config.broadcast_interval)
        .spawn();
        let stats = self.spawn_stats_task();

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        // Stop background tasks on shutdown
        scheduler.abort();
        if let Some(stats) = stats {
            stats.abort();
        }

        result?;
        Ok(())
    }

    fn spawn_stats_task(&self) -> Option<JoinHandle<()>> {
        let period = self.config.stats_interval;
        if period.is_zero() {
            return None;
        }

        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let channel = self.channel.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let relay = metrics.snapshot();
                let store = store.stats();
                tracing::info!(
                    state = ?store.state,
                    sessions = relay.sessions_active,
                    subscribers = channel.subscriber_count(),
                    fragments = relay.fragments_published,
                    bitrate = relay.publish_bitrate(),
                    pending = store.pending_fragments,
                    dropped = store.fragments_dropped,
                    lagged = relay.fragments_lagged,
                    "Relay stats"
                );
            }
        }))
    }
}
