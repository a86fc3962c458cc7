//! fmp4-relay - relay one live source to browsers as fragmented MP4
//!
//! Run with: fmp4-relay rtsp://camera.local/stream
//!
//! Open http://localhost:8080/ to watch. `RUST_LOG` controls log output.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use fmp4_relay::segment::config::{DEFAULT_MAX_PENDING_BYTES, DEFAULT_MAX_PENDING_FRAGMENTS};
use fmp4_relay::{
    Error, FfmpegConfig, FfmpegEngine, IngestPipeline, IngestStatus, IngestWorker, RelayServer,
    SegmentStore, ServerConfig, StoreConfig,
};

#[derive(Debug, Parser)]
#[command(name = "fmp4-relay", version, about = "Live fMP4 relay over WebSocket")]
struct Args {
    /// Source URL or file path (rtsp://, http://, rtmp://, local file)
    #[arg(env = "RELAY_SOURCE")]
    source: String,

    /// HTTP bind address
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Directory with the player page
    #[arg(long, default_value = "public")]
    public_dir: PathBuf,

    /// WebSocket endpoint path; the shipped player reads it from the
    /// `data-stream-path` attribute in index.html
    #[arg(long, default_value = "/stream")]
    stream_path: String,

    /// Broadcast period in milliseconds
    #[arg(long, default_value_t = 40)]
    interval_ms: u64,

    /// Disconnect clients silent for this many seconds
    #[arg(long, default_value_t = 30)]
    idle_timeout_secs: u64,

    /// Maximum concurrent clients (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_connections: usize,

    /// Pending fragment limit before the oldest are dropped (0 = unlimited)
    #[arg(long, default_value_t = DEFAULT_MAX_PENDING_FRAGMENTS)]
    max_pending_fragments: usize,

    /// Pending byte limit before the oldest fragments are dropped (0 = unlimited)
    #[arg(long, default_value_t = DEFAULT_MAX_PENDING_BYTES)]
    max_pending_bytes: usize,

    /// ffmpeg binary
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// ffprobe binary
    #[arg(long, default_value = "ffprobe")]
    ffprobe: PathBuf,

    /// RTSP lower transport, e.g. "tcp"
    #[arg(long)]
    rtsp_transport: Option<String>,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig, Error> {
        if self.interval_ms == 0 {
            return Err(Error::Config("--interval-ms must be at least 1".into()));
        }
        if self.idle_timeout_secs == 0 {
            return Err(Error::Config("--idle-timeout-secs must be at least 1".into()));
        }

        Ok(ServerConfig::default()
            .bind(self.bind)
            .stream_path(self.stream_path.as_str())
            .public_dir(&self.public_dir)
            .broadcast_interval(Duration::from_millis(self.interval_ms))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .max_connections(self.max_connections))
    }

    fn store_config(&self) -> StoreConfig {
        StoreConfig::default()
            .max_pending_fragments(self.max_pending_fragments)
            .max_pending_bytes(self.max_pending_bytes)
    }

    fn ffmpeg_config(&self) -> FfmpegConfig {
        let config = FfmpegConfig::default()
            .ffmpeg_path(&self.ffmpeg)
            .ffprobe_path(&self.ffprobe);

        match &self.rtsp_transport {
            Some(transport) => config.rtsp_transport(transport.as_str()),
            None => config,
        }
    }
}

async fn log_status(mut status: watch::Receiver<IngestStatus>) {
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        match current {
            IngestStatus::Starting => {}
            IngestStatus::Streaming { init_size } => {
                tracing::info!(init_size = init_size, "Source is live");
            }
            IngestStatus::Finished(summary) => {
                tracing::info!(
                    fragments = summary.fragments,
                    "Source ended, connected clients stay open"
                );
                break;
            }
            IngestStatus::Failed(reason) => {
                tracing::error!(
                    reason = %reason,
                    "Source failed, relay keeps serving without new media"
                );
                break;
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server_config = args.server_config()?;
    let store = Arc::new(SegmentStore::with_config(args.store_config()));

    let pipeline = IngestPipeline::new(
        FfmpegEngine::with_config(args.ffmpeg_config()),
        args.source.clone(),
        Arc::clone(&store),
    );
    let worker = IngestWorker::spawn(pipeline)?;
    let status_task = tokio::spawn(log_status(worker.status()));

    tracing::info!(source = %args.source, "Relaying source");

    let server = RelayServer::new(server_config, store);
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    status_task.abort();
    worker.stop();

    // A worker blocked inside the engine is left to exit with the process
    if worker.is_finished() {
        if let Err(e) = worker.join() {
            tracing::debug!(error = %e, "Ingest ended with error");
        }
    }

    Ok(())
}
