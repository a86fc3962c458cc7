//! WebSocket endpoint
//!
//! One task per client. The loop multiplexes three sources: client
//! messages, broadcast fragments, and the heartbeat timer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;

use crate::broadcast::Delivery;
use crate::server::config::ServerConfig;
use crate::session::SessionHandler;

/// Shared state for the stream route
#[derive(Clone)]
pub(crate) struct StreamState {
    pub(crate) sessions: SessionHandler,
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) limiter: Option<Arc<Semaphore>>,
}

/// Upgrade handler for the stream path
pub(crate) async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<StreamState>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
) -> Response {
    // Check connection limit
    let permit = match &state.limiter {
        Some(sem) => match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
            }
        },
        None => None,
    };

    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(move |e| {
            tracing::debug!(peer = %peer_addr, error = %e, "WebSocket upgrade failed")
        })
        .on_upgrade(move |socket| async move {
            let _permit = permit;
            handle_socket(socket, state, peer_addr).await;
        })
}

/// Why a client loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    ClientClosed,
    TransportError,
    SendFailed,
    IdleTimeout,
    ChannelClosed,
}

async fn handle_socket(socket: WebSocket, state: StreamState, peer_addr: SocketAddr) {
    let (mut session, mut subscription) = state.sessions.connect(peer_addr);
    let (mut sender, mut receiver) = socket.split();

    let idle_timeout = state.config.idle_timeout;
    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    heartbeat.tick().await;
    let mut last_seen = Instant::now();

    let exit = loop {
        tokio::select! {
            msg = receiver.next() => {
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        session.on_text(text.as_str())
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_seen = Instant::now();
                        session.on_binary(&data)
                    }
                    // Pongs for client pings are queued by the transport
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                        None
                    }
                    Some(Ok(Message::Close(_))) | None => break Exit::ClientClosed,
                    Some(Err(e)) => {
                        tracing::debug!(session_id = session.id(), error = %e, "WebSocket error");
                        break Exit::TransportError;
                    }
                };

                if let Some(payload) = reply {
                    if sender.send(Message::Binary(payload)).await.is_err() {
                        break Exit::SendFailed;
                    }
                }
            }

            delivery = subscription.recv() => {
                match delivery {
                    Delivery::Payload(fragment) => {
                        if sender.send(Message::Binary(fragment)).await.is_err() {
                            break Exit::SendFailed;
                        }
                    }
                    Delivery::Lagged(skipped) => session.on_lagged(skipped),
                    Delivery::Closed => break Exit::ChannelClosed,
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= idle_timeout {
                    break Exit::IdleTimeout;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break Exit::SendFailed;
                }
            }
        }
    };

    tracing::debug!(session_id = session.id(), reason = ?exit, "Client loop ended");

    if exit != Exit::ClientClosed && exit != Exit::SendFailed {
        let _ = sender.close().await;
    }
    session.disconnect(subscription);
}
