//! WebSocket transport for tailing sessions.
//!
//! Each connection runs a reader (client commands, keepalive deadline) on the
//! upgrade task and a writer (outbound queue, pings) on its own task.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::Extensions;
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::KeepaliveConfig;
use crate::outbound;
use crate::protocol::{ProtocolError, ServerMessage};
use crate::session::Session;
use crate::state::AppState;

/// Why a connection ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CloseReason {
    PeerClosed,
    KeepaliveTimeout,
    TransportError,
    WriterStopped,
    ServerShutdown,
}

/// Handle WebSocket upgrade request for /ws.
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    extensions: Extensions,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let max_message_size = state.config().keepalive.max_message_size;

    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, peer))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, peer: Option<SocketAddr>) {
    // Registered only once upgraded; dropped on every exit path
    let guard = state.registry().register(peer);
    let id = guard.id();
    let keepalive = state.config().keepalive.clone();

    let (outbound, outbound_rx) =
        outbound::channel(state.config().outbound_capacity, id, keepalive.write_timeout);
    let session = state.new_session(id, outbound);

    let (sink, stream) = socket.split();
    let (reason, dropped) = run_connection(
        stream,
        sink,
        session,
        outbound_rx,
        &keepalive,
        guard.shutdown_token(),
    )
    .await;

    info!(session = %id, reason = ?reason, dropped, "WebSocket closed");
}

/// Drive one connection until it ends; returns why, and how many outbound
/// messages were dropped
async fn run_connection<S, E, K>(
    stream: S,
    sink: K,
    mut session: Session,
    outbound_rx: mpsc::Receiver<ServerMessage>,
    keepalive: &KeepaliveConfig,
    shutdown: &CancellationToken,
) -> (CloseReason, u64)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    K: Sink<Message> + Unpin + Send + 'static,
    K::Error: Display,
{
    let id = session.id();
    let writer_done = CancellationToken::new();
    let writer = tokio::spawn(write_loop(
        sink,
        outbound_rx,
        keepalive.clone(),
        id,
        writer_done.clone(),
    ));

    let reason = read_loop(stream, &mut session, keepalive, shutdown, &writer_done).await;

    session.shutdown().await;
    let dropped = session.outbound_dropped();
    drop(session);

    // With the session gone the queue closes and the writer says goodbye
    let abort = writer.abort_handle();
    if timeout(keepalive.write_timeout * 2, writer).await.is_err() {
        abort.abort();
    }

    (reason, dropped)
}

async fn read_loop<S, E>(
    mut stream: S,
    session: &mut Session,
    keepalive: &KeepaliveConfig,
    shutdown: &CancellationToken,
    writer_done: &CancellationToken,
) -> CloseReason
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        // Any frame, including the pong to our ping, proves the peer alive
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return CloseReason::ServerShutdown,
            _ = writer_done.cancelled() => return CloseReason::WriterStopped,
            next = timeout(keepalive.pong_timeout, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                warn!(session = %session.id(), "Peer missed keepalive deadline");
                return CloseReason::KeepaliveTimeout;
            }
            Ok(None) => return CloseReason::PeerClosed,
            Ok(Some(Err(e))) => {
                debug!(session = %session.id(), error = %e, "WebSocket receive error");
                return CloseReason::TransportError;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => session.handle_text(text.as_str()).await,
            Message::Binary(_) => {
                session
                    .reject(ProtocolError::Malformed("binary frame".to_string()))
                    .await
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return CloseReason::PeerClosed,
        }
    }
}

async fn write_loop<K>(
    mut sink: K,
    mut outbound: mpsc::Receiver<ServerMessage>,
    keepalive: KeepaliveConfig,
    session: Uuid,
    done: CancellationToken,
) where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let _done = done.drop_guard();
    let mut ping = tokio::time::interval_at(
        Instant::now() + keepalive.ping_interval,
        keepalive.ping_interval,
    );

    loop {
        let frame = tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => match message.to_json() {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        warn!(session = %session, error = %e, "Failed to serialize message");
                        continue;
                    }
                },
                None => {
                    let _ = timeout(keepalive.write_timeout, sink.send(Message::Close(None))).await;
                    return;
                }
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match timeout(keepalive.write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(session = %session, error = %e, "WebSocket send failed");
                return;
            }
            Err(_) => {
                warn!(session = %session, "WebSocket write timed out");
                return;
            }
        }
    }
}
