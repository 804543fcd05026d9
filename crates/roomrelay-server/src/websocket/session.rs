//! Chat session lifecycle: one connected client from upgrade through
//! disconnect.
//!
//! `AwaitingJoin` reads exactly one frame, which must be a valid join.
//! `Active` relays chat frames until the peer goes away, the outbound queue
//! overflows or the server shuts down. Leaving the registry happens on every
//! exit path from `Active`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use roomrelay_settings::SessionSettings;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use crate::metrics::{
    JOIN_REJECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::protocol::{self, JoinError, JoinRequest, ServerFrame};
use crate::registry::RoomRegistry;
use crate::types::{ConnectionId, DisplayName, RoomCode};

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame, disconnected, or the read side failed.
    PeerClosed,
    /// The writer task could not deliver a frame.
    WriteFailed,
    /// Outbound queue overflowed under the disconnect policy.
    Overflow,
    /// Server is shutting down.
    Shutdown,
    /// First frame was not a decodable client frame.
    MalformedJoin,
    /// First frame decoded but was not a join.
    UnexpectedFirstFrame,
    /// Join carried a code that failed validation.
    InvalidCode,
}

impl CloseReason {
    /// Close frame sent to the peer, if the channel is still usable.
    pub fn close_frame(self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            Self::PeerClosed | Self::WriteFailed => return None,
            Self::Overflow => (close_code::AGAIN, "outbound queue full"),
            Self::Shutdown => (close_code::AWAY, "server shutting down"),
            Self::MalformedJoin => (close_code::POLICY, "malformed join"),
            Self::UnexpectedFirstFrame => (close_code::POLICY, "join required"),
            Self::InvalidCode => (close_code::POLICY, "invalid room code"),
        };
        Some(CloseFrame {
            code,
            reason: Utf8Bytes::from_static(reason),
        })
    }

    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::WriteFailed => "write_failed",
            Self::Overflow => "overflow",
            Self::Shutdown => "shutdown",
            Self::MalformedJoin => "malformed_join",
            Self::UnexpectedFirstFrame => "unexpected_first_frame",
            Self::InvalidCode => "invalid_code",
        }
    }
}

impl From<&JoinError> for CloseReason {
    fn from(err: &JoinError) -> Self {
        match err {
            JoinError::Malformed(_) => Self::MalformedJoin,
            JoinError::UnexpectedType => Self::UnexpectedFirstFrame,
            JoinError::InvalidCode(_) => Self::InvalidCode,
        }
    }
}

/// A transport frame, reduced to what the protocol cares about.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    /// Text frame, or a binary frame holding valid UTF-8.
    Text(String),
    /// Binary frame that is not UTF-8.
    Undecodable,
    /// Ping or pong, answered by the transport.
    Control,
    /// Close frame, read error or end of stream.
    Closed,
}

impl Inbound {
    fn classify(item: Option<Result<Message, axum::Error>>) -> Self {
        match item {
            None | Some(Err(_) | Ok(Message::Close(_))) => Self::Closed,
            Some(Ok(Message::Text(text))) => Self::Text(text.as_str().to_owned()),
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => Self::Text(text.to_owned()),
                Err(_) => Self::Undecodable,
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => Self::Control,
        }
    }
}

/// Result of the `AwaitingJoin` state.
enum JoinOutcome {
    Joined(JoinRequest),
    Closed(CloseReason),
}

/// One client connection, from upgrade to close.
pub struct ChatSession {
    id: ConnectionId,
    registry: Arc<RoomRegistry>,
    settings: SessionSettings,
    shutdown: CancellationToken,
}

impl ChatSession {
    /// Create a session for a freshly upgraded connection.
    pub fn new(
        id: ConnectionId,
        registry: Arc<RoomRegistry>,
        settings: SessionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            registry,
            settings,
            shutdown,
        }
    }

    /// Drive the connection until it closes.
    #[instrument(skip_all, fields(conn_id = %self.id))]
    pub async fn run(self, mut socket: WebSocket) -> CloseReason {
        let started = Instant::now();
        info!("client connected");
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

        let reason = match self.await_join(&mut socket).await {
            JoinOutcome::Joined(request) => self.run_active(socket, request).await,
            JoinOutcome::Closed(reason) => {
                reject(socket, reason).await;
                reason
            }
        };

        info!(reason = reason.as_str(), "client disconnected");
        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        reason
    }

    /// `AwaitingJoin`: the first data frame decides the connection's fate.
    async fn await_join(&self, socket: &mut WebSocket) -> JoinOutcome {
        loop {
            let item = tokio::select! {
                item = socket.recv() => item,
                () = self.shutdown.cancelled() => return JoinOutcome::Closed(CloseReason::Shutdown),
            };
            let raw = match Inbound::classify(item) {
                Inbound::Control => continue,
                Inbound::Closed => return JoinOutcome::Closed(CloseReason::PeerClosed),
                Inbound::Undecodable => {
                    counter!(JOIN_REJECTIONS_TOTAL).increment(1);
                    warn!("first frame is not valid UTF-8");
                    return JoinOutcome::Closed(CloseReason::MalformedJoin);
                }
                Inbound::Text(raw) => raw,
            };
            return match protocol::decode_join(&raw) {
                Ok(request) => JoinOutcome::Joined(request),
                Err(err) => {
                    counter!(JOIN_REJECTIONS_TOTAL).increment(1);
                    warn!(error = %err, "join rejected");
                    JoinOutcome::Closed(CloseReason::from(&err))
                }
            };
        }
    }

    /// `Active`: registered in a room, relaying chat until the session ends.
    async fn run_active(&self, socket: WebSocket, request: JoinRequest) -> CloseReason {
        let JoinRequest { code, name } = request;
        let (ws_tx, mut ws_rx) = socket.split();

        let (send_tx, send_rx) = mpsc::channel(self.settings.outbound_queue_capacity);
        let connection = Arc::new(ClientConnection::new(
            self.id,
            send_tx,
            self.settings.overflow_policy,
        ));
        let writer = tokio::spawn(forward_outbound(
            ws_tx,
            send_rx,
            Arc::clone(&connection),
            self.settings.keepalive_interval(),
        ));

        let _ = self.registry.join(&code, Arc::clone(&connection), name.clone());

        let reason = loop {
            let item = tokio::select! {
                item = ws_rx.next() => item,
                () = connection.closed() => {
                    break if connection.overflowed() {
                        CloseReason::Overflow
                    } else {
                        CloseReason::WriteFailed
                    };
                }
                () = self.shutdown.cancelled() => break CloseReason::Shutdown,
            };
            match Inbound::classify(item) {
                Inbound::Closed => break CloseReason::PeerClosed,
                Inbound::Text(raw) => self.handle_frame(&code, &name, &raw),
                Inbound::Control => {}
                Inbound::Undecodable => debug!("ignoring non-UTF-8 binary frame"),
            }
        };

        let _ = self.registry.leave(self.id);
        connection.close();
        if let Ok(mut ws_tx) = writer.await {
            if let Some(frame) = reason.close_frame() {
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
            }
            let _ = ws_tx.close().await;
        }
        if connection.drop_count() > 0 {
            info!(dropped = connection.drop_count(), "frames dropped for slow client");
        }
        reason
    }

    /// Handle one frame from an `Active` client. Anything but non-empty chat is ignored.
    fn handle_frame(&self, code: &RoomCode, name: &DisplayName, raw: &str) {
        match protocol::decode_chat(raw) {
            Ok(Some(text)) => {
                let recipients = self.registry.relay(code, name, &text);
                debug!(%code, recipients, "relayed chat message");
            }
            Ok(None) => debug!(%code, "ignoring non-chat or empty frame"),
            Err(err) => debug!(%code, error = %err, "ignoring undecodable frame"),
        }
    }
}

/// Close an unjoined connection, sending the error frame first for a bad code.
async fn reject(mut socket: WebSocket, reason: CloseReason) {
    if reason == CloseReason::InvalidCode {
        match ServerFrame::invalid_code().to_json() {
            Ok(json) => {
                let _ = socket.send(Message::Text(json.into())).await;
            }
            Err(e) => warn!(error = %e, "failed to serialize error frame"),
        }
    }
    if let Some(frame) = reason.close_frame() {
        let _ = socket.send(Message::Close(Some(frame))).await;
    }
}

/// Writer task: drains the outbound queue into the socket and sends
/// keepalive pings. Hands the sink back so the session can send a close frame.
async fn forward_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
    connection: Arc<ClientConnection>,
    keepalive: Option<Duration>,
) -> SplitSink<WebSocket, Message> {
    let mut keepalive = keepalive.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    // Skip the immediate first tick
    if let Some(interval) = keepalive.as_mut() {
        let _ = interval.tick().await;
    }

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(frame)).await.is_err() {
                    debug!(conn_id = %connection.id, "socket write failed");
                    break;
                }
            }
            () = tick(keepalive.as_mut()) => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    debug!(conn_id = %connection.id, "keepalive ping failed");
                    break;
                }
            }
            () = connection.closed() => break,
        }
    }
    connection.close();
    ws_tx
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
