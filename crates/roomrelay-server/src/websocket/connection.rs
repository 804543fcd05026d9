//! Outbound side of one joined client.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::ws::Utf8Bytes;
use roomrelay_settings::OverflowPolicy;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::types::ConnectionId;

/// A joined client as seen by the room registry.
///
/// Frames are queued on a bounded channel drained by the session's writer
/// task, so a broadcast never waits on a slow socket.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Utf8Bytes>,
    /// What to do when `tx` is full.
    overflow_policy: OverflowPolicy,
    /// Cancelled when the connection should shut down.
    closed: CancellationToken,
    /// Set when the queue overflowed under [`OverflowPolicy::Disconnect`].
    overflowed: AtomicBool,
    /// Count of frames the queue did not accept.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Utf8Bytes>, overflow_policy: OverflowPolicy) -> Self {
        Self {
            id,
            tx,
            overflow_policy,
            closed: CancellationToken::new(),
            overflowed: AtomicBool::new(false),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a serialized frame for the client.
    ///
    /// Returns `false` if the frame was not queued. A full queue counts a
    /// drop and, under [`OverflowPolicy::Disconnect`], closes the connection.
    pub fn send(&self, frame: Utf8Bytes) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                if self.overflow_policy == OverflowPolicy::Disconnect {
                    self.overflowed.store(true, Ordering::Relaxed);
                    self.closed.cancel();
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the session and its writer to shut down. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Resolves once [`close`](Self::close) was called or the queue overflowed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Whether the connection is shutting down.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Whether the connection was closed because its queue overflowed.
    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}
