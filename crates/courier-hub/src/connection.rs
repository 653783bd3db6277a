//! Per-socket connection state and the outbound write task.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message};
use courier_protocol::{Frame, close_codes, encode};
use futures::{Sink, SinkExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::metrics::WS_DELIVERY_DROPS_TOTAL;
use crate::services::UserProfile;

/// Opaque connection identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Fresh time-ordered id.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// String form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a connection is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Socket accepted, no `CONNECT` yet.
    Unauthenticated,
    /// `CONNECT` verified.
    Authenticated,
    /// Close requested or socket gone. Terminal.
    Closed,
}

/// Identity and profile bound at `CONNECT`.
#[derive(Clone, Debug)]
pub struct Session {
    /// Verified caller.
    pub identity: Identity,
    /// Display profile (directory value, falling back to the token hint).
    pub profile: UserProfile,
}

/// Close frame queued behind any pending outbound frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseRequest {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
}

/// One accepted socket.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the socket's write task.
    tx: mpsc::Sender<String>,
    session: RwLock<Option<Arc<Session>>>,
    close_token: CancellationToken,
    close_request: Mutex<Option<CloseRequest>>,
    torn_down: AtomicBool,
    /// Frames that could not be queued.
    dropped_frames: AtomicU64,
    /// When the socket was accepted.
    pub connected_at: Instant,
}

impl Connection {
    /// Create a connection writing into `tx`.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            session: RwLock::new(None),
            close_token: CancellationToken::new(),
            close_request: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            dropped_frames: AtomicU64::new(0),
            connected_at: Instant::now(),
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        if !self.is_open() {
            ConnectionPhase::Closed
        } else if self.session.read().is_some() {
            ConnectionPhase::Authenticated
        } else {
            ConnectionPhase::Unauthenticated
        }
    }

    /// Bind the verified session.
    pub fn authenticate(&self, session: Session) {
        *self.session.write() = Some(Arc::new(session));
    }

    /// Session bound at `CONNECT`, if any.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.read().clone()
    }

    /// Authenticated user id, if any.
    pub fn user_id(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.identity.id.clone())
    }

    /// Whether frames may still be queued.
    pub fn is_open(&self) -> bool {
        !self.close_token.is_cancelled()
    }

    /// Encode and queue a frame.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send_text(encode(frame))
    }

    /// Queue raw text for the socket.
    ///
    /// A full or closed queue means the socket cannot keep up; the frame is
    /// dropped and the connection is closed with 1011.
    pub fn send_text(&self, text: String) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(WS_DELIVERY_DROPS_TOTAL).increment(1);
                warn!(conn_id = %self.id, error = %e, "failed to queue frame, closing connection");
                self.close(close_codes::INTERNAL_ERROR, "Frame send error");
                false
            }
        }
    }

    /// Request a close. Frames already queued are flushed first. Only the
    /// first request is honored.
    pub fn close(&self, code: u16, reason: &str) {
        {
            let mut request = self.close_request.lock();
            if request.is_none() && !self.close_token.is_cancelled() {
                *request = Some(CloseRequest {
                    code,
                    reason: reason.to_owned(),
                });
            }
        }
        self.close_token.cancel();
    }

    /// Stop without sending a close frame (peer already closed or errored).
    pub fn terminate(&self) {
        self.close_token.cancel();
    }

    /// Resolves once a close has been requested.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close_token.cancelled()
    }

    /// Close frame requested by the hub, if any.
    pub fn close_request(&self) -> Option<CloseRequest> {
        self.close_request.lock().clone()
    }

    /// Returns `true` exactly once; gates registry teardown.
    pub(crate) fn mark_torn_down(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }

    /// Frames dropped because the queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Forward queued text to the socket until a close is requested, then flush
/// what is left and send the close frame.
pub(crate) async fn write_loop<S>(mut sink: S, mut rx: mpsc::Receiver<String>, conn: Arc<Connection>)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => {
                let Some(text) = msg else { break };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(conn_id = %conn.id, error = %e, "socket write failed");
                    conn.close(close_codes::INTERNAL_ERROR, "Frame send error");
                    break;
                }
            }
            () = conn.closed() => break,
        }
    }

    while let Ok(text) = rx.try_recv() {
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }

    if let Some(request) = conn.close_request() {
        debug!(conn_id = %conn.id, code = request.code, reason = %request.reason, "closing socket");
        let frame = CloseFrame {
            code: request.code,
            reason: request.reason.into(),
        };
        let _ = sink.send(Message::Close(Some(frame))).await;
    }
    let _ = sink.close().await;
}
