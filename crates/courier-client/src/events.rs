//! Typed events and the listener registry.
//!
//! Each listener runs behind `catch_unwind`: a panicking listener is logged
//! and skipped, and every other listener still sees the event.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::error;

/// How a socket ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseEvent {
    /// Close code from the peer or the manager; `None` when the socket died
    /// without a close frame.
    pub code: Option<u16>,
    /// Close reason.
    pub reason: String,
}

/// Event delivered to listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// Socket opened; the attempt counter has been reset.
    Open,
    /// Inbound text other than `pong`.
    Message(String),
    /// Socket closed (by the peer, a transport failure, a missed `pong`, or
    /// [`close`](crate::ReconnectManager::close)).
    Close(CloseEvent),
    /// Transport error. The following `Close` drives reconnection.
    Error(String),
    /// Reconnect armed.
    Reconnect {
        /// 1-based attempt number.
        attempt: u32,
        /// Configured maximum.
        max_attempts: u32,
        /// Jittered delay before the attempt.
        delay: Duration,
    },
    /// Attempts exhausted; the manager stays idle until reset or reconnected
    /// explicitly.
    ReconnectFailed {
        /// Attempts made.
        attempt: u32,
        /// Configured maximum.
        max_attempts: u32,
    },
}

impl ClientEvent {
    /// Event name for listener routing.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Message(_) => EventKind::Message,
            Self::Close(_) => EventKind::Close,
            Self::Error(_) => EventKind::Error,
            Self::Reconnect { .. } => EventKind::Reconnect,
            Self::ReconnectFailed { .. } => EventKind::ReconnectFailed,
        }
    }
}

/// Event names listeners register for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`ClientEvent::Open`]
    Open,
    /// [`ClientEvent::Message`]
    Message,
    /// [`ClientEvent::Close`]
    Close,
    /// [`ClientEvent::Error`]
    Error,
    /// [`ClientEvent::Reconnect`]
    Reconnect,
    /// [`ClientEvent::ReconnectFailed`]
    ReconnectFailed,
}

/// Handle returned by [`Listeners::on`], used to remove the listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Listener lists keyed by event name.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    entries: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
}

impl Listeners {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `kind`. Listeners run in registration order.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().entry(kind).or_default().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered for `kind`.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let Some(list) = entries.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    /// Listeners registered for `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.entries.read().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every listener for its kind.
    ///
    /// The list is snapshotted first, so listeners may call `on`/`off` (or
    /// manager methods) without deadlocking.
    pub fn emit(&self, event: &ClientEvent) {
        let kind = event.kind();
        let snapshot: Vec<Listener> = self
            .entries
            .read()
            .get(&kind)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                error!(event = ?kind, panic = %message, "event listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read();
        let counts: HashMap<_, _> = entries.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("Listeners").field("counts", &counts).finish()
    }
}
