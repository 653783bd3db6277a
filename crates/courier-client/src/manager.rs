//! `ReconnectManager`: one logical connection kept alive across socket
//! failures.
//!
//! State machine:
//!
//! ```text
//! Idle → Connecting → Open → Closed ─┬─→ ReconnectScheduled → Connecting
//!                                     └─→ (dormant after ReconnectFailed)
//! any ──close()──→ ManuallyClosed
//! ```
//!
//! Every socket gets a generation number. Events from a socket whose
//! generation is no longer current are dropped, so a close is handled once.

use std::sync::Arc;
use std::time::Duration;

use courier_protocol::{Frame, close_codes, encode};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff;
use crate::config::ReconnectConfig;
use crate::events::{ClientEvent, CloseEvent, EventKind, ListenerId, Listeners};
use crate::transport::{Connector, Incoming, Outgoing, SocketChannels, TungsteniteConnector};

/// Liveness probe sent outside any frame.
pub const PING: &str = "ping";
/// Expected reply to [`PING`]; consumed, never forwarded.
pub const PONG: &str = "pong";

/// Observable manager state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// Socket being opened.
    Connecting,
    /// Socket open; heartbeat running.
    Open,
    /// Socket gone and no retry armed (reconnect disabled or exhausted).
    Closed,
    /// Retry timer armed.
    ReconnectScheduled,
    /// Closed through [`ReconnectManager::close`].
    ManuallyClosed,
}

#[derive(Clone, Debug)]
struct Target {
    url: String,
    protocols: Vec<String>,
}

/// Optional cancellation handle for a pending timer. Cancelling twice, or
/// cancelling a slot that was never armed, is a no-op.
#[derive(Debug, Default)]
struct TimerSlot(Option<CancellationToken>);

impl TimerSlot {
    fn arm(&mut self) -> CancellationToken {
        self.cancel();
        let token = CancellationToken::new();
        self.0 = Some(token.clone());
        token
    }

    fn cancel(&mut self) {
        if let Some(token) = self.0.take() {
            token.cancel();
        }
    }

    fn is_armed(&self) -> bool {
        self.0.is_some()
    }
}

#[derive(Debug)]
struct Socket {
    generation: u64,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    stop: CancellationToken,
}

#[derive(Debug)]
struct State {
    phase: ConnectionState,
    target: Option<Target>,
    generation: u64,
    socket: Option<Socket>,
    attempt: u32,
    should_reconnect: bool,
    manual_close: bool,
    reconnect_timer: TimerSlot,
    heartbeat: TimerSlot,
    pending_pong: TimerSlot,
    last_ping: Option<Instant>,
    last_latency: Option<Duration>,
}

impl State {
    fn new() -> Self {
        Self {
            phase: ConnectionState::Idle,
            target: None,
            generation: 0,
            socket: None,
            attempt: 0,
            should_reconnect: true,
            manual_close: false,
            reconnect_timer: TimerSlot::default(),
            heartbeat: TimerSlot::default(),
            pending_pong: TimerSlot::default(),
            last_ping: None,
            last_latency: None,
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && matches!(self.phase, ConnectionState::Connecting | ConnectionState::Open)
    }

    fn open_socket(&self) -> Option<&Socket> {
        self.socket.as_ref().filter(|_| self.phase == ConnectionState::Open)
    }
}

struct Inner {
    config: Mutex<ReconnectConfig>,
    connector: Arc<dyn Connector>,
    listeners: Listeners,
    state: Mutex<State>,
}

/// Reconnecting socket handle. Clones share the same connection.
///
/// Methods that open sockets or arm timers spawn Tokio tasks and must be
/// called inside a Tokio runtime.
#[derive(Clone)]
pub struct ReconnectManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ReconnectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ReconnectManager")
            .field("state", &state.phase)
            .field("attempt", &state.attempt)
            .field("listeners", &self.inner.listeners)
            .finish_non_exhaustive()
    }
}

impl ReconnectManager {
    /// Manager that opens sockets through `connector`.
    pub fn new(config: ReconnectConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: Mutex::new(config),
                connector,
                listeners: Listeners::new(),
                state: Mutex::new(State::new()),
            }),
        }
    }

    /// Manager over `tokio-tungstenite`.
    pub fn with_tungstenite(config: ReconnectConfig) -> Self {
        Self::new(config, Arc::new(TungsteniteConnector))
    }

    /// Create a manager and start connecting right away.
    pub fn start(url: &str, protocols: &[&str], config: ReconnectConfig, connector: Arc<dyn Connector>) -> Self {
        let manager = Self::new(config, connector);
        manager.connect(url, protocols);
        manager
    }

    // ── listeners ───────────────────────────────────────────────────

    /// Register a listener for `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.on(kind, listener)
    }

    /// Remove a listener.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.listeners.off(kind, id)
    }

    fn emit(&self, event: &ClientEvent) {
        self.inner.listeners.emit(event);
    }

    // ── connection lifecycle ────────────────────────────────────────

    /// Open a socket to `url`. No-op while already connecting or open.
    pub fn connect(&self, url: &str, protocols: &[&str]) {
        self.connect_target(Target {
            url: url.to_owned(),
            protocols: protocols.iter().map(|p| (*p).to_owned()).collect(),
        });
    }

    fn connect_target(&self, target: Target) {
        let generation = {
            let mut st = self.inner.state.lock();
            if matches!(st.phase, ConnectionState::Connecting | ConnectionState::Open) {
                warn!(url = %target.url, "already connecting or connected");
                return;
            }
            st.reconnect_timer.cancel();
            st.target = Some(target.clone());
            st.manual_close = false;
            st.phase = ConnectionState::Connecting;
            st.generation += 1;
            st.generation
        };
        debug!(url = %target.url, generation, "connecting");

        let manager = self.clone();
        let _task = tokio::spawn(async move { manager.run_socket(generation, target).await });
    }

    async fn run_socket(self, generation: u64, target: Target) {
        let channels = match self.inner.connector.connect(&target.url, &target.protocols).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(url = %target.url, error = %e, "connect failed");
                if self.inner.state.lock().is_live(generation) {
                    self.emit(&ClientEvent::Error(e.to_string()));
                    self.finish(generation, CloseEvent {
                        code: None,
                        reason: e.to_string(),
                    });
                }
                return;
            }
        };

        let SocketChannels { outgoing, mut incoming } = channels;
        let stop = CancellationToken::new();
        {
            let mut st = self.inner.state.lock();
            if !st.is_live(generation) {
                debug!(url = %target.url, "socket opened after close, discarding");
                let _ = outgoing.send(Outgoing::Close {
                    code: close_codes::NORMAL,
                    reason: "Normal closure".into(),
                });
                return;
            }
            st.phase = ConnectionState::Open;
            st.attempt = 0;
            st.last_ping = None;
            st.socket = Some(Socket {
                generation,
                outgoing,
                stop: stop.clone(),
            });
        }

        self.start_heartbeat(generation);
        info!(url = %target.url, "connected");
        self.emit(&ClientEvent::Open);

        loop {
            let msg = tokio::select! {
                () = stop.cancelled() => return,
                msg = incoming.recv() => msg,
            };
            match msg {
                Some(Incoming::Text(text)) if text == PONG => self.handle_pong(),
                Some(Incoming::Text(text)) => self.emit(&ClientEvent::Message(text)),
                Some(Incoming::Error(e)) => {
                    warn!(error = %e, "socket error");
                    self.emit(&ClientEvent::Error(e));
                }
                Some(Incoming::Closed { code, reason }) => {
                    self.finish(generation, CloseEvent { code, reason });
                    return;
                }
                None => {
                    self.finish(generation, CloseEvent {
                        code: None,
                        reason: String::new(),
                    });
                    return;
                }
            }
        }
    }

    /// Tear down the socket of `generation` once, then maybe schedule a retry.
    fn finish(&self, generation: u64, event: CloseEvent) {
        let reconnect = {
            let mut st = self.inner.state.lock();
            if !st.is_live(generation) {
                return;
            }
            if let Some(socket) = st.socket.take() {
                socket.stop.cancel();
            }
            st.heartbeat.cancel();
            st.pending_pong.cancel();
            st.phase = ConnectionState::Closed;
            !st.manual_close && st.should_reconnect
        };

        info!(code = ?event.code, reason = %event.reason, reconnect, "connection closed");
        self.emit(&ClientEvent::Close(event));
        if reconnect {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&self) {
        let config = self.config();
        let max_attempts = config.max_reconnect_attempts;
        let scheduled = {
            let mut st = self.inner.state.lock();
            if st.attempt >= max_attempts {
                Err(st.attempt)
            } else {
                let delay = backoff::reconnect_delay(st.attempt, &config, &mut rand::rng());
                st.attempt += 1;
                st.phase = ConnectionState::ReconnectScheduled;
                Ok((st.attempt, delay, st.reconnect_timer.arm()))
            }
        };

        match scheduled {
            Err(attempt) => {
                error!(attempt, max_attempts, "max reconnect attempts reached");
                self.emit(&ClientEvent::ReconnectFailed { attempt, max_attempts });
            }
            Ok((attempt, delay, token)) => {
                info!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                self.emit(&ClientEvent::Reconnect {
                    attempt,
                    max_attempts,
                    delay,
                });
                let manager = self.clone();
                let _timer = tokio::spawn(async move {
                    tokio::select! {
                        () = token.cancelled() => {}
                        () = tokio::time::sleep(delay) => manager.fire_reconnect(&token),
                    }
                });
            }
        }
    }

    fn fire_reconnect(&self, token: &CancellationToken) {
        let (target, attempt) = {
            let mut st = self.inner.state.lock();
            if token.is_cancelled() || st.phase != ConnectionState::ReconnectScheduled {
                return;
            }
            st.reconnect_timer.cancel();
            (st.target.clone(), st.attempt)
        };
        if let Some(target) = target {
            info!(url = %target.url, attempt, "attempting reconnect");
            self.connect_target(target);
        }
    }

    /// Close the socket and stop reconnecting.
    ///
    /// Manual-close and reconnect flags are set before the socket is closed,
    /// so the resulting close never schedules a retry. All timers are
    /// cancelled.
    pub fn close(&self, code: u16, reason: &str) {
        let had_socket = {
            let mut st = self.inner.state.lock();
            st.manual_close = true;
            st.should_reconnect = false;
            st.reconnect_timer.cancel();
            st.heartbeat.cancel();
            st.pending_pong.cancel();
            st.phase = ConnectionState::ManuallyClosed;
            match st.socket.take() {
                Some(socket) => {
                    let _ = socket.outgoing.send(Outgoing::Close {
                        code,
                        reason: reason.to_owned(),
                    });
                    socket.stop.cancel();
                    true
                }
                None => false,
            }
        };

        info!(code, reason, "closed by client");
        if had_socket {
            self.emit(&ClientEvent::Close(CloseEvent {
                code: Some(code),
                reason: reason.to_owned(),
            }));
        }
    }

    // ── heartbeat ───────────────────────────────────────────────────

    fn start_heartbeat(&self, generation: u64) {
        let interval = self.config().ping_interval;
        if interval.is_zero() {
            return;
        }
        let token = self.inner.state.lock().heartbeat.arm();

        let manager = self.clone();
        let _task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    _ = ticker.tick() => manager.send_ping(generation),
                }
            }
        });
    }

    fn send_ping(&self, generation: u64) {
        let pong_timeout = self.config().pong_timeout;
        let deadline = {
            let mut st = self.inner.state.lock();
            let sent = st
                .open_socket()
                .filter(|s| s.generation == generation)
                .is_some_and(|s| s.outgoing.send(Outgoing::Text(PING.to_owned())).is_ok());
            if !sent {
                return;
            }
            st.last_ping = Some(Instant::now());
            // An outstanding deadline is kept so repeated pings cannot extend it.
            (!st.pending_pong.is_armed()).then(|| st.pending_pong.arm())
        };
        debug!("ping sent");

        if let Some(token) = deadline {
            let manager = self.clone();
            let _timer = tokio::spawn(async move {
                tokio::select! {
                    () = token.cancelled() => {}
                    () = tokio::time::sleep(pong_timeout) => manager.on_pong_timeout(generation, &token),
                }
            });
        }
    }

    fn handle_pong(&self) {
        let latency = {
            let mut st = self.inner.state.lock();
            st.pending_pong.cancel();
            let latency = st.last_ping.map(|sent| sent.elapsed());
            if latency.is_some() {
                st.last_latency = latency;
            }
            latency
        };
        debug!(latency_ms = latency.map(|l| l.as_millis() as u64), "pong received");
    }

    fn on_pong_timeout(&self, generation: u64, token: &CancellationToken) {
        {
            let mut st = self.inner.state.lock();
            if token.is_cancelled() || !st.is_live(generation) {
                return;
            }
            st.pending_pong.cancel();
            if let Some(socket) = st.open_socket() {
                let _ = socket.outgoing.send(Outgoing::Close {
                    code: close_codes::NORMAL,
                    reason: "Pong timeout".into(),
                });
            }
        }
        warn!("pong timeout, connection may be dead");
        self.finish(generation, CloseEvent {
            code: None,
            reason: "Pong timeout".into(),
        });
    }

    // ── sending ─────────────────────────────────────────────────────

    /// Queue text for the socket. Returns `false` when not open.
    pub fn send(&self, text: impl Into<String>) -> bool {
        let st = self.inner.state.lock();
        let Some(socket) = st.open_socket() else {
            warn!("cannot send, not connected");
            return false;
        };
        if socket.outgoing.send(Outgoing::Text(text.into())).is_err() {
            warn!("failed to queue message, socket writer gone");
            return false;
        }
        true
    }

    /// Serialize `value` as JSON and send it.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.send(text),
            Err(e) => {
                warn!(error = %e, "failed to encode message");
                false
            }
        }
    }

    /// Encode and send a protocol frame.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send(encode(frame))
    }

    // ── accessors ───────────────────────────────────────────────────

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().phase
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Attempts made since the last successful open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.state.lock().attempt
    }

    /// Reset the attempt counter (a dormant manager may then be reconnected).
    pub fn reset_reconnect_attempt(&self) {
        self.inner.state.lock().attempt = 0;
    }

    /// Change the retry limit.
    pub fn set_max_reconnect_attempts(&self, max: u32) {
        self.inner.config.lock().max_reconnect_attempts = max;
    }

    /// Allow automatic reconnection again (also clears the manual-close flag).
    pub fn enable_reconnect(&self) {
        let mut st = self.inner.state.lock();
        st.should_reconnect = true;
        st.manual_close = false;
    }

    /// Stop scheduling reconnects after future closes.
    pub fn disable_reconnect(&self) {
        self.inner.state.lock().should_reconnect = false;
    }

    /// Round trip of the last answered ping.
    pub fn last_latency(&self) -> Option<Duration> {
        self.inner.state.lock().last_latency
    }

    /// Current configuration.
    pub fn config(&self) -> ReconnectConfig {
        self.inner.config.lock().clone()
    }
}
