//! Session coordinator: per-connection frame dispatch and destination fanout.
//!
//! Each socket runs its own reader task, so frames from one connection are
//! handled in arrival order while a slow `SEND` on one connection never stalls
//! another. Registry mutation is serialized behind a single mutex.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use courier_protocol::{Command, DestinationKey, Frame, FrameBuffer, close_codes, headers};
use courier_settings::ServerSettings;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::auth::{AuthGate, Identity};
use crate::connection::{Connection, ConnectionId, Session, write_loop};
use crate::errors::{HubError, Result};
use crate::metrics::{
    AUTH_FAILURES_TOTAL, FRAME_ERRORS_TOTAL, FRAMES_RECEIVED_TOTAL, PUBLISHES_TOTAL, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DELIVERIES_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::registry::Registry;
use crate::services::{ChatMessageCreate, ChatMessageService, MessageType, UserDirectory, UserProfile};

/// Out-of-band liveness probe sent by clients outside any frame.
pub const PING: &str = "ping";
/// Reply to [`PING`].
pub const PONG: &str = "pong";

/// `SEND` destination that persists a chat message.
pub const CHAT_MESSAGE_DESTINATION: &str = "/pub/chat/message";
/// `SEND` destination that broadcasts a typing indicator.
pub const TYPING_DESTINATION: &str = "/pub/chat/typing";

/// Headers a publisher may not override on `MESSAGE`.
const RESERVED_MESSAGE_HEADERS: [&str; 4] = [
    headers::SUBSCRIPTION,
    headers::MESSAGE_ID,
    headers::DESTINATION,
    headers::CONTENT_TYPE,
];

/// Bound on flushing queued frames after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Room fanout destination for stored chat messages.
pub fn room_destination(room_id: i64) -> String {
    format!("/sub/chat/room/{room_id}")
}

/// Room fanout destination for typing indicators.
pub fn typing_destination(room_id: i64) -> String {
    format!("/sub/chat/room/{room_id}/typing")
}

/// Per-connection limits.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
    /// Cap on an unterminated inbound frame.
    pub max_frame_bytes: usize,
    /// Bound on the directory lookup during `CONNECT`.
    pub auth_timeout: Duration,
}

impl HubConfig {
    /// Limits taken from server settings.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            send_queue_capacity: settings.send_queue_capacity,
            max_frame_bytes: settings.max_frame_bytes,
            auth_timeout: settings.auth_timeout(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatSendBody {
    #[serde(default)]
    room_id: Value,
    message: Option<String>,
    #[serde(default)]
    image_urls: Vec<String>,
    audio_data: Option<String>,
    audio_url: Option<String>,
    message_type: Option<MessageType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingSendBody {
    room_id: Value,
    #[serde(default)]
    is_typing: Value,
}

/// The multiplexing point for every socket.
pub struct Hub {
    config: HubConfig,
    auth: AuthGate,
    chat: Arc<dyn ChatMessageService>,
    users: Arc<dyn UserDirectory>,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    registry: Mutex<Registry>,
}

impl Hub {
    /// Create a hub.
    pub fn new(
        config: HubConfig,
        auth: AuthGate,
        chat: Arc<dyn ChatMessageService>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            config,
            auth,
            chat,
            users,
            connections: DashMap::new(),
            registry: Mutex::new(Registry::new()),
        }
    }

    /// Hub limits.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Destinations with at least one subscriber.
    pub fn destination_count(&self) -> usize {
        self.registry.lock().destination_count()
    }

    /// Live subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        self.registry.lock().subscription_count()
    }

    /// Subscriptions held by one connection.
    pub fn subscriptions_of(&self, connection: &ConnectionId) -> usize {
        self.registry.lock().subscriptions_of(connection)
    }

    // ── connection lifecycle ────────────────────────────────────────

    /// Register a new connection. The receiver feeds its write task.
    pub fn open_connection(&self) -> (Arc<Connection>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.config.send_queue_capacity);
        let conn = Arc::new(Connection::new(ConnectionId::new(), tx));
        let _ = self.connections.insert(conn.id.clone(), Arc::clone(&conn));
        metrics::counter!(WS_CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        (conn, rx)
    }

    /// Tear a connection down: forget it and drop its subscriptions.
    ///
    /// Safe to call from any path (peer close, socket error, hub-initiated
    /// close); only the first call has an effect.
    pub fn close_connection(&self, conn: &Connection) {
        if !conn.mark_torn_down() {
            return;
        }
        conn.terminate();
        let _ = self.connections.remove(&conn.id);
        let removed = self.registry.lock().drop_connection(&conn.id);
        metrics::counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        info!(
            conn_id = %conn.id,
            user_id = conn.user_id().as_deref().unwrap_or(""),
            subscriptions = removed,
            age_ms = conn.age().as_millis() as u64,
            "connection closed"
        );
    }

    /// Drive one accepted socket until it closes.
    pub async fn serve_socket(self: Arc<Self>, socket: WebSocket, shutdown: CancellationToken) {
        let (conn, rx) = self.open_connection();
        let span = info_span!("connection", conn_id = %conn.id);

        async move {
            debug!("socket accepted");
            let (sink, mut stream) = socket.split();
            let writer = tokio::spawn(write_loop(sink, rx, Arc::clone(&conn)).in_current_span());
            let mut buffer = FrameBuffer::new(self.config.max_frame_bytes);

            loop {
                tokio::select! {
                    () = conn.closed() => break,
                    () = shutdown.cancelled() => {
                        conn.close(close_codes::GOING_AWAY, "Server shutting down");
                        break;
                    }
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => self.receive(&conn, &mut buffer, text.as_str()).await,
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "peer closed socket");
                            conn.terminate();
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(error = %e, "socket read failed");
                            conn.terminate();
                            break;
                        }
                        None => {
                            conn.terminate();
                            break;
                        }
                    },
                }
            }

            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
                warn!("write task did not finish in time");
            }
            self.close_connection(&conn);
        }
        .instrument(span)
        .await;
    }

    /// Feed one transport message into a connection's reassembly buffer and
    /// dispatch every frame it completes, in order.
    pub async fn receive(&self, conn: &Arc<Connection>, buffer: &mut FrameBuffer, text: &str) {
        if text == PING && buffer.pending_len() == 0 {
            let _ = conn.send_text(PONG.to_owned());
            return;
        }

        let pushed = buffer.push(text);
        while let Some(frame) = buffer.next_frame() {
            if !conn.is_open() {
                return;
            }
            self.dispatch(conn, frame).await;
        }
        if let Err(e) = pushed {
            warn!(conn_id = %conn.id, error = %e, "reassembly buffer overflow");
            self.reject(conn, &HubError::from(e));
        }
    }

    // ── dispatch ────────────────────────────────────────────────────

    /// Handle one complete frame. Failures become an `ERROR` frame on this
    /// connection only.
    pub async fn dispatch(&self, conn: &Arc<Connection>, frame: Frame) {
        let command = frame.kind();
        metrics::counter!(FRAMES_RECEIVED_TOTAL, "command" => command_label(&command)).increment(1);

        let result = match command {
            Command::Connect => self.handle_connect(conn, &frame).await,
            Command::Subscribe => self.handle_subscribe(conn, &frame),
            Command::Unsubscribe => self.handle_unsubscribe(conn, &frame),
            Command::Send => self.handle_send(conn, &frame).await,
            Command::Disconnect => {
                debug!(conn_id = %conn.id, "client disconnect");
                conn.close(close_codes::NORMAL, "Client disconnect");
                Ok(())
            }
            other => {
                debug!(conn_id = %conn.id, command = %other, "ignoring frame");
                Ok(())
            }
        };

        if let Err(err) = result {
            self.reject(conn, &err);
        }
    }

    fn reject(&self, conn: &Connection, err: &HubError) {
        let message = err.client_message();
        metrics::counter!(FRAME_ERRORS_TOTAL).increment(1);
        debug!(conn_id = %conn.id, error = %err, "frame rejected");
        let _ = conn.send_frame(&Frame::error(&message));
        if let Some(code) = err.close_code() {
            conn.close(code, &message);
        }
    }

    async fn handle_connect(&self, conn: &Connection, frame: &Frame) -> Result<()> {
        if conn.session().is_some() {
            return Err(HubError::AlreadyConnected);
        }
        let Some(identity) = self.auth.authenticate(frame.headers()) else {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            warn!(conn_id = %conn.id, "connect rejected");
            return Err(HubError::Unauthorized);
        };

        let profile = self.resolve_profile(&identity).await;
        info!(conn_id = %conn.id, user_id = %identity.id, "connection authenticated");
        conn.authenticate(Session { identity, profile });
        let _ = conn.send_frame(&Frame::connected());
        Ok(())
    }

    /// Directory lookup bounded by the auth timeout. A slow or failing
    /// directory degrades to the token's display name instead of holding
    /// the connection.
    async fn resolve_profile(&self, identity: &Identity) -> UserProfile {
        let lookup = tokio::time::timeout(self.config.auth_timeout, self.users.profile(&identity.id)).await;
        let mut profile = match lookup {
            Ok(Ok(profile)) => profile,
            Ok(Err(e)) => {
                warn!(user_id = %identity.id, error = %e, "profile lookup failed");
                UserProfile::default()
            }
            Err(_) => {
                warn!(user_id = %identity.id, timeout_ms = self.config.auth_timeout.as_millis() as u64, "profile lookup timed out");
                UserProfile::default()
            }
        };
        if profile.name.is_none() {
            profile.name.clone_from(&identity.display_name_hint);
        }
        profile
    }

    fn handle_subscribe(&self, conn: &Connection, frame: &Frame) -> Result<()> {
        let user_id = conn.user_id().ok_or(HubError::NotConnected)?;
        let destination = frame.require_header(headers::DESTINATION)?;
        let subscription = frame.require_header(headers::ID)?;

        let key = DestinationKey::canonicalize(destination, Some(user_id.as_str()));
        let previous = self.registry.lock().subscribe(&conn.id, subscription, key.clone());
        debug!(conn_id = %conn.id, subscription, destination = %key, moved_from = ?previous, "subscribed");
        Ok(())
    }

    fn handle_unsubscribe(&self, conn: &Connection, frame: &Frame) -> Result<()> {
        if conn.session().is_none() {
            return Err(HubError::NotConnected);
        }
        let subscription = frame.require_header(headers::ID)?;
        let removed = self.registry.lock().unsubscribe(&conn.id, subscription);
        debug!(conn_id = %conn.id, subscription, destination = ?removed, "unsubscribed");
        Ok(())
    }

    async fn handle_send(&self, conn: &Connection, frame: &Frame) -> Result<()> {
        let Some(session) = conn.session() else {
            return Err(HubError::Unauthorized);
        };
        let destination = frame.require_header(headers::DESTINATION)?;

        match destination {
            CHAT_MESSAGE_DESTINATION => self.post_chat_message(&session, frame.body()).await,
            TYPING_DESTINATION => {
                self.broadcast_typing(&session, frame.body());
                Ok(())
            }
            other => {
                debug!(conn_id = %conn.id, destination = other, "no handler for destination, ignoring");
                Ok(())
            }
        }
    }

    async fn post_chat_message(&self, session: &Session, body: &str) -> Result<()> {
        let parsed: ChatSendBody = serde_json::from_str(body).unwrap_or_default();
        let room_id = parse_room_id(&parsed.room_id).ok_or(HubError::InvalidRoomId)?;

        let request = ChatMessageCreate {
            room_id,
            message: parsed.message,
            image_urls: parsed.image_urls,
            audio_data: parsed.audio_data,
            audio_url: parsed.audio_url,
            message_type: parsed.message_type,
        };
        let record = self.chat.create_message(&session.identity.id, request).await?;
        let payload = serde_json::to_value(&record)?;
        let _ = self.publish_internal(&room_destination(record.room_id), &payload, None, &BTreeMap::new(), "chat");
        Ok(())
    }

    fn broadcast_typing(&self, session: &Session, body: &str) {
        let Ok(parsed) = serde_json::from_str::<TypingSendBody>(body) else {
            return;
        };
        let Some(room_id) = parse_room_id(&parsed.room_id) else {
            return;
        };
        let payload = json!({
            "userId": session.identity.id,
            "userName": session.profile.name,
            "userProfileImage": session.profile.profile_image,
            "isTyping": is_truthy(&parsed.is_typing),
            "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        });
        let _ = self.publish_internal(&typing_destination(room_id), &payload, None, &BTreeMap::new(), "typing");
    }

    // ── fanout ──────────────────────────────────────────────────────

    /// Deliver `payload` to every subscriber of `destination`.
    ///
    /// `user_id` scopes private (`/user/...`) destinations. Extra headers are
    /// copied onto each `MESSAGE` except the reserved ones. Closed sockets
    /// are skipped. Returns the number of frames queued.
    pub fn publish(
        &self,
        destination: &str,
        payload: &Value,
        user_id: Option<&str>,
        extra_headers: &BTreeMap<String, String>,
    ) -> usize {
        self.publish_internal(destination, payload, user_id, extra_headers, "external")
    }

    fn publish_internal(
        &self,
        destination: &str,
        payload: &Value,
        user_id: Option<&str>,
        extra_headers: &BTreeMap<String, String>,
        source: &'static str,
    ) -> usize {
        metrics::counter!(PUBLISHES_TOTAL, "source" => source).increment(1);
        let key = DestinationKey::canonicalize(destination, user_id);
        let targets = self.registry.lock().publish_targets(&key);
        if targets.is_empty() {
            debug!(destination = %key, "publish with no subscribers");
            return 0;
        }

        let body = payload.to_string();
        let extras: Vec<_> = extra_headers
            .iter()
            .filter(|(k, _)| !RESERVED_MESSAGE_HEADERS.contains(&k.as_str()))
            .collect();

        let mut delivered = 0;
        for target in targets {
            let Some(conn) = self.connections.get(&target.connection).map(|c| Arc::clone(c.value())) else {
                continue;
            };
            if !conn.is_open() {
                continue;
            }
            let message_id = Uuid::now_v7().to_string();
            let frame = extras.iter().fold(
                Frame::message(&target.subscription, &message_id, destination, body.clone()),
                |frame, (k, v)| frame.with_header(k, v),
            );
            if conn.send_frame(&frame) {
                delivered += 1;
            }
        }

        metrics::counter!(WS_DELIVERIES_TOTAL).increment(delivered as u64);
        debug!(destination = %key, delivered, source, "published");
        delivered
    }
}

/// Room id from a JSON number or numeric string.
fn parse_room_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
        Value::Null => false,
    }
}

fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Connect => "CONNECT",
        Command::Connected => "CONNECTED",
        Command::Subscribe => "SUBSCRIBE",
        Command::Unsubscribe => "UNSUBSCRIBE",
        Command::Send => "SEND",
        Command::Disconnect => "DISCONNECT",
        Command::Message => "MESSAGE",
        Command::Error => "ERROR",
        Command::Other(_) => "OTHER",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionPhase;
    use crate::errors::ServiceError;
    use crate::services::{InMemoryChatService, InMemoryUserDirectory};
    use async_trait::async_trait;
    use courier_protocol::{decode, encode};
    use jsonwebtoken::{Algorithm, EncodingKey, Header, get_current_timestamp};
    use tracing::Level;

    const SECRET: &str = "hub-test-secret";

    struct Fixture {
        hub: Arc<Hub>,
        chat: Arc<InMemoryChatService>,
    }

    struct Client {
        conn: Arc<Connection>,
        rx: mpsc::Receiver<String>,
        buffer: FrameBuffer,
    }

    impl Client {
        async fn send(&mut self, hub: &Hub, frame: &Frame) {
            hub.receive(&self.conn, &mut self.buffer, &encode(frame)).await;
        }

        fn frames(&mut self) -> Vec<Frame> {
            std::iter::from_fn(|| self.rx.try_recv().ok())
                .filter_map(|text| decode(&text))
                .collect()
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(InMemoryUserDirectory::new()))
    }

    fn fixture_with(users: Arc<dyn UserDirectory>) -> Fixture {
        let chat = Arc::new(InMemoryChatService::new(users.clone()));
        let hub = Arc::new(Hub::new(
            HubConfig {
                send_queue_capacity: 16,
                max_frame_bytes: 4096,
                auth_timeout: Duration::from_millis(200),
            },
            AuthGate::new(SECRET, None, 0),
            chat.clone(),
            users,
        ));
        Fixture { hub, chat }
    }

    fn token(sub: &str, exp_offset: i64) -> String {
        let exp = get_current_timestamp().saturating_add_signed(exp_offset);
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &json!({"sub": sub, "name": format!("name-{sub}"), "exp": exp}),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn open(hub: &Hub) -> Client {
        let (conn, rx) = hub.open_connection();
        Client {
            conn,
            rx,
            buffer: FrameBuffer::new(hub.config().max_frame_bytes),
        }
    }

    async fn connected(hub: &Hub, user: &str) -> Client {
        let mut client = open(hub);
        client.send(hub, &Frame::connect(&token(user, 3600))).await;
        let frames = client.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command(), "CONNECTED");
        client
    }

    #[tokio::test]
    async fn connect_with_valid_token() {
        let f = fixture();
        let client = connected(&f.hub, "u1").await;
        assert_eq!(client.conn.phase(), ConnectionPhase::Authenticated);
        assert_eq!(client.conn.user_id().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn connected_frame_headers() {
        let f = fixture();
        let mut client = open(&f.hub);
        client.send(&f.hub, &Frame::connect(&token("u1", 3600))).await;
        let frame = client.frames().remove(0);
        assert_eq!(frame.header("version"), Some("1.2"));
        assert_eq!(frame.header("heart-beat"), Some("0,0"));
    }

    #[tokio::test]
    async fn expired_token_gets_error_and_policy_close() {
        let f = fixture();
        let mut client = open(&f.hub);
        client.send(&f.hub, &Frame::connect(&token("u1", -600))).await;

        let frames = client.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command(), "ERROR");
        assert_eq!(frames[0].header("message"), Some("Unauthorized"));
        assert_eq!(client.conn.close_request().unwrap().code, 1008);
        assert_eq!(client.conn.phase(), ConnectionPhase::Closed);
        assert_eq!(f.hub.subscription_count(), 0);
    }

    #[tokio::test]
    async fn frames_after_rejected_connect_are_not_dispatched() {
        let f = fixture();
        let mut client = open(&f.hub);
        let wire = [Frame::connect("garbage"), Frame::subscribe("/topic/a", "1")]
            .iter()
            .map(encode)
            .collect::<String>();
        f.hub.receive(&client.conn, &mut client.buffer, &wire).await;

        assert_eq!(client.frames().len(), 1);
        assert_eq!(f.hub.subscription_count(), 0);
    }

    #[tokio::test]
    async fn second_connect_is_rejected_but_stays_open() {
        let f = fixture();
        let mut client = connected(&f.hub, "u1").await;
        client.send(&f.hub, &Frame::connect(&token("u2", 3600))).await;

        let frames = client.frames();
        assert_eq!(frames[0].header("message"), Some("Already connected"));
        assert!(client.conn.is_open());
        assert_eq!(client.conn.user_id().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn subscribe_before_connect_is_an_error() {
        let f = fixture();
        let mut client = open(&f.hub);
        client.send(&f.hub, &Frame::subscribe("/topic/a", "1")).await;
        client.send(&f.hub, &Frame::unsubscribe("1")).await;

        let frames = client.frames();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|fr| fr.header("message") == Some("Not connected")));
        assert!(client.conn.is_open());
    }

    #[tokio::test]
    async fn send_before_connect_closes_with_policy_violation() {
        let f = fixture();
        let mut client = open(&f.hub);
        client
            .send(&f.hub, &Frame::send(CHAT_MESSAGE_DESTINATION, r#"{"roomId":1,"message":"x"}"#))
            .await;

        assert_eq!(client.frames()[0].header("message"), Some("Unauthorized"));
        assert_eq!(client.conn.close_request().unwrap().code, 1008);
        assert!(f.chat.messages().is_empty());
    }

    #[tokio::test]
    async fn subscribe_missing_headers_is_an_error() {
        let f = fixture();
        let mut client = connected(&f.hub, "u1").await;
        client.send(&f.hub, &Frame::new("SUBSCRIBE").with_header("id", "1")).await;

        let frames = client.frames();
        assert_eq!(frames[0].command(), "ERROR");
        assert_eq!(frames[0].header("message"), Some("SUBSCRIBE frame missing destination header"));
        assert!(client.conn.is_open());
    }

    #[tokio::test]
    async fn chat_message_fans_out_to_room_subscribers() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        let mut b = connected(&f.hub, "b").await;
        let mut other = connected(&f.hub, "c").await;

        a.send(&f.hub, &Frame::subscribe("/sub/chat/room/42", "sub-1")).await;
        other.send(&f.hub, &Frame::subscribe("/sub/chat/room/7", "sub-1")).await;
        b.send(&f.hub, &Frame::send(CHAT_MESSAGE_DESTINATION, r#"{"roomId":42,"message":"hi"}"#))
            .await;

        let frames = a.frames();
        assert_eq!(frames.len(), 1);
        let message = &frames[0];
        assert_eq!(message.command(), "MESSAGE");
        assert_eq!(message.header("subscription"), Some("sub-1"));
        assert_eq!(message.header("destination"), Some("/sub/chat/room/42"));
        assert_eq!(message.header("content-type"), Some("application/json"));
        assert!(message.header("message-id").is_some_and(|id| !id.is_empty()));
        let body: Value = serde_json::from_str(message.body()).unwrap();
        assert_eq!(body["message"], "hi");
        assert_eq!(body["roomId"], 42);
        assert_eq!(body["sender"]["userId"], "b");

        assert!(b.frames().is_empty());
        assert!(other.frames().is_empty());
        assert_eq!(f.chat.messages().len(), 1);
    }

    #[tokio::test]
    async fn room_id_as_numeric_string_accepted() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        a.send(&f.hub, &Frame::subscribe("/sub/chat/room/5", "s")).await;
        a.send(&f.hub, &Frame::send(CHAT_MESSAGE_DESTINATION, r#"{"roomId":"5","message":"yo"}"#))
            .await;
        assert_eq!(a.frames().len(), 1);
    }

    #[tokio::test]
    async fn missing_room_id_is_an_error() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        for body in [r#"{"message":"hi"}"#, r#"{"roomId":"abc"}"#, "not json"] {
            a.send(&f.hub, &Frame::send(CHAT_MESSAGE_DESTINATION, body)).await;
            let frames = a.frames();
            assert_eq!(frames[0].header("message"), Some("roomId is required"), "body {body}");
        }
        assert!(a.conn.is_open());
        assert!(f.chat.messages().is_empty());
    }

    #[tokio::test]
    async fn service_failure_reported_to_sender_only() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        let mut b = connected(&f.hub, "b").await;
        b.send(&f.hub, &Frame::subscribe("/sub/chat/room/1", "s")).await;

        a.send(&f.hub, &Frame::send(CHAT_MESSAGE_DESTINATION, r#"{"roomId":1,"message":"  "}"#))
            .await;

        assert_eq!(a.frames()[0].header("message"), Some("message is empty"));
        assert!(b.frames().is_empty());
        assert!(a.conn.is_open() && b.conn.is_open());
    }

    #[tokio::test]
    async fn typing_indicator_published_with_profile() {
        let users = Arc::new(InMemoryUserDirectory::new());
        users.insert(
            "a",
            UserProfile {
                name: Some("Ada".into()),
                profile_image: Some("https://img/ada.png".into()),
            },
        );
        let f = fixture_with(users);
        let mut a = connected(&f.hub, "a").await;
        let mut b = connected(&f.hub, "b").await;
        b.send(&f.hub, &Frame::subscribe("/sub/chat/room/3/typing", "t")).await;

        a.send(&f.hub, &Frame::send(TYPING_DESTINATION, r#"{"roomId":3,"isTyping":true}"#)).await;

        let frames = b.frames();
        assert_eq!(frames.len(), 1);
        let body: Value = serde_json::from_str(frames[0].body()).unwrap();
        assert_eq!(body["userId"], "a");
        assert_eq!(body["userName"], "Ada");
        assert_eq!(body["userProfileImage"], "https://img/ada.png");
        assert_eq!(body["isTyping"], true);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn malformed_typing_payload_ignored_silently() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        a.send(&f.hub, &Frame::subscribe("/sub/chat/room/3/typing", "t")).await;
        a.send(&f.hub, &Frame::send(TYPING_DESTINATION, "{}")).await;
        a.send(&f.hub, &Frame::send(TYPING_DESTINATION, "nope")).await;
        assert!(a.frames().is_empty());
    }

    #[tokio::test]
    async fn display_name_falls_back_to_token_hint() {
        let f = fixture();
        let a = connected(&f.hub, "a").await;
        assert_eq!(a.conn.session().unwrap().profile.name.as_deref(), Some("name-a"));
    }

    #[tokio::test]
    async fn send_to_unknown_destination_is_ignored() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        a.send(&f.hub, &Frame::send("/pub/unknown", "{}")).await;
        assert!(a.frames().is_empty());
        assert!(a.conn.is_open());
    }

    #[tokio::test]
    async fn unknown_command_is_ignored() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        a.send(&f.hub, &Frame::new("ACK").with_header("id", "1")).await;
        assert!(a.frames().is_empty());
    }

    #[tokio::test]
    async fn disconnect_closes_normally() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        a.send(&f.hub, &Frame::disconnect()).await;
        assert_eq!(a.conn.close_request().unwrap().code, 1000);
    }

    #[tokio::test]
    async fn private_destinations_are_per_user() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        let mut b = connected(&f.hub, "b").await;
        a.send(&f.hub, &Frame::subscribe("/user/queue/rooms", "q")).await;
        b.send(&f.hub, &Frame::subscribe("/user/queue/rooms", "q")).await;

        let delivered = f.hub.publish("/user/queue/rooms", &json!({"n": 1}), Some("a"), &BTreeMap::new());
        assert_eq!(delivered, 1);
        assert_eq!(a.frames().len(), 1);
        assert!(b.frames().is_empty());

        assert_eq!(f.hub.publish("/user/queue/rooms", &json!({}), None, &BTreeMap::new()), 0);
    }

    #[tokio::test]
    async fn fanout_is_per_subscription() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        a.send(&f.hub, &Frame::subscribe("/topic/x", "one")).await;
        a.send(&f.hub, &Frame::subscribe("/topic/x", "two")).await;

        assert_eq!(f.hub.publish("/topic/x", &json!(1), None, &BTreeMap::new()), 2);
        let mut subs: Vec<_> = a
            .frames()
            .iter()
            .map(|fr| fr.header("subscription").unwrap_or_default().to_owned())
            .collect();
        subs.sort();
        assert_eq!(subs, ["one", "two"]);
    }

    #[tokio::test]
    async fn fanout_exactness() {
        let f = fixture();
        let mut subscribed = Vec::new();
        for n in 0..5 {
            let mut c = connected(&f.hub, &format!("s{n}")).await;
            c.send(&f.hub, &Frame::subscribe("/topic/d", "s")).await;
            subscribed.push(c);
        }
        let mut elsewhere = Vec::new();
        for n in 0..3 {
            let mut c = connected(&f.hub, &format!("e{n}")).await;
            c.send(&f.hub, &Frame::subscribe("/topic/other", "s")).await;
            elsewhere.push(c);
        }

        assert_eq!(f.hub.publish("/topic/d", &json!({"k": "v"}), None, &BTreeMap::new()), 5);
        for c in &mut subscribed {
            assert_eq!(c.frames().len(), 1);
        }
        for c in &mut elsewhere {
            assert!(c.frames().is_empty());
        }
    }

    #[tokio::test]
    async fn extra_headers_copied_except_reserved() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        a.send(&f.hub, &Frame::subscribe("/topic/x", "s")).await;
        let extras = BTreeMap::from([
            ("x-trace".to_string(), "abc".to_string()),
            ("subscription".to_string(), "hijack".to_string()),
            ("destination".to_string(), "/elsewhere".to_string()),
        ]);
        let _ = f.hub.publish("/topic/x", &json!(null), None, &extras);

        let frame = a.frames().remove(0);
        assert_eq!(frame.header("x-trace"), Some("abc"));
        assert_eq!(frame.header("subscription"), Some("s"));
        assert_eq!(frame.header("destination"), Some("/topic/x"));
        assert_eq!(frame.body(), "null");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        a.send(&f.hub, &Frame::subscribe("/topic/x", "s")).await;
        a.send(&f.hub, &Frame::unsubscribe("s")).await;
        assert_eq!(f.hub.publish("/topic/x", &json!(1), None, &BTreeMap::new()), 0);
        assert_eq!(f.hub.destination_count(), 0);
    }

    #[tokio::test]
    async fn closed_connections_are_skipped() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        let mut b = connected(&f.hub, "b").await;
        a.send(&f.hub, &Frame::subscribe("/topic/x", "s")).await;
        b.send(&f.hub, &Frame::subscribe("/topic/x", "s")).await;
        b.conn.close(close_codes::NORMAL, "bye");

        assert_eq!(f.hub.publish("/topic/x", &json!(1), None, &BTreeMap::new()), 1);
        assert_eq!(a.frames().len(), 1);
    }

    #[tokio::test]
    async fn close_connection_drops_subscriptions_once() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        a.send(&f.hub, &Frame::subscribe("/topic/x", "s1")).await;
        a.send(&f.hub, &Frame::subscribe("/topic/y", "s2")).await;
        assert_eq!(f.hub.subscriptions_of(&a.conn.id), 2);
        assert_eq!(f.hub.connection_count(), 1);

        f.hub.close_connection(&a.conn);
        f.hub.close_connection(&a.conn);

        assert_eq!(f.hub.connection_count(), 0);
        assert_eq!(f.hub.subscription_count(), 0);
        assert_eq!(f.hub.destination_count(), 0);
    }

    #[tokio::test]
    async fn ping_answered_with_pong() {
        let f = fixture();
        let mut a = open(&f.hub);
        f.hub.receive(&a.conn, &mut a.buffer, PING).await;
        assert_eq!(a.rx.try_recv().unwrap(), PONG);
    }

    #[tokio::test]
    async fn frames_split_across_messages_are_reassembled() {
        let f = fixture();
        let mut a = open(&f.hub);
        let wire = encode(&Frame::connect(&token("a", 3600)));
        let (head, tail) = wire.split_at(wire.len() / 2);
        f.hub.receive(&a.conn, &mut a.buffer, head).await;
        assert!(a.frames().is_empty());
        f.hub.receive(&a.conn, &mut a.buffer, tail).await;
        assert_eq!(a.frames()[0].command(), "CONNECTED");
    }

    #[tokio::test]
    async fn oversized_frame_closes_with_1009() {
        let f = fixture();
        let mut a = connected(&f.hub, "a").await;
        let huge = format!("SEND\ndestination:/x\n\n{}", "x".repeat(5000));
        f.hub.receive(&a.conn, &mut a.buffer, &huge).await;

        assert_eq!(a.frames()[0].header("message"), Some("Frame too large"));
        assert_eq!(a.conn.close_request().unwrap().code, 1009);
    }

    #[tokio::test]
    async fn slow_subscriber_overflow_is_logged_against_its_connection() {
        let (logs, _guard) = courier_logging::capture_logs();
        let users = Arc::new(InMemoryUserDirectory::new());
        let hub = Hub::new(
            HubConfig {
                send_queue_capacity: 2,
                max_frame_bytes: 4096,
                auth_timeout: Duration::from_millis(200),
            },
            AuthGate::new(SECRET, None, 0),
            Arc::new(InMemoryChatService::new(users.clone())),
            users,
        );
        let mut slow = connected(&hub, "slow").await;
        let mut fast = connected(&hub, "fast").await;
        slow.send(&hub, &Frame::subscribe("/topic/x", "s")).await;
        let _ = slow.frames();

        assert_eq!(hub.publish("/topic/x", &json!(1), None, &BTreeMap::new()), 1);
        assert_eq!(hub.publish("/topic/x", &json!(2), None, &BTreeMap::new()), 1);
        assert_eq!(hub.publish("/topic/x", &json!(3), None, &BTreeMap::new()), 0);
        assert!(!slow.conn.is_open());
        assert_eq!(slow.conn.close_request().unwrap().code, close_codes::INTERNAL_ERROR);

        assert!(logs.has_event(Level::WARN, "failed to queue frame, closing connection"));
        let scoped = logs.with_field("conn_id", slow.conn.id.as_str());
        let warning = scoped
            .iter()
            .find(|e| e.level == Level::WARN)
            .expect("overflow warning not tied to the slow connection");
        assert_eq!(warning.message, "failed to queue frame, closing connection");
        assert!(warning.field("error").is_some());

        fast.send(&hub, &Frame::subscribe("/topic/y", "s")).await;
        assert!(logs.with_field("conn_id", fast.conn.id.as_str()).iter().all(|e| e.level != Level::WARN));
    }

    struct SlowDirectory;

    #[async_trait]
    impl UserDirectory for SlowDirectory {
        async fn profile(&self, _user_id: &str) -> std::result::Result<UserProfile, ServiceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(UserProfile {
                name: Some("late".into()),
                profile_image: None,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_directory_does_not_block_connect() {
        let f = fixture_with(Arc::new(SlowDirectory));
        let a = connected(&f.hub, "a").await;
        let session = a.conn.session().unwrap();
        assert_eq!(session.profile.name.as_deref(), Some("name-a"));
    }

    #[test]
    fn parse_room_id_forms() {
        assert_eq!(parse_room_id(&json!(42)), Some(42));
        assert_eq!(parse_room_id(&json!(42.0)), Some(42));
        assert_eq!(parse_room_id(&json!(" 7 ")), Some(7));
        assert_eq!(parse_room_id(&json!(4.5)), None);
        assert_eq!(parse_room_id(&json!("x")), None);
        assert_eq!(parse_room_id(&json!(null)), None);
    }

    #[test]
    fn truthiness() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("yes")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(null)));
    }
}
