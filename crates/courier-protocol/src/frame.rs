//! Frame type, commands, header names and close codes.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ProtocolError;

/// Protocol version advertised in `CONNECTED`.
pub const PROTOCOL_VERSION: &str = "1.2";

/// Header names used on the wire.
pub mod headers {
    /// Bearer credential on `CONNECT` (matched case-insensitively).
    pub const AUTHORIZATION: &str = "Authorization";
    /// Versions a client accepts on `CONNECT`.
    pub const ACCEPT_VERSION: &str = "accept-version";
    /// Negotiated version on `CONNECTED`.
    pub const VERSION: &str = "version";
    /// Protocol-level heartbeat; always `0,0` (liveness is out-of-band).
    pub const HEART_BEAT: &str = "heart-beat";
    /// Target of `SUBSCRIBE` / `SEND` / `MESSAGE`.
    pub const DESTINATION: &str = "destination";
    /// Caller-chosen subscription id on `SUBSCRIBE` / `UNSUBSCRIBE`.
    pub const ID: &str = "id";
    /// Subscription id echoed on `MESSAGE`.
    pub const SUBSCRIPTION: &str = "subscription";
    /// Server-generated id on `MESSAGE`.
    pub const MESSAGE_ID: &str = "message-id";
    /// Body media type.
    pub const CONTENT_TYPE: &str = "content-type";
    /// Human-readable error text on `ERROR`.
    pub const MESSAGE: &str = "message";
}

/// WebSocket close codes used by the hub.
pub mod close_codes {
    /// Normal closure (client `DISCONNECT`).
    pub const NORMAL: u16 = 1000;
    /// Server shutting down.
    pub const GOING_AWAY: u16 = 1001;
    /// Authentication failure.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Reassembly buffer overflow.
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    /// Frame could not be delivered to the socket.
    pub const INTERNAL_ERROR: u16 = 1011;
}

const JSON_CONTENT_TYPE: &str = "application/json";

/// Frame commands understood by the hub.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Server handshake reply.
    Connected,
    /// Register interest in a destination.
    Subscribe,
    /// Drop a subscription.
    Unsubscribe,
    /// Application payload from a client.
    Send,
    /// Client-initiated close.
    Disconnect,
    /// Server delivery to a subscription.
    Message,
    /// Server-reported failure.
    Error,
    /// Anything else; ignored by the hub.
    Other(String),
}

impl Command {
    /// Parse a command line.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "SEND" => Self::Send,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "ERROR" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Wire spelling of the command.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Error => "ERROR",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of wire exchange.
///
/// Built once through the `with_*` methods and read-only afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    command: String,
    headers: BTreeMap<String, String>,
    body: String,
}

impl Frame {
    /// Start a frame with the given command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    pub(crate) fn from_parts(command: String, headers: BTreeMap<String, String>, body: String) -> Self {
        Self {
            command,
            headers,
            body,
        }
    }

    /// Add a header, replacing CR/LF (and `:` in the key) with spaces.
    #[must_use]
    pub fn with_header(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        let key = sanitize(key.as_ref(), true);
        let value = sanitize(value.as_ref(), false);
        let _ = self.headers.insert(key.trim().to_owned(), value.trim().to_owned());
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Raw command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Parsed command.
    pub fn kind(&self) -> Command {
        Command::parse(&self.command)
    }

    /// All headers.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Exact-match header lookup.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Case-insensitive header lookup.
    pub fn header_ignore_case(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Header lookup that treats a missing or empty value as an error.
    pub fn require_header(&self, key: &'static str) -> Result<&str, ProtocolError> {
        self.header(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProtocolError::MissingHeader {
                command: self.command.clone(),
                header: key,
            })
    }

    /// Frame body.
    pub fn body(&self) -> &str {
        &self.body
    }

    // ── client-side builders ────────────────────────────────────────

    /// `CONNECT` carrying a bearer token.
    pub fn connect(token: &str) -> Self {
        Self::new(Command::Connect.as_str())
            .with_header(headers::ACCEPT_VERSION, PROTOCOL_VERSION)
            .with_header(headers::AUTHORIZATION, format!("Bearer {token}"))
    }

    /// `SUBSCRIBE` to a destination under a caller-chosen id.
    pub fn subscribe(destination: &str, id: &str) -> Self {
        Self::new(Command::Subscribe.as_str())
            .with_header(headers::DESTINATION, destination)
            .with_header(headers::ID, id)
    }

    /// `UNSUBSCRIBE` a subscription id.
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe.as_str()).with_header(headers::ID, id)
    }

    /// `SEND` a JSON body to a destination.
    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        Self::new(Command::Send.as_str())
            .with_header(headers::DESTINATION, destination)
            .with_header(headers::CONTENT_TYPE, JSON_CONTENT_TYPE)
            .with_body(body)
    }

    /// `DISCONNECT`.
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect.as_str())
    }

    // ── server-side builders ────────────────────────────────────────

    /// `CONNECTED` reply. Protocol heartbeats are disabled.
    pub fn connected() -> Self {
        Self::new(Command::Connected.as_str())
            .with_header(headers::VERSION, PROTOCOL_VERSION)
            .with_header(headers::HEART_BEAT, "0,0")
    }

    /// `MESSAGE` delivery to one subscription.
    pub fn message(subscription: &str, message_id: &str, destination: &str, body: impl Into<String>) -> Self {
        Self::new(Command::Message.as_str())
            .with_header(headers::SUBSCRIPTION, subscription)
            .with_header(headers::MESSAGE_ID, message_id)
            .with_header(headers::DESTINATION, destination)
            .with_header(headers::CONTENT_TYPE, JSON_CONTENT_TYPE)
            .with_body(body)
    }

    /// `ERROR` whose body repeats the message header.
    pub fn error(message: &str) -> Self {
        Self::new(Command::Error.as_str())
            .with_header(headers::MESSAGE, message)
            .with_body(message)
    }
}

fn sanitize(raw: &str, is_key: bool) -> String {
    raw.chars()
        .map(|c| match c {
            '\r' | '\n' => ' ',
            ':' if is_key => ' ',
            other => other,
        })
        .collect()
}
