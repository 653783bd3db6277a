//! Client error types.

use thiserror::Error;

/// Errors raised while opening or driving a socket.
#[derive(Debug, Error)]
pub enum ClientError {
    /// URL could not be turned into a handshake request.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Subprotocol list is not a valid header value.
    #[error("invalid subprotocol list: {0}")]
    InvalidProtocol(String),
    /// Handshake or transport failure.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// Target URL.
        url: String,
        /// Underlying `WebSocket` error.
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    /// Payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
