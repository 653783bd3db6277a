//! Hub error types.
//!
//! Every dispatch failure is answered with an `ERROR` frame on the sending
//! connection only. [`HubError::close_code`] says whether the socket must also
//! be closed.

use courier_protocol::{ProtocolError, close_codes};
use thiserror::Error;

/// Failures raised by external collaborators (chat store, user directory).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Request was understood but refused.
    #[error("{0}")]
    Rejected(String),
    /// Collaborator could not be reached or timed out.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Errors produced while handling frames or running the server.
#[derive(Debug, Error)]
pub enum HubError {
    /// Missing or invalid bearer credential.
    #[error("Unauthorized")]
    Unauthorized,
    /// Subscription command before a successful `CONNECT`.
    #[error("Not connected")]
    NotConnected,
    /// `CONNECT` on an already authenticated connection.
    #[error("Already connected")]
    AlreadyConnected,
    /// Chat payload without a usable room id.
    #[error("roomId is required")]
    InvalidRoomId,
    /// Malformed or oversized frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// External collaborator failure.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// Payload could not be serialized for fanout.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    /// Listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl HubError {
    /// Close code to send after the `ERROR` frame, if the connection must end.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(close_codes::POLICY_VIOLATION),
            Self::Protocol(ProtocolError::FrameTooLarge { .. }) => Some(close_codes::MESSAGE_TOO_BIG),
            _ => None,
        }
    }

    /// Text placed in the `ERROR` frame.
    pub fn client_message(&self) -> String {
        match self {
            Self::Protocol(ProtocolError::FrameTooLarge { .. }) => "Frame too large".to_string(),
            Self::Encode(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
