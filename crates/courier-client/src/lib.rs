//! # courier-client
//!
//! Reconnecting `WebSocket` client for the courier hub.
//!
//! - [`ReconnectManager`]: one logical connection across socket failures,
//!   with capped exponential backoff plus jitter and a `ping`/`pong` heartbeat
//! - [`ClientEvent`] / [`EventKind`]: typed events (`open`, `message`,
//!   `close`, `error`, `reconnect`, `reconnect_failed`)
//! - [`Connector`]: seam between the manager and the socket library;
//!   [`TungsteniteConnector`] is the real one

#![deny(unsafe_code)]

pub mod backoff;
pub mod config;
pub mod errors;
pub mod events;
pub mod manager;
pub mod transport;

pub use config::ReconnectConfig;
pub use errors::{ClientError, Result};
pub use events::{ClientEvent, CloseEvent, EventKind, ListenerId, Listeners};
pub use manager::{ConnectionState, PING, PONG, ReconnectManager};
pub use transport::{Connector, Incoming, Outgoing, SocketChannels, TungsteniteConnector};
