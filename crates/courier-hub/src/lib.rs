//! # courier-hub
//!
//! Axum HTTP + `WebSocket` hub that multiplexes many connections through
//! destination-based publish/subscribe.
//!
//! - [`Hub`]: per-connection frame dispatch (`CONNECT`, `SUBSCRIBE`,
//!   `UNSUBSCRIBE`, `SEND`, `DISCONNECT`) and destination fanout
//! - [`Registry`]: `(connection, subscription id)` ↔ destination index
//! - [`AuthGate`]: HS512 bearer token verification at `CONNECT`
//! - [`CourierServer`]: `WebSocket` upgrade, publish entry point, health and
//!   Prometheus metrics, graceful shutdown via `CancellationToken`
//! - [`ChatMessageService`] / [`UserDirectory`]: external collaborators, with
//!   in-memory implementations

#![deny(unsafe_code)]

pub mod auth;
pub mod connection;
pub mod errors;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod services;
pub mod shutdown;

pub use auth::{AuthGate, Identity};
pub use connection::{Connection, ConnectionId, ConnectionPhase};
pub use errors::{HubError, Result, ServiceError};
pub use hub::{Hub, HubConfig};
pub use registry::Registry;
pub use server::{CourierServer, PublishRequest, ServerHandle};
pub use services::{
    ChatMessageCreate, ChatMessageRecord, ChatMessageService, ChatParticipant, InMemoryChatService,
    InMemoryUserDirectory, MessageType, UserDirectory, UserProfile,
};
pub use shutdown::ShutdownCoordinator;
