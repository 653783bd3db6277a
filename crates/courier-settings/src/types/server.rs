//! Hub network settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hub network, routing and per-connection limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 picks an ephemeral port).
    pub port: u16,
    /// Concurrent socket limit; upgrades beyond it get HTTP 503.
    pub max_connections: usize,
    /// Outbound frames buffered per connection before it is considered stuck.
    pub send_queue_capacity: usize,
    /// Cap on an unterminated frame in the reassembly buffer.
    pub max_frame_bytes: usize,
    /// Upper bound on the user-directory lookup during `CONNECT`.
    pub auth_timeout_ms: u64,
    /// Grace period for connections to drain on shutdown.
    pub shutdown_timeout_secs: u64,
    /// WebSocket upgrade route.
    pub ws_path: String,
    /// Server-side publish route.
    pub publish_path: String,
}

impl ServerSettings {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Auth lookup timeout as a [`Duration`].
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 1024,
            send_queue_capacity: 256,
            max_frame_bytes: 1024 * 1024,
            auth_timeout_ms: 5_000,
            shutdown_timeout_secs: 30,
            ws_path: "/ws".to_string(),
            publish_path: "/publish".to_string(),
        }
    }
}
