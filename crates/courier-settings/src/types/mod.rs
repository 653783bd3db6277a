//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a partial
//! JSON file only needs the keys it changes.

mod auth;
mod client;
mod server;

pub use auth::*;
pub use client::*;
pub use server::*;

use courier_logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Root settings for the hub binary and the reconnecting client.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "auth": { "jwtSecret": "..." },
///   "logging": { "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierSettings {
    /// Hub network and limits.
    pub server: ServerSettings,
    /// Token verification.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Reconnect manager defaults.
    pub client: ClientSettings,
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
