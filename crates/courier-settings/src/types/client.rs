//! Reconnect manager defaults.

use serde::{Deserialize, Serialize};

/// Defaults for the client-side reconnect manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Attempts before `reconnect_failed` is emitted.
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay.
    pub reconnect_delay_ms: u64,
    /// Ceiling on the reconnect delay.
    pub max_reconnect_delay_ms: u64,
    /// Interval between out-of-band pings.
    pub ping_interval_ms: u64,
    /// Wait for `pong` after a ping before force-closing.
    pub pong_timeout_ms: u64,
    /// Fraction of the delay added as random jitter (0 disables).
    pub jitter_ratio: f64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 10_000,
            jitter_ratio: 0.3,
        }
    }
}
