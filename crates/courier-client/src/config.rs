//! Reconnect manager configuration.

use std::time::Duration;

use courier_settings::ClientSettings;

/// Default maximum reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Default base reconnect delay.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1_000);
/// Default reconnect delay cap.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_millis(30_000);
/// Default heartbeat interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(30_000);
/// Default wait for `pong`.
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Default jitter ratio (0.0–1.0).
pub const DEFAULT_JITTER_RATIO: f64 = 0.3;

/// Timing and retry limits for [`ReconnectManager`](crate::ReconnectManager).
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectConfig {
    /// Attempts before `ReconnectFailed`.
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay (doubled per attempt).
    pub reconnect_delay: Duration,
    /// Cap on the unjittered reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Interval between `ping` probes while open.
    pub ping_interval: Duration,
    /// Wait for `pong` before force-closing.
    pub pong_timeout: Duration,
    /// Upper bound of the random addition, as a fraction of the delay.
    pub jitter_ratio: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl From<&ClientSettings> for ReconnectConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            max_reconnect_attempts: settings.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(settings.max_reconnect_delay_ms),
            ping_interval: Duration::from_millis(settings.ping_interval_ms),
            pong_timeout: Duration::from_millis(settings.pong_timeout_ms),
            jitter_ratio: settings.jitter_ratio.clamp(0.0, 1.0),
        }
    }
}
