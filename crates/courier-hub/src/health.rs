//! `/health` body, read straight off the hub's counters.

use std::time::Instant;

use serde::Serialize;

use crate::hub::Hub;

/// Whether the server still accepts sockets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum HubStatus {
    /// Accepting upgrades.
    #[serde(rename = "ok")]
    Serving,
    /// Drain started; upgrades are refused.
    #[serde(rename = "shutting_down")]
    Draining,
}

/// Point-in-time view of the hub.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Serving or draining.
    pub status: HubStatus,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered sockets, authenticated or not.
    pub connections: usize,
    /// Destinations with at least one subscriber.
    pub destinations: usize,
    /// Live (connection, subscription id) pairs.
    pub subscriptions: usize,
}

impl HealthResponse {
    /// Sample `hub` now.
    pub fn snapshot(hub: &Hub, started: Instant, draining: bool) -> Self {
        Self {
            status: if draining { HubStatus::Draining } else { HubStatus::Serving },
            uptime_secs: started.elapsed().as_secs(),
            connections: hub.connection_count(),
            destinations: hub.destination_count(),
            subscriptions: hub.subscription_count(),
        }
    }
}
