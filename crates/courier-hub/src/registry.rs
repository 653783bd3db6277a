//! Bidirectional subscription index.
//!
//! `connection → {subscription id → destination}` for teardown and
//! `destination → {(connection, subscription id)}` for fanout. Both maps are
//! only touched through the methods below, so a destination with no targets
//! is always removed and a dropped connection never appears in a fanout set.

use std::collections::{HashMap, HashSet};

use courier_protocol::DestinationKey;

use crate::connection::ConnectionId;

/// Caller-chosen subscription id, unique within one connection.
pub type SubscriptionId = String;

/// One fanout recipient.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    /// Owning connection.
    pub connection: ConnectionId,
    /// Subscription id to echo on `MESSAGE`.
    pub subscription: SubscriptionId,
}

/// In-memory subscription registry. Not internally synchronized; the hub
/// wraps it in a mutex.
#[derive(Debug, Default)]
pub struct Registry {
    by_connection: HashMap<ConnectionId, HashMap<SubscriptionId, DestinationKey>>,
    by_destination: HashMap<DestinationKey, HashSet<Target>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `subscription` on `connection` to `destination`.
    ///
    /// Re-subscribing an existing id moves it; the previous destination is
    /// returned.
    pub fn subscribe(
        &mut self,
        connection: &ConnectionId,
        subscription: &str,
        destination: DestinationKey,
    ) -> Option<DestinationKey> {
        let previous = self.unsubscribe(connection, subscription);

        let target = Target {
            connection: connection.clone(),
            subscription: subscription.to_owned(),
        };
        let _ = self
            .by_destination
            .entry(destination.clone())
            .or_default()
            .insert(target);
        let _ = self
            .by_connection
            .entry(connection.clone())
            .or_default()
            .insert(subscription.to_owned(), destination);
        previous
    }

    /// Remove one subscription. Returns the destination it was bound to.
    pub fn unsubscribe(&mut self, connection: &ConnectionId, subscription: &str) -> Option<DestinationKey> {
        let subs = self.by_connection.get_mut(connection)?;
        let destination = subs.remove(subscription)?;
        if subs.is_empty() {
            let _ = self.by_connection.remove(connection);
        }
        self.remove_target(&destination, connection, subscription);
        Some(destination)
    }

    /// Snapshot of everyone subscribed to `destination`.
    pub fn publish_targets(&self, destination: &DestinationKey) -> Vec<Target> {
        self.by_destination
            .get(destination)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every subscription owned by `connection`. Returns how many were
    /// removed.
    pub fn drop_connection(&mut self, connection: &ConnectionId) -> usize {
        let Some(subs) = self.by_connection.remove(connection) else {
            return 0;
        };
        let count = subs.len();
        for (subscription, destination) in subs {
            self.remove_target(&destination, connection, &subscription);
        }
        count
    }

    /// Number of destinations with at least one subscriber.
    pub fn destination_count(&self) -> usize {
        self.by_destination.len()
    }

    /// Total live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.by_connection.values().map(HashMap::len).sum()
    }

    /// Subscriptions held by one connection.
    pub fn subscriptions_of(&self, connection: &ConnectionId) -> usize {
        self.by_connection.get(connection).map_or(0, HashMap::len)
    }

    /// Whether nothing is subscribed anywhere.
    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty() && self.by_destination.is_empty()
    }

    fn remove_target(&mut self, destination: &DestinationKey, connection: &ConnectionId, subscription: &str) {
        let Some(targets) = self.by_destination.get_mut(destination) else {
            return;
        };
        let _ = targets.remove(&Target {
            connection: connection.clone(),
            subscription: subscription.to_owned(),
        });
        if targets.is_empty() {
            let _ = self.by_destination.remove(destination);
        }
    }
}
