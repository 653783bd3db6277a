//! Destination canonicalization.
//!
//! Destinations under [`USER_DESTINATION_PREFIX`] are private to one
//! identity: the registry stores them with the owner appended, so two users
//! subscribing to `/user/queue/rooms` never see each other's deliveries.

use std::fmt;

/// Prefix of identity-scoped destinations.
pub const USER_DESTINATION_PREFIX: &str = "/user/";

const IDENTITY_SEPARATOR: char = '|';

/// Registry key for a destination.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationKey(String);

impl DestinationKey {
    /// Canonical key for `destination` as seen by `identity`.
    ///
    /// Private destinations without an identity keep their bare form. A
    /// destination already ending in `|<identity>` is taken as canonical for
    /// that identity and left alone, which keeps this idempotent. Any other
    /// `|` is part of the path, so `/user/queue/a|b` and `/user/queue/a`
    /// remain distinct.
    pub fn canonicalize(destination: &str, identity: Option<&str>) -> Self {
        match identity {
            Some(id) if destination.starts_with(USER_DESTINATION_PREFIX) => {
                let already_scoped = destination
                    .strip_suffix(id)
                    .is_some_and(|base| base.ends_with(IDENTITY_SEPARATOR));
                if already_scoped {
                    Self(destination.to_owned())
                } else {
                    Self(format!("{destination}{IDENTITY_SEPARATOR}{id}"))
                }
            }
            _ => Self(destination.to_owned()),
        }
    }

    /// Canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key names an identity-scoped destination.
    pub fn is_private(&self) -> bool {
        self.0.starts_with(USER_DESTINATION_PREFIX)
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
