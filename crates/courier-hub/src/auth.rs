//! Bearer token verification for `CONNECT`.

use std::collections::BTreeMap;

use courier_protocol::headers;
use courier_settings::AuthSettings;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Caller identity resolved from a verified token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id (`sub` claim).
    pub id: String,
    /// Display name carried in the token, used when the directory has none.
    pub display_name_hint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<Value>,
    #[serde(default)]
    name: Option<String>,
}

/// Verifies HS512 bearer tokens against a shared secret and optional issuer.
///
/// Side-effect free; every failure is reported as `None`.
#[derive(Clone)]
pub struct AuthGate {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl AuthGate {
    /// Gate for `secret`. An empty secret rejects every token.
    pub fn new(secret: &str, issuer: Option<&str>, leeway_secs: u64) -> Self {
        let key = (!secret.is_empty()).then(|| DecodingKey::from_secret(secret.as_bytes()));
        let mut validation = Validation::new(Algorithm::HS512);
        validation.leeway = leeway_secs;
        validation.validate_aud = false;
        if let Some(issuer) = issuer.filter(|i| !i.is_empty()) {
            validation.set_issuer(&[issuer]);
        }
        Self { key, validation }
    }

    /// Gate configured from settings.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(&settings.jwt_secret, settings.jwt_issuer.as_deref(), settings.leeway_secs)
    }

    /// Resolve the caller from `CONNECT` headers.
    ///
    /// The `Authorization` key and the `Bearer` scheme are matched
    /// case-insensitively. Signature, `exp` and (when configured) `iss` are
    /// checked; `sub` may be a string or a number and must be non-empty.
    pub fn authenticate(&self, frame_headers: &BTreeMap<String, String>) -> Option<Identity> {
        let key = self.key.as_ref()?;
        let value = frame_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(headers::AUTHORIZATION))
            .map(|(_, v)| v.as_str())?;
        let token = bearer_token(value)?;

        let claims = match jsonwebtoken::decode::<Claims>(token, key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!(error = %e, "bearer token rejected");
                return None;
            }
        };
        let id = claims.sub.as_ref().and_then(id_from_value)?;
        Some(Identity {
            id,
            display_name_hint: claims.name.filter(|n| !n.is_empty()),
        })
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("configured", &self.key.is_some())
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// String form of an id that may arrive as a JSON string or number.
pub(crate) fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
