//! Token verification settings.

use serde::{Deserialize, Serialize};

/// Shared-secret JWT verification.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC secret. An empty secret rejects every token.
    pub jwt_secret: String,
    /// Required `iss` claim, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_issuer: Option<String>,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
}

impl AuthSettings {
    /// Whether a secret has been configured.
    pub fn has_secret(&self) -> bool {
        !self.jwt_secret.is_empty()
    }
}
