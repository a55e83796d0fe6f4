//! Identity token claims.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Issuer written into every token and required on verification.
pub const TOKEN_ISSUER: &str = "cut-me-some-slack";

/// Token schema version. Bumping it invalidates every outstanding token.
pub const TOKEN_VERSION: &str = "1";

/// An anonymous identity bound to one client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name used when posting to Slack.
    #[serde(alias = "Username")]
    pub username: String,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.username)
    }
}

/// JWT claims structure.
///
/// Every field is optional on the way in so that a token missing a claim is
/// reported as the specific claim failure rather than a generic parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,

    /// Subject (username).
    #[serde(default)]
    pub sub: Option<String>,

    /// Embedded identity. Left untyped until verification.
    #[serde(default)]
    pub user: Option<Value>,

    /// Token schema version.
    #[serde(default)]
    pub tv: Option<Value>,
}

impl TokenClaims {
    /// Claims for a freshly minted identity.
    pub fn for_identity(identity: &Identity) -> Self {
        Self {
            iss: Some(TOKEN_ISSUER.to_string()),
            sub: Some(identity.username.clone()),
            user: Some(serde_json::json!({ "username": identity.username })),
            tv: Some(Value::String(TOKEN_VERSION.to_string())),
        }
    }

    /// The token version as a string; anything that is not a JSON string
    /// yields an empty value and fails the version check.
    pub fn version(&self) -> &str {
        self.tv.as_ref().and_then(Value::as_str).unwrap_or_default()
    }
}
