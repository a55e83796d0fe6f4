//! Slack gateway errors.

use thiserror::Error;

/// Errors returned by platform gateway calls.
#[derive(Debug, Error)]
pub enum SlackError {
    /// HTTP client could not be built.
    #[error("failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Request never produced a response.
    #[error("request to {method} failed: {source}")]
    Http {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    /// Slack answered with `ok: false`.
    #[error("{method} returned error: {error}")]
    Api { method: String, error: String },

    /// Response body did not match the expected shape.
    #[error("failed to parse {method} response: {message}")]
    Parse { method: String, message: String },

    /// RTM websocket failure.
    #[error("rtm connection error: {0}")]
    Rtm(String),
}

impl SlackError {
    /// Whether retrying with the same credentials is pointless.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SlackError::Api { error, .. }
                if matches!(
                    error.as_str(),
                    "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked"
                )
        )
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, SlackError>;
