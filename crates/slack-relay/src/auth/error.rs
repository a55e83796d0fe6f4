//! Identity errors.

use thiserror::Error;

/// Minting a new identity failed.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No signing secret configured.
    #[error("no signing secret configured")]
    MissingSecret,

    /// Token signing failed.
    #[error("failed to sign identity token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// A presented token was rejected.
#[derive(Debug, Error)]
pub enum VerificationError {
    /// Token could not be parsed at all.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Token was signed with something other than an HMAC algorithm.
    #[error("unexpected signing method: {0}")]
    SigningMethod(String),

    /// Signature did not match the process secret.
    #[error("invalid token signature")]
    Signature,

    /// Issuer claim missing or wrong.
    #[error("unexpected token issuer: {0:?}")]
    Issuer(Option<String>),

    /// Token schema version missing or wrong.
    #[error("unexpected token version: {0:?}")]
    Version(String),

    /// Embedded identity missing or empty.
    #[error("invalid user claim")]
    UserClaim,
}
