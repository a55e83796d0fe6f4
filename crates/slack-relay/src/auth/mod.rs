//! Anonymous identity module.
//!
//! Clients are anonymous. On request the relay mints a random username and
//! hands the client an HS256-signed token binding it; presenting the token
//! again restores the same name. Tokens carry no expiry and nothing is
//! stored server-side.

mod claims;
mod error;
mod identity;

pub use claims::{Identity, TOKEN_ISSUER, TOKEN_VERSION, TokenClaims};
pub use error::{IdentityError, VerificationError};
pub use identity::IdentitySigner;
