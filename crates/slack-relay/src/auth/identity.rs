//! Identity issuance and verification.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode};
use subtle::ConstantTimeEq;

use super::claims::{Identity, TOKEN_ISSUER, TOKEN_VERSION, TokenClaims};
use super::error::{IdentityError, VerificationError};
use crate::wordlist;

/// Signs and verifies identity tokens with the process secret.
#[derive(Clone)]
pub struct IdentitySigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for IdentitySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySigner").finish_non_exhaustive()
    }
}

impl IdentitySigner {
    /// Create a signer from the shared HMAC secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, IdentityError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(IdentityError::MissingSecret);
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        })
    }

    /// Mint a fresh random identity and the token binding it.
    pub fn issue(&self) -> Result<(Identity, String), IdentityError> {
        let identity = Identity::new(wordlist::random_username(&mut rand::rng()));
        let token = self.sign(&identity)?;
        Ok((identity, token))
    }

    /// Sign a token for an existing identity.
    pub fn sign(&self, identity: &Identity) -> Result<String, IdentityError> {
        let claims = TokenClaims::for_identity(identity);
        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Verify a presented token and recover its identity.
    ///
    /// Checks run in order: signing method, signature, issuer, token
    /// version, embedded user. Expiry is not checked; tokens carry none.
    pub fn verify(&self, token: &str) -> Result<Identity, VerificationError> {
        let header =
            decode_header(token).map_err(|e| VerificationError::Malformed(e.to_string()))?;
        if !matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(VerificationError::SigningMethod(format!("{:?}", header.alg)));
        }

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => VerificationError::Signature,
                _ => VerificationError::Malformed(e.to_string()),
            })?
            .claims;

        if claims.iss.as_deref() != Some(TOKEN_ISSUER) {
            return Err(VerificationError::Issuer(claims.iss));
        }

        let version = claims.version();
        if !bool::from(version.as_bytes().ct_eq(TOKEN_VERSION.as_bytes())) {
            return Err(VerificationError::Version(version.to_string()));
        }

        claims
            .user
            .and_then(|user| serde_json::from_value::<Identity>(user).ok())
            .filter(|identity| !identity.username.is_empty())
            .ok_or(VerificationError::UserClaim)
    }
}
