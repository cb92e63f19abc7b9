//! Token signing and verification.

use std::fmt;

use chrono::{TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AuthError;

/// Claims read from (and written to) a token.
///
/// Only `sub` is required for a connection to be accepted; `exp` is checked
/// when present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// User email, informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Expiry (seconds since the epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued-at (seconds since the epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl Claims {
    /// Claims for `sub` valid for `ttl` from now.
    pub fn new(sub: impl Into<String>, email: Option<String>, ttl: TimeDelta) -> Self {
        let now = Utc::now();
        Self {
            sub: Some(sub.into()),
            email,
            exp: Some((now + ttl).timestamp()),
            iat: Some(now.timestamp()),
        }
    }

    /// Sign these claims with an HS256 secret.
    pub fn sign(&self, secret: &str) -> Result<String, AuthError> {
        let key = EncodingKey::from_secret(secret.as_bytes());
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::HS256), self, &key)?)
    }

    /// The `sub` claim, or [`AuthError::MissingSubject`].
    pub fn subject(&self) -> Result<&str, AuthError> {
        self.sub
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingSubject)
    }
}

/// Mint a token for `sub` valid for `ttl`.
pub fn issue_token(
    secret: &str,
    sub: &str,
    email: Option<&str>,
    ttl: TimeDelta,
) -> Result<String, AuthError> {
    Claims::new(sub, email.map(str::to_string), ttl).sign(secret)
}

/// Strip the `Bearer ` scheme from an `Authorization` header value.
pub fn bearer_token(header: &str) -> Result<&str, AuthError> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::NotBearer)
}

/// Verifies HS256 tokens against one shared secret.
///
/// Built once at startup; the decoding key and validation rules are reused
/// for every request.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Create a verifier for `secret`. Any algorithm other than HS256 is rejected.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is validated when present but not demanded
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Validate `token` and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .inspect_err(|e| debug!(error = %e, "token rejected"))?;
        Ok(data.claims)
    }

    /// Validate `token` and return its subject (the user identity).
    pub fn verify_subject(&self, token: &str) -> Result<String, AuthError> {
        let claims = self.verify(token)?;
        claims.subject().map(str::to_string)
    }
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}
