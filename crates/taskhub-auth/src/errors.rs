//! Auth error types.

/// Errors that can occur while validating a presented token.
///
/// A request with no token at all is rejected by the HTTP layer before any
/// of these apply.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The `Authorization` header did not use the `Bearer` scheme.
    #[error("authorization header is not a bearer token")]
    NotBearer,

    /// Signature, algorithm, expiry, or structure check failed.
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// The token is valid but carries no `sub` claim.
    #[error("token has no subject")]
    MissingSubject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_bearer_display() {
        assert!(AuthError::NotBearer.to_string().contains("bearer"));
    }

    #[test]
    fn jwt_error_conversion() {
        let jwt_err = jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::ExpiredSignature,
        );
        let err = AuthError::from(jwt_err);
        assert!(err.to_string().starts_with("invalid token"));
    }
}
