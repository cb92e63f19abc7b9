//! Request extractors that authenticate the caller.
//!
//! `/ws` reads the token from the `token` query parameter (browsers cannot set
//! headers on a `WebSocket` handshake); `/api/*` reads an `Authorization:
//! Bearer` header. Both reject with `401 {"error": "..."}`.

use axum::extract::{FromRequestParts, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::Deserialize;
use taskhub_auth::{AuthError, TokenVerifier, bearer_token};
use tracing::debug;

use crate::api::ApiError;
use crate::server::AppState;

/// User ID from an `Authorization: Bearer` token.
#[derive(Debug, Clone)]
pub struct BearerUser(pub String);

/// User ID from a `?token=` query parameter.
#[derive(Debug, Clone)]
pub struct QueryTokenUser(pub String);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let message = match err {
            AuthError::NotBearer => "Bearer token required",
            AuthError::InvalidToken(_) => "Invalid token",
            AuthError::MissingSubject => "User ID not found in token",
        };
        Self::Unauthorized(message.into())
    }
}

fn authenticate(verifier: &TokenVerifier, token: &str) -> Result<String, ApiError> {
    verifier.verify_subject(token).map_err(|e| {
        debug!(error = %e, "authentication failed");
        ApiError::from(e)
    })
}

impl FromRequestParts<AppState> for BearerUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::Unauthorized("Authorization header required".into()))?;
        let header = header.to_str().map_err(|_| AuthError::NotBearer)?;
        let token = bearer_token(header)?;
        authenticate(&state.verifier, token).map(Self)
    }
}

impl FromRequestParts<AppState> for QueryTokenUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(query)| query.token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Token query parameter required".into()))?;
        authenticate(&state.verifier, &token).map(Self)
    }
}
