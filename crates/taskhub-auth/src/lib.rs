//! # taskhub-auth
//!
//! Shared-secret (HS256) JSON Web Tokens.
//!
//! The server only needs to know *who* is connecting: the `sub` claim
//! becomes the connection identity. Tokens are minted by the frontend with
//! the same secret; [`issue_token`] exists for local development and tests.

#![deny(unsafe_code)]

pub mod errors;
pub mod jwt;

pub use errors::AuthError;
pub use jwt::{Claims, TokenVerifier, bearer_token, issue_token};
