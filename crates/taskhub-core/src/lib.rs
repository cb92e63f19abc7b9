//! # taskhub-core
//!
//! Foundation types shared by every taskhub crate:
//!
//! - **Branded IDs**: [`ClientId`] as a newtype so connection IDs are never
//!   confused with user identities
//! - **Logging**: [`logging::init_subscriber`] for the global `tracing` subscriber

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::ClientId;
