//! # taskhub-server
//!
//! Axum HTTP + `WebSocket` server for live task-board updates.
//!
//! - [`websocket::hub`]: single control loop owning the set of live clients;
//!   register, unregister and broadcast are messages, so the registry needs no lock
//! - [`websocket::client`]: one actor per connection with a read pump, a write
//!   pump and a bounded mailbox; slow consumers are evicted, never waited on
//! - [`websocket::message`]: the `{"type", "payload"}` wire envelope
//! - HTTP endpoints: `/health`, `/ws`, `/api/broadcast`, `/metrics`
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod api;
pub mod auth;
pub mod config;
pub mod cors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
