//! WebSocket envelope, per-connection client actor, and the broadcast hub.

pub mod client;
pub mod connection;
pub mod hub;
pub mod mailbox;
pub mod message;
