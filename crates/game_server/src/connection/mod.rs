//! Connection accounting for open WebSocket clients.
//!
//! Routing lives in [`roundtable_core::ConnectionRegistry`]; this module only
//! keeps per-socket metadata for limits and logs.

pub mod client;
pub mod manager;

pub use client::ClientConnection;
pub use manager::ConnectionManager;
