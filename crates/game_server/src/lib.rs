//! # Game Server - WebSocket transport for Roundtable
//!
//! Accepts WebSocket clients, screens their frames and hands them to the
//! room coordinator in `roundtable_core`. The server holds **no game state**:
//! rooms live in their own actors and are reached only through the
//! [`ConnectionRegistry`](roundtable_core::ConnectionRegistry).
//!
//! ## Message Flow
//!
//! 1. A client sends a JSON text frame such as
//!    `{"type":"join_room","room_id":"ABCD","identity_token":"t","display_name":"Ada"}`
//! 2. [`security`] checks size, rate, nesting and content
//! 3. The frame is parsed into a `ClientMessage` and given to the registry
//! 4. The room's actor answers through the connection's outbox, which the
//!    connection handler writes back to the socket
//!
//! Anything rejected along the way is answered with an `error_notice` and
//! the connection stays open.
//!
//! ## Configuration
//!
//! [`ServerConfig`] covers the bind address, connection limits, the idle
//! timeout and the [`SecurityConfig`](config::SecurityConfig) limits.
//!
//! ## Shutdown
//!
//! [`GameServer::serve`] stops accepting, stops every room (players receive
//! `room_closed`), flushes each connection and closes it before returning.

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::GameServer;
pub use utils::{create_server, create_server_with_config};

pub mod config;
pub mod connection;
pub mod error;
pub mod security;
pub mod server;
pub mod utils;

mod messaging;
