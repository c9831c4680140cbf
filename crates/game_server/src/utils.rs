//! Factory functions for creating server instances.

use crate::{config::ServerConfig, server::GameServer};
use roundtable_core::ConnectionRegistry;
use std::sync::Arc;

/// Creates a game server with default configuration in front of `registry`.
///
/// # Example
///
/// ```rust
/// use game_server::create_server;
/// use roundtable_core::{assemble, QuizCatalog, RoomSettings, Scorers};
/// use std::sync::Arc;
///
/// let settings = RoomSettings::default();
/// let scorers = Scorers::local(settings.quiz_points);
/// let server = create_server(assemble(settings, Arc::new(QuizCatalog::new()), scorers));
/// assert_eq!(server.config().bind_address.port(), 8080);
/// ```
pub fn create_server(registry: Arc<ConnectionRegistry>) -> GameServer {
    GameServer::new(ServerConfig::default(), registry)
}

/// Creates a game server with custom configuration.
///
/// # Example
///
/// ```rust
/// use game_server::{create_server_with_config, ServerConfig};
/// use roundtable_core::{assemble, QuizCatalog, RoomSettings, Scorers};
/// use std::sync::Arc;
///
/// let config = ServerConfig {
///     bind_address: "0.0.0.0:9000".parse().unwrap(),
///     max_connections: 5000,
///     ..Default::default()
/// };
/// let settings = RoomSettings::default();
/// let scorers = Scorers::local(settings.quiz_points);
/// let registry = assemble(settings, Arc::new(QuizCatalog::new()), scorers);
///
/// let server = create_server_with_config(config, registry);
/// ```
pub fn create_server_with_config(config: ServerConfig, registry: Arc<ConnectionRegistry>) -> GameServer {
    GameServer::new(config, registry)
}
