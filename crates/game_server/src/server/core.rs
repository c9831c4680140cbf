//! Core game server implementation.
//!
//! `GameServer` owns the WebSocket accept loop. Game state lives in the room
//! actors behind the [`ConnectionRegistry`]; the server only admits sockets,
//! hands them to [`handle_connection`] and tears everything down in order on
//! shutdown.

use crate::{
    config::ServerConfig,
    connection::ConnectionManager,
    error::ServerError,
    security::SecurityManager,
    server::handlers::{handle_connection, ConnectionContext},
};
use roundtable_core::ConnectionRegistry;
use roundtable_events::ShutdownState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How long connection handlers get to flush and close during shutdown.
const HANDLER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How often stale rate-limit buckets are dropped.
const SECURITY_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// The WebSocket front of the room coordinator.
///
/// # Shutdown order
///
/// 1. The accept loop stops and the listener is dropped
/// 2. The shared [`ShutdownState`] is initiated, which stops the idle-room reaper
/// 3. Every room is stopped; connected players get `room_closed`
/// 4. Connection handlers flush their outboxes and send a close frame
pub struct GameServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    security: Arc<SecurityManager>,
    connections: Arc<ConnectionManager>,
    /// Internal stop signal used by [`GameServer::shutdown`]
    shutdown_sender: broadcast::Sender<()>,
    /// Tells live connection handlers to flush and close
    disconnect_sender: broadcast::Sender<()>,
}

impl GameServer {
    /// Creates a server that routes client traffic into `registry`.
    pub fn new(config: ServerConfig, registry: Arc<ConnectionRegistry>) -> Self {
        let security = Arc::new(SecurityManager::new(config.security.clone()));
        let (shutdown_sender, _) = broadcast::channel(1);
        let (disconnect_sender, _) = broadcast::channel(1);

        Self {
            config,
            registry,
            security,
            connections: Arc::new(ConnectionManager::default()),
            shutdown_sender,
            disconnect_sender,
        }
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| ServerError::Network(format!("Failed to bind {}: {e}", self.config.bind_address)))
    }

    /// Starts the game server and runs until `shutdown_state` is initiated or
    /// [`GameServer::shutdown`] is called.
    pub async fn start_with_shutdown_state(&self, shutdown_state: ShutdownState) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown_state).await
    }

    /// Starts the game server and runs until [`GameServer::shutdown`] is called.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.start_with_shutdown_state(ShutdownState::new()).await
    }

    /// Runs the accept loop on an already bound listener.
    ///
    /// Returns once every room has stopped and the connection handlers have
    /// drained (or the drain timed out).
    pub async fn serve(&self, listener: TcpListener, shutdown_state: ShutdownState) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        info!("🚀 Starting game server on {}", local_addr);
        info!(
            "🔐 Security: rate limiting {}, {} connections per IP, {} byte frames",
            if self.config.security.enable_rate_limiting { "on" } else { "off" },
            self.config.security.max_connections_per_ip,
            self.config.security.max_message_size
        );

        let directory = self.registry.directory().clone();
        let reaper = directory.spawn_reaper(shutdown_state.clone());
        let cleanup = self.spawn_security_cleanup(shutdown_state.clone());

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_state.wait_initiated() => {
                    info!("🛑 Accept loop stopping - shutdown initiated");
                    break;
                }
                _ = shutdown_receiver.recv() => {
                    info!("🛑 Accept loop stopping - internal shutdown signal received");
                    break;
                }
                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = finished {
                        warn!("⚠️ Connection task ended abnormally: {}", e);
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.admit(&mut handlers, stream, addr),
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
            }
        }
        drop(listener);

        // Server shutdown cleanup
        info!("🧹 Performing server cleanup...");
        shutdown_state.initiate_shutdown();
        directory.shutdown_all().await;

        let _ = self.disconnect_sender.send(());
        let drained = tokio::time::timeout(HANDLER_DRAIN_TIMEOUT, async {
            while handlers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "⚠️ {} connection handler(s) did not close within {:?}, aborting",
                handlers.len(),
                HANDLER_DRAIN_TIMEOUT
            );
            handlers.shutdown().await;
        }

        if let Err(e) = reaper.await {
            warn!("⚠️ Room reaper ended abnormally: {}", e);
        }
        let _ = cleanup.await;

        info!("✅ Server cleanup completed");
        Ok(())
    }

    /// Applies admission checks and spawns a handler for an accepted socket.
    fn admit(&self, handlers: &mut JoinSet<()>, stream: tokio::net::TcpStream, addr: SocketAddr) {
        if handlers.len() >= self.config.max_connections {
            warn!("🚫 Rejecting {}: server is at {} connections", addr, self.config.max_connections);
            return;
        }
        let ip = addr.ip();
        if let Err(e) = self.security.validate_connection(ip) {
            warn!("🚫 Rejecting {}: {}", addr, e);
            return;
        }

        let context = ConnectionContext {
            registry: self.registry.clone(),
            security: self.security.clone(),
            connections: self.connections.clone(),
            idle_timeout: (self.config.connection_timeout > 0)
                .then(|| Duration::from_secs(self.config.connection_timeout)),
        };
        let disconnect = self.disconnect_sender.subscribe();
        let security = self.security.clone();

        handlers.spawn(async move {
            debug!("🔗 Accepted connection from {}", addr);
            if let Err(e) = handle_connection(stream, addr, context, disconnect).await {
                debug!("Connection error from {}: {}", addr, e);
            }
            security.on_disconnect(ip);
        });
    }

    fn spawn_security_cleanup(&self, shutdown_state: ShutdownState) -> tokio::task::JoinHandle<()> {
        let security = self.security.clone();
        tokio::spawn(async move {
            let mut ticker = interval(SECURITY_CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_state.wait_initiated() => break,
                    _ = ticker.tick() => security.cleanup(),
                }
            }
        })
    }

    /// Initiates server shutdown.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        let _ = self.shutdown_sender.send(());
        Ok(())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn security(&self) -> Arc<SecurityManager> {
        self.security.clone()
    }

    /// Per-socket bookkeeping for currently open connections.
    pub fn connection_manager(&self) -> Arc<ConnectionManager> {
        self.connections.clone()
    }
}
