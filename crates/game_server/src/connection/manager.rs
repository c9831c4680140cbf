//! Tracks every open connection and its metadata.

use super::client::ClientConnection;
use roundtable_events::ConnectionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Central bookkeeping for all client connections.
///
/// Uses an async `RwLock<HashMap>`: connection handlers only touch it on
/// accept, close and per-frame counters, never while routing.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: Arc<RwLock<HashMap<ConnectionId, ClientConnection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly accepted connection.
    pub async fn add_connection(&self, connection_id: ConnectionId, remote_addr: SocketAddr) {
        let mut connections = self.connections.write().await;
        connections.insert(connection_id, ClientConnection::new(remote_addr));
        info!("🔗 Connection {} from {}", connection_id, remote_addr);
    }

    /// Forgets a connection and returns its final metadata.
    pub async fn remove_connection(&self, connection_id: ConnectionId) -> Option<ClientConnection> {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(&connection_id);
        if let Some(connection) = &removed {
            info!(
                "❌ Connection {} from {} disconnected after {}s ({} messages, {} rejected)",
                connection_id,
                connection.remote_addr,
                connection.age_secs(),
                connection.messages_received,
                connection.messages_rejected
            );
        }
        removed
    }

    /// Counts a received frame, and whether it was rejected.
    pub async fn record_message(&self, connection_id: ConnectionId, rejected: bool) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.get_mut(&connection_id) {
            connection.messages_received += 1;
            if rejected {
                connection.messages_rejected += 1;
            }
        }
    }

    pub async fn get_connection(&self, connection_id: ConnectionId) -> Option<ClientConnection> {
        let connections = self.connections.read().await;
        connections.get(&connection_id).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_accounting() {
        let manager = ConnectionManager::new();
        let addr: SocketAddr = "10.0.0.5:4000".parse().unwrap();
        manager.add_connection(ConnectionId(1), addr).await;
        manager.add_connection(ConnectionId(2), addr).await;
        assert_eq!(manager.connection_count().await, 2);

        manager.record_message(ConnectionId(1), false).await;
        manager.record_message(ConnectionId(1), true).await;
        let info = manager.get_connection(ConnectionId(1)).await.unwrap();
        assert_eq!(info.messages_received, 2);
        assert_eq!(info.messages_rejected, 1);
        assert_eq!(info.remote_addr, addr);

        let removed = manager.remove_connection(ConnectionId(1)).await.unwrap();
        assert_eq!(removed.messages_received, 2);
        assert!(manager.remove_connection(ConnectionId(1)).await.is_none());
        assert_eq!(manager.connection_count().await, 1);
    }
}
