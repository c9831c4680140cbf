//! Client connection metadata.

use roundtable_events::current_timestamp;
use std::net::SocketAddr;

/// Bookkeeping for one open WebSocket connection.
///
/// Which room and player the connection speaks for is owned by the
/// connection registry, not by this struct.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    /// The remote network address of the client
    pub remote_addr: SocketAddr,

    /// Unix seconds when this connection was accepted
    pub connected_at: u64,

    /// Text frames received so far
    pub messages_received: u64,

    /// Frames rejected by validation or rate limiting
    pub messages_rejected: u64,
}

impl ClientConnection {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            connected_at: current_timestamp(),
            messages_received: 0,
            messages_rejected: 0,
        }
    }

    /// Seconds since the connection was accepted.
    pub fn age_secs(&self) -> u64 {
        current_timestamp().saturating_sub(self.connected_at)
    }
}
