//! Server configuration types and defaults.
//!
//! Transport settings only. Room behaviour is configured through
//! [`roundtable_core::RoomSettings`], which the server never reads.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Configuration structure for the WebSocket server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Seconds a connection may stay silent before it is closed (0 disables)
    pub connection_timeout: u64,

    /// Security configuration settings
    pub security: SecurityConfig,
}

/// Security configuration for input validation and protection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable rate limiting
    pub enable_rate_limiting: bool,

    /// Maximum requests per minute per IP
    pub max_requests_per_minute: u32,

    /// Maximum message size in bytes
    pub max_message_size: usize,

    /// Maximum allowed nesting depth for JSON messages
    pub max_json_depth: usize,

    /// Maximum allowed string length in JSON
    pub max_string_length: usize,

    /// Maximum allowed array/object size
    pub max_collection_size: usize,

    /// Banned IP addresses
    pub banned_ips: Vec<IpAddr>,

    /// Maximum concurrent connections per IP (0 disables the limit)
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: 1000,
            connection_timeout: 300,
            security: SecurityConfig::default(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_rate_limiting: true,
            max_requests_per_minute: 120,
            max_message_size: 16 * 1024,
            max_json_depth: 4,
            max_string_length: 256,
            max_collection_size: 32,
            banned_ips: Vec::new(),
            max_connections_per_ip: 10,
        }
    }
}
