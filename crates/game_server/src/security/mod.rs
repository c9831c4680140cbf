//! Security module for input validation, rate limiting, and connection limits.

use crate::config::SecurityConfig;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

pub mod input_validation;
pub mod rate_limiter;

/// Central security manager for the game server
#[derive(Debug)]
pub struct SecurityManager {
    config: SecurityConfig,
    rate_limiter: rate_limiter::RateLimiter,
    connections_per_ip: DashMap<IpAddr, u32>,
}

impl SecurityManager {
    pub fn new(config: SecurityConfig) -> Self {
        let rate_limiter =
            rate_limiter::RateLimiter::new(config.max_requests_per_minute, Duration::from_secs(60));

        Self {
            config,
            rate_limiter,
            connections_per_ip: DashMap::new(),
        }
    }

    /// Admits a connection attempt and counts it against its IP.
    ///
    /// Every admitted connection must be released with
    /// [`SecurityManager::on_disconnect`].
    pub fn validate_connection(&self, ip: IpAddr) -> Result<(), SecurityError> {
        if self.config.banned_ips.contains(&ip) {
            return Err(SecurityError::BannedIp(ip));
        }

        let mut count = self.connections_per_ip.entry(ip).or_insert(0);
        if self.config.max_connections_per_ip > 0 && *count >= self.config.max_connections_per_ip {
            return Err(SecurityError::TooManyConnections(ip));
        }
        *count += 1;
        Ok(())
    }

    /// Validates an inbound text frame.
    pub fn validate_message(&self, ip: IpAddr, message: &[u8]) -> Result<(), SecurityError> {
        if message.len() > self.config.max_message_size {
            return Err(SecurityError::MessageTooLarge(message.len()));
        }
        if self.config.enable_rate_limiting && !self.rate_limiter.check_rate_limit(ip) {
            return Err(SecurityError::RateLimitExceeded(ip));
        }
        input_validation::validate_json_message(message, &self.config)
    }

    /// Releases a connection admitted by [`SecurityManager::validate_connection`].
    pub fn on_disconnect(&self, ip: IpAddr) {
        let emptied = match self.connections_per_ip.get_mut(&ip) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if emptied {
            self.connections_per_ip.remove_if(&ip, |_, count| *count == 0);
        }
    }

    /// Drops rate-limit state for clients that have gone quiet.
    pub fn cleanup(&self) {
        self.rate_limiter.cleanup_old_entries();
    }

    pub fn stats(&self) -> SecurityStats {
        SecurityStats {
            tracked_ips: self.connections_per_ip.len(),
            rate_limited_requests: self.rate_limiter.blocked_count(),
            banned_ips: self.config.banned_ips.len(),
        }
    }
}

/// Security-related statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityStats {
    pub tracked_ips: usize,
    pub rate_limited_requests: u64,
    pub banned_ips: usize,
}

/// Security-related errors
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("IP address {0} is banned")]
    BannedIp(IpAddr),

    #[error("Too many connections from IP {0}")]
    TooManyConnections(IpAddr),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Rate limit exceeded for IP {0}")]
    RateLimitExceeded(IpAddr),

    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("Malicious content detected")]
    MaliciousContent,
}

impl SecurityError {
    /// The code reported to the client for a rejected frame.
    pub fn code(&self) -> roundtable_events::ErrorCode {
        use roundtable_events::ErrorCode;
        match self {
            SecurityError::RateLimitExceeded(_) => ErrorCode::RateLimited,
            _ => ErrorCode::MalformedMessage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_events::ErrorCode;
    use std::net::Ipv4Addr;

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

    #[test]
    fn test_connection_limit_per_ip() {
        let security = SecurityManager::new(SecurityConfig {
            max_connections_per_ip: 2,
            ..SecurityConfig::default()
        });
        assert!(security.validate_connection(IP).is_ok());
        assert!(security.validate_connection(IP).is_ok());
        assert!(matches!(
            security.validate_connection(IP),
            Err(SecurityError::TooManyConnections(_))
        ));

        security.on_disconnect(IP);
        assert!(security.validate_connection(IP).is_ok());
        security.on_disconnect(IP);
        security.on_disconnect(IP);
        assert_eq!(security.stats().tracked_ips, 0);
    }

    #[test]
    fn test_banned_ip() {
        let security = SecurityManager::new(SecurityConfig {
            banned_ips: vec![IP],
            ..SecurityConfig::default()
        });
        assert!(matches!(security.validate_connection(IP), Err(SecurityError::BannedIp(_))));
        assert_eq!(security.stats().tracked_ips, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_message_code() {
        let security = SecurityManager::new(SecurityConfig {
            max_requests_per_minute: 1,
            ..SecurityConfig::default()
        });
        let frame = br#"{"type":"advance"}"#;
        assert!(security.validate_message(IP, frame).is_ok());
        let err = security.validate_message(IP, frame).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RateLimited);
        assert_eq!(security.stats().rate_limited_requests, 1);
    }
}
