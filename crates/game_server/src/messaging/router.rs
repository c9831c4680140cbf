//! Routes inbound text frames to the connection registry.
//!
//! Every frame goes through three gates before it can reach a room:
//!
//! 1. [`SecurityManager::validate_message`] - size, rate limit, JSON shape
//! 2. [`ClientMessage::parse`] - the closed set of message types
//! 3. [`ConnectionRegistry::handle`] - binding checks and room dispatch
//!
//! A frame stopped at gate 1 or 2 is answered with an `error_notice` on the
//! same connection and goes no further.
//!
//! # Example Message Format
//!
//! ```json
//! {"type": "join_room", "room_id": "QUIZ1", "identity_token": "d3v1c3", "display_name": "Ada"}
//! ```

use crate::security::{SecurityError, SecurityManager};
use roundtable_core::ConnectionRegistry;
use roundtable_events::{ClientMessage, ConnectionId, ErrorCode, ServerMessage};
use std::net::IpAddr;
use tracing::{debug, trace};

/// Why a frame was not routed.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error(transparent)]
    Rejected(#[from] SecurityError),

    #[error("unrecognised message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl RouteError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RouteError::Rejected(e) => e.code(),
            RouteError::Malformed(_) => ErrorCode::MalformedMessage,
        }
    }
}

/// Validates, parses and routes one text frame.
///
/// Returns the message kind on success. On failure the client has already
/// been sent an `error_notice`.
pub fn route_client_message(
    text: &str,
    connection_id: ConnectionId,
    remote_ip: IpAddr,
    security: &SecurityManager,
    registry: &ConnectionRegistry,
) -> Result<&'static str, RouteError> {
    let parsed = security
        .validate_message(remote_ip, text.as_bytes())
        .map_err(RouteError::from)
        .and_then(|()| ClientMessage::parse(text).map_err(RouteError::from));

    let message = match parsed {
        Ok(message) => message,
        Err(e) => {
            debug!("🚫 Rejected frame from {}: {}", connection_id, e);
            registry.send(connection_id, ServerMessage::error(e.code(), e.to_string()));
            return Err(e);
        }
    };

    let kind = message.kind();
    trace!("📨 Routing '{}' from {}", kind, connection_id);
    registry.handle(connection_id, message);
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use roundtable_core::{assemble, QuizCatalog, RoomSettings, Scorers};
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn fixtures(config: SecurityConfig) -> (SecurityManager, Arc<ConnectionRegistry>) {
        let settings = RoomSettings::default();
        let scorers = Scorers::local(settings.quiz_points);
        (
            SecurityManager::new(config),
            assemble(settings, Arc::new(QuizCatalog::new()), scorers),
        )
    }

    fn notice_code(message: ServerMessage) -> ErrorCode {
        match message {
            ServerMessage::ErrorNotice { code, .. } => code,
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_type_is_malformed() {
        let (security, registry) = fixtures(SecurityConfig::default());
        let (conn, mut rx) = registry.open();

        let result = route_client_message(r#"{"type":"teleport"}"#, conn, IP, &security, &registry);
        assert!(matches!(result, Err(RouteError::Malformed(_))));
        assert_eq!(notice_code(rx.recv().await.unwrap()), ErrorCode::MalformedMessage);
    }

    #[tokio::test]
    async fn test_valid_frame_reaches_registry() {
        let (security, registry) = fixtures(SecurityConfig::default());
        let (conn, mut rx) = registry.open();

        let kind = route_client_message(r#"{"type":"advance"}"#, conn, IP, &security, &registry).unwrap();
        assert_eq!(kind, "advance");
        // Unbound connections are refused by the registry, not the router.
        assert_eq!(notice_code(rx.recv().await.unwrap()), ErrorCode::NotInRoom);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flooding_is_rate_limited() {
        let (security, registry) = fixtures(SecurityConfig {
            max_requests_per_minute: 2,
            ..SecurityConfig::default()
        });
        let (conn, mut rx) = registry.open();
        let frame = r#"{"type":"set_ready","ready":true}"#;

        for _ in 0..2 {
            route_client_message(frame, conn, IP, &security, &registry).unwrap();
            assert_eq!(notice_code(rx.recv().await.unwrap()), ErrorCode::NotInRoom);
        }
        let result = route_client_message(frame, conn, IP, &security, &registry);
        assert!(matches!(result, Err(RouteError::Rejected(SecurityError::RateLimitExceeded(_)))));
        assert_eq!(notice_code(rx.recv().await.unwrap()), ErrorCode::RateLimited);
    }
}
