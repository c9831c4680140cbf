//! Connection handling logic for WebSocket clients.
//!
//! One handler runs per socket. It registers the socket with the connection
//! registry, pumps inbound text frames through the router and drains the
//! connection's outbox back onto the socket.

use crate::{
    connection::ConnectionManager, error::ServerError, messaging::route_client_message,
    security::SecurityManager,
};
use futures_util::{SinkExt, StreamExt};
use roundtable_core::ConnectionRegistry;
use roundtable_events::{ErrorCode, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, trace};

/// Shared state every connection handler needs.
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub security: Arc<SecurityManager>,
    pub connections: Arc<ConnectionManager>,
    /// Close a connection that sends nothing for this long.
    pub idle_timeout: Option<Duration>,
}

/// Handles a single client connection from handshake to cleanup.
///
/// # Connection Flow
///
/// 1. Perform the WebSocket handshake
/// 2. Register the connection with the registry and the connection manager
/// 3. Run the incoming and outgoing pumps until either ends, the client goes
///    idle, or `disconnect` fires
/// 4. Unregister the connection, which reports the drop to its room
///
/// On `disconnect` whatever is already queued for the client (such as a
/// `room_closed` notice) is flushed before the close frame is sent.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    context: ConnectionContext,
    mut disconnect: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {e}")))?;

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let ws_sender = Arc::new(tokio::sync::Mutex::new(ws_sender));
    let (connection_id, mut outbox) = context.registry.open();
    context.connections.add_connection(connection_id, addr).await;

    // Incoming frames go through the router to the registry
    let incoming_task = {
        let context = context.clone();
        let ws_sender = ws_sender.clone();

        async move {
            loop {
                let next = match context.idle_timeout {
                    Some(idle) => match tokio::time::timeout(idle, ws_receiver.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            debug!("⏱️ Connection {} idle for {:?}, closing", connection_id, idle);
                            break;
                        }
                    },
                    None => ws_receiver.next().await,
                };

                match next {
                    Some(Ok(Message::Text(text))) => {
                        let rejected = route_client_message(
                            text.as_str(),
                            connection_id,
                            addr.ip(),
                            &context.security,
                            &context.registry,
                        )
                        .is_err();
                        context.connections.record_message(connection_id, rejected).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        context.registry.send(
                            connection_id,
                            ServerMessage::error(ErrorCode::MalformedMessage, "binary frames are not supported"),
                        );
                        context.connections.record_message(connection_id, true).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let mut ws_sender = ws_sender.lock().await;
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("🔌 Client {} requested close", connection_id);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error for connection {}: {}", connection_id, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    };

    // Outgoing messages from rooms and the registry
    let outgoing_task = {
        let ws_sender = ws_sender.clone();
        async move {
            loop {
                tokio::select! {
                    biased;
                    message = outbox.recv() => match message {
                        Some(message) => {
                            if send_message(&ws_sender, &message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = disconnect.recv() => {
                        // Flush what the rooms already queued, e.g. room_closed
                        while let Ok(message) = outbox.try_recv() {
                            if send_message(&ws_sender, &message).await.is_err() {
                                break;
                            }
                        }
                        trace!("Connection {} closing for shutdown", connection_id);
                        break;
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = incoming_task => {},
        _ = outgoing_task => {},
    }

    context.registry.close(connection_id);
    context.connections.remove_connection(connection_id).await;

    let mut ws_sender = ws_sender.lock().await;
    let _ = ws_sender.send(Message::Close(None)).await;
    let _ = ws_sender.close().await;
    Ok(())
}

async fn send_message<S>(ws_sender: &tokio::sync::Mutex<S>, message: &ServerMessage) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = match message.to_json() {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize {} message: {}", message.kind(), e);
            return Ok(());
        }
    };
    let mut ws_sender = ws_sender.lock().await;
    ws_sender.send(Message::Text(text.into())).await.map_err(|e| {
        debug!("Failed to send message: {}", e);
    })
}
