//! # Connection Registry
//!
//! Maps transport connections to rooms and players. The registry is the
//! boundary where wire messages become [`RoomEvent`]s: it never looks at game
//! state, it only knows which `(room, player)` a connection speaks for.
//!
//! Each connection owns one [`ConnectionSlot`] holding both its outbox and its
//! binding. Keeping them in the same map entry makes "bind" and "close"
//! atomic with respect to each other: the actor's bind either lands on a live
//! slot or reports the connection as gone.
//!
//! A join or rejoin records a *pending* binding straight away, so commands
//! sent right behind the join follow it into the same inbox in order. The
//! room confirms the binding when it accepts the player; until then the room
//! itself refuses anything the connection sends.

use crate::actor::Outbound;
use crate::directory::RoomDirectory;
use crate::error::CoreError;
use crate::state::RoomEvent;
use dashmap::DashMap;
use roundtable_events::{ClientMessage, ConnectionId, PlayerId, RoomId, ServerMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Which room and player a connection speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub room_id: RoomId,
    pub player_id: PlayerId,
    /// Set once the room has accepted the player on this connection.
    pub confirmed: bool,
}

#[derive(Debug)]
struct ConnectionSlot {
    outbox: mpsc::UnboundedSender<ServerMessage>,
    binding: Option<Binding>,
}

/// Every open connection: its outbox and its binding.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    slots: DashMap<ConnectionId, ConnectionSlot>,
    next_id: AtomicU64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let conn = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (outbox, rx) = mpsc::unbounded_channel();
        self.slots.insert(conn, ConnectionSlot { outbox, binding: None });
        (conn, rx)
    }

    fn binding(&self, conn: ConnectionId) -> Option<Binding> {
        self.slots.get(&conn).and_then(|slot| slot.binding.clone())
    }

    /// Records a binding the room has not confirmed yet. An existing binding
    /// for the same room and player is kept as it is.
    fn set_pending(&self, conn: ConnectionId, room_id: RoomId, player_id: PlayerId) {
        if let Some(mut slot) = self.slots.get_mut(&conn) {
            let same = slot
                .binding
                .as_ref()
                .is_some_and(|b| b.room_id == room_id && b.player_id == player_id);
            if !same {
                slot.binding = Some(Binding {
                    room_id,
                    player_id,
                    confirmed: false,
                });
            }
        }
    }

    fn take_binding(&self, conn: ConnectionId) -> Option<Binding> {
        self.slots.get_mut(&conn).and_then(|mut slot| slot.binding.take())
    }

    /// Drops a pending binding the room never saw.
    fn clear_pending(&self, conn: ConnectionId, room_id: &RoomId) {
        if let Some(mut slot) = self.slots.get_mut(&conn) {
            if slot
                .binding
                .as_ref()
                .is_some_and(|b| !b.confirmed && &b.room_id == room_id)
            {
                slot.binding = None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Outbound for ConnectionTable {
    fn deliver(&self, to: ConnectionId, message: ServerMessage) {
        match self.slots.get(&to) {
            Some(slot) => {
                if slot.outbox.send(message).is_err() {
                    trace!(conn = %to, "Outbox receiver gone");
                }
            }
            None => trace!(conn = %to, kind = message.kind(), "Dropping message for closed connection"),
        }
    }

    fn bind(&self, conn: ConnectionId, room_id: &RoomId, player_id: PlayerId) -> bool {
        match self.slots.get_mut(&conn) {
            Some(mut slot) => {
                slot.binding = Some(Binding {
                    room_id: room_id.clone(),
                    player_id,
                    confirmed: true,
                });
                true
            }
            None => false,
        }
    }

    fn unbind(&self, conn: ConnectionId, room_id: &RoomId) {
        if let Some(mut slot) = self.slots.get_mut(&conn) {
            if slot.binding.as_ref().is_some_and(|b| &b.room_id == room_id) {
                slot.binding = None;
            }
        }
    }

    fn release_pending(&self, conn: ConnectionId, room_id: &RoomId, player_id: PlayerId) {
        if let Some(mut slot) = self.slots.get_mut(&conn) {
            let pending = slot
                .binding
                .as_ref()
                .is_some_and(|b| !b.confirmed && &b.room_id == room_id && b.player_id == player_id);
            if pending {
                debug!(%conn, room_id = %room_id, "Join refused, pending binding released");
                slot.binding = None;
            }
        }
    }
}

/// Translates client messages into room events and routes them.
pub struct ConnectionRegistry {
    table: Arc<ConnectionTable>,
    directory: Arc<RoomDirectory>,
}

impl ConnectionRegistry {
    /// `table` must be the same [`Outbound`] the directory's rooms deliver to.
    pub fn new(table: Arc<ConnectionTable>, directory: Arc<RoomDirectory>) -> Self {
        Self { table, directory }
    }

    /// Registers a new connection and returns its id and outbox.
    pub fn open(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (conn, rx) = self.table.open();
        debug!(%conn, open = self.table.len(), "Connection registered");
        (conn, rx)
    }

    /// Handles one client message. Routing failures are reported to the
    /// connection as an `error_notice`.
    pub fn handle(&self, conn: ConnectionId, message: ClientMessage) {
        let kind = message.kind();
        if let Err(e) = self.route(conn, message) {
            debug!(%conn, kind, error = %e, "Message not routed");
            self.send(conn, ServerMessage::error(e.code(), e.to_string()));
        }
    }

    fn route(&self, conn: ConnectionId, message: ClientMessage) -> Result<(), CoreError> {
        match message {
            ClientMessage::JoinRoom {
                room_id,
                identity_token,
                display_name,
                options,
            } => {
                let room_id = RoomId::parse(&room_id)?;
                let player_id = PlayerId::from_identity(&identity_token);
                self.release_other(conn, &room_id, player_id);

                self.table.set_pending(conn, room_id.clone(), player_id);
                let event = RoomEvent::PlayerJoinRequested {
                    conn,
                    identity_token,
                    display_name,
                };
                self.directory
                    .join(room_id.clone(), options.as_ref(), event)
                    .inspect_err(|_| self.table.clear_pending(conn, &room_id))
            }

            ClientMessage::RejoinRoom {
                room_id,
                identity_token,
            } => {
                let room_id = RoomId::parse(&room_id)?;
                let player_id = PlayerId::from_identity(&identity_token);
                self.release_other(conn, &room_id, player_id);

                self.table.set_pending(conn, room_id.clone(), player_id);
                self.directory
                    .dispatch(&room_id, RoomEvent::ConnectionRestored { conn, player_id })
                    .inspect_err(|_| self.table.clear_pending(conn, &room_id))
            }

            ClientMessage::LeaveRoom => {
                let binding = self.table.take_binding(conn).ok_or(CoreError::NotAttached)?;
                self.directory.dispatch(
                    &binding.room_id,
                    RoomEvent::PlayerLeft {
                        conn,
                        player_id: binding.player_id,
                    },
                )
            }

            ClientMessage::SetReady { ready } => {
                self.forward(conn, |player_id| RoomEvent::ReadyToggled { conn, player_id, ready })
            }
            ClientMessage::StartRound => {
                self.forward(conn, |player_id| RoomEvent::StartRoundRequested { conn, player_id })
            }
            ClientMessage::SubmitAnswer { payload } => self.forward(conn, |player_id| {
                RoomEvent::AnswerSubmitted {
                    conn,
                    player_id,
                    payload,
                }
            }),
            ClientMessage::Advance => {
                self.forward(conn, |player_id| RoomEvent::AdvanceRequested { conn, player_id })
            }
            ClientMessage::ResetGame => {
                self.forward(conn, |player_id| RoomEvent::ResetRequested { conn, player_id })
            }
        }
    }

    /// Sends a room command on behalf of the player the connection speaks for.
    fn forward(
        &self,
        conn: ConnectionId,
        event: impl FnOnce(PlayerId) -> RoomEvent,
    ) -> Result<(), CoreError> {
        let binding = self.table.binding(conn).ok_or(CoreError::NotAttached)?;
        self.directory.dispatch(&binding.room_id, event(binding.player_id))
    }

    /// Leaves the connection's current membership if it is for a different
    /// room or player than the one it is about to join.
    fn release_other(&self, conn: ConnectionId, room_id: &RoomId, player_id: PlayerId) {
        let Some(current) = self.table.binding(conn) else {
            return;
        };
        if &current.room_id == room_id && current.player_id == player_id {
            return;
        }

        self.table.take_binding(conn);
        let left = RoomEvent::PlayerLeft {
            conn,
            player_id: current.player_id,
        };
        if let Err(e) = self.directory.dispatch(&current.room_id, left) {
            debug!(%conn, room_id = %current.room_id, error = %e, "Previous room not notified of switch");
        }
    }

    /// Unregisters a connection and tells its room it dropped.
    pub fn close(&self, conn: ConnectionId) {
        let Some((_, slot)) = self.table.slots.remove(&conn) else {
            return;
        };
        if let Some(binding) = slot.binding {
            let dropped = RoomEvent::ConnectionDropped {
                conn,
                player_id: binding.player_id,
            };
            if let Err(e) = self.directory.dispatch(&binding.room_id, dropped) {
                debug!(%conn, room_id = %binding.room_id, error = %e, "Room not notified of drop");
            }
        }
        debug!(%conn, open = self.table.len(), "Connection unregistered");
    }

    /// Queues a message for one connection.
    pub fn send(&self, conn: ConnectionId, message: ServerMessage) {
        self.table.deliver(conn, message);
    }

    pub fn binding(&self, conn: ConnectionId) -> Option<Binding> {
        self.table.binding(conn)
    }

    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    pub fn directory(&self) -> &Arc<RoomDirectory> {
        &self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomSettings;
    use crate::prompt::QuizCatalog;
    use crate::scorer::Scorers;
    use roundtable_events::ErrorCode;
    use std::time::Duration;

    fn registry() -> ConnectionRegistry {
        let table = Arc::new(ConnectionTable::new());
        let settings = RoomSettings::default();
        let scorers = Scorers::local(settings.quiz_points);
        let directory = Arc::new(RoomDirectory::new(
            settings,
            Arc::new(QuizCatalog::new()),
            scorers,
            table.clone(),
        ));
        ConnectionRegistry::new(table, directory)
    }

    fn join(room: &str, token: &str) -> ClientMessage {
        ClientMessage::JoinRoom {
            room_id: room.to_string(),
            identity_token: token.to_string(),
            display_name: token.to_string(),
            options: None,
        }
    }

    async fn next_of(rx: &mut mpsc::UnboundedReceiver<ServerMessage>, kind: &str) -> ServerMessage {
        loop {
            let message = rx.recv().await.expect("outbox closed");
            if message.kind() == kind {
                return message;
            }
        }
    }

    fn error_code(message: &ServerMessage) -> Option<ErrorCode> {
        match message {
            ServerMessage::ErrorNotice { code, .. } => Some(*code),
            _ => None,
        }
    }

    #[test]
    fn test_table_unbind_only_matching_room() {
        let table = ConnectionTable::new();
        let (conn, _rx) = table.open();
        let a = RoomId::parse("AAA").unwrap();
        let b = RoomId::parse("BBB").unwrap();
        let pid = PlayerId::from_identity("p");

        assert!(table.bind(conn, &a, pid));
        table.unbind(conn, &b);
        assert_eq!(table.binding(conn).map(|b| b.room_id), Some(a.clone()));
        table.unbind(conn, &a);
        assert!(table.binding(conn).is_none());

        table.slots.remove(&conn);
        assert!(!table.bind(conn, &a, pid), "closed connections cannot be bound");
    }

    #[test]
    fn test_release_pending_keeps_confirmed_bindings() {
        let table = ConnectionTable::new();
        let (conn, _rx) = table.open();
        let room = RoomId::parse("AAA").unwrap();
        let pid = PlayerId::from_identity("p");

        table.set_pending(conn, room.clone(), pid);
        table.release_pending(conn, &room, PlayerId::from_identity("other"));
        assert!(table.binding(conn).is_some(), "another player's refusal is ignored");
        table.release_pending(conn, &room, pid);
        assert!(table.binding(conn).is_none());

        assert!(table.bind(conn, &room, pid));
        table.release_pending(conn, &room, pid);
        assert!(table.binding(conn).is_some_and(|b| b.confirmed));
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let table = ConnectionTable::new();
        let (a, _ra) = table.open();
        let (b, _rb) = table.open();
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbound_command_is_not_in_room() {
        let registry = registry();
        let (conn, mut rx) = registry.open();
        registry.handle(conn, ClientMessage::StartRound);
        let notice = rx.recv().await.unwrap();
        assert_eq!(error_code(&notice), Some(ErrorCode::NotInRoom));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_room_id() {
        let registry = registry();
        let (conn, mut rx) = registry.open();
        registry.handle(conn, join("x!", "a"));
        let notice = rx.recv().await.unwrap();
        assert_eq!(error_code(&notice), Some(ErrorCode::InvalidRoomId));
        assert!(registry.binding(conn).is_none());
        assert_eq!(registry.directory().room_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_confirms_binding() {
        let registry = registry();
        let (conn, mut rx) = registry.open();
        registry.handle(conn, join("room1", "a"));
        assert_eq!(registry.binding(conn).map(|b| b.confirmed), Some(false));

        match next_of(&mut rx, "welcome").await {
            ServerMessage::Welcome { room_id, player_id } => {
                assert_eq!(room_id.as_str(), "ROOM1");
                assert_eq!(player_id, PlayerId::from_identity("a"));
            }
            other => panic!("unexpected message {other:?}"),
        }
        let binding = registry.binding(conn).unwrap();
        assert!(binding.confirmed);
        assert_eq!(binding.player_id, PlayerId::from_identity("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_unknown_room() {
        let registry = registry();
        let (conn, mut rx) = registry.open();
        registry.handle(
            conn,
            ClientMessage::RejoinRoom {
                room_id: "GHOST".into(),
                identity_token: "a".into(),
            },
        );
        let notice = rx.recv().await.unwrap();
        assert_eq!(error_code(&notice), Some(ErrorCode::NotInRoom));
        assert!(registry.binding(conn).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_reports_drop() {
        let registry = registry();
        let (host, mut host_rx) = registry.open();
        let (guest, _guest_rx) = registry.open();
        registry.handle(host, join("DROP", "host"));
        registry.handle(guest, join("DROP", "guest"));
        next_of(&mut host_rx, "welcome").await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        registry.close(guest);
        assert_eq!(registry.connection_count(), 1);
        loop {
            if let ServerMessage::RosterChanged { players, .. } = next_of(&mut host_rx, "roster_changed").await {
                if players.iter().any(|p| p.display_name == "guest" && !p.connected) {
                    break;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        let room = RoomId::parse("DROP").unwrap();
        assert_eq!(registry.directory().room_stats(&room), Some((1, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_rooms_leaves_the_old_one() {
        let registry = registry();
        let (conn, mut rx) = registry.open();
        registry.handle(conn, join("FIRST", "a"));
        next_of(&mut rx, "welcome").await;

        registry.handle(conn, join("SECOND", "a"));
        match next_of(&mut rx, "welcome").await {
            ServerMessage::Welcome { room_id, .. } => assert_eq!(room_id.as_str(), "SECOND"),
            other => panic!("unexpected message {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(1)).await;

        let first = RoomId::parse("FIRST").unwrap();
        assert_eq!(registry.directory().room_stats(&first), Some((0, 0)));
        assert_eq!(registry.binding(conn).map(|b| b.room_id.to_string()), Some("SECOND".into()));
    }
}
