//! # Room Directory
//!
//! Creates, looks up and reclaims room actors by [`RoomId`]. The directory is
//! pure routing: it never reads or writes room state, only the counters each
//! actor publishes in its [`RoomStats`](crate::actor::RoomStats).
//!
//! Delivery never blocks. Events are queued with `try_send` while the map
//! shard for the room is held, and the room's last-activity stamp is updated
//! in the same critical section. Reclamation re-checks idleness under the
//! shard write lock (`remove_if`), so a dispatch either lands before the room
//! is removed (and keeps it alive) or finds no room at all and creates a
//! fresh one. An actor that ended on its own is reclaimed on the next sweep,
//! or replaced on the spot by the next join.

use crate::actor::{spawn_room, Outbound, RoomHandle};
use crate::config::RoomSettings;
use crate::error::CoreError;
use crate::prompt::{PromptSource, QuizCatalog};
use crate::scorer::Scorers;
use crate::state::{Room, RoomEvent};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use roundtable_events::{RoomId, RoomOptions, ShutdownState};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

struct RoomEntry {
    handle: RoomHandle,
    created_at: Instant,
    /// Milliseconds since the directory epoch.
    last_activity_ms: AtomicU64,
}

/// Registry of live rooms.
pub struct RoomDirectory {
    rooms: DashMap<RoomId, RoomEntry>,
    settings: RoomSettings,
    catalog: Arc<QuizCatalog>,
    scorers: Scorers,
    outbound: Arc<dyn Outbound>,
    epoch: Instant,
    accepting: AtomicBool,
}

impl RoomDirectory {
    pub fn new(
        settings: RoomSettings,
        catalog: Arc<QuizCatalog>,
        scorers: Scorers,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            settings,
            catalog,
            scorers,
            outbound,
            epoch: Instant::now(),
            accepting: AtomicBool::new(true),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Routes a join, creating the room from `options` if it does not exist.
    ///
    /// A room whose actor has terminated without being reclaimed is replaced
    /// by a fresh one.
    ///
    /// # Errors
    ///
    /// `QuizNotFound` if a new quiz room names an unknown quiz, `RoomBusy` if
    /// the room's inbox is full, `ShuttingDown` once shutdown has begun.
    pub fn join(
        &self,
        room_id: RoomId,
        options: Option<&RoomOptions>,
        event: RoomEvent,
    ) -> Result<(), CoreError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(CoreError::ShuttingDown);
        }

        match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().handle.is_terminated() {
                    warn!(room_id = %room_id, "⚠️ Room actor was gone, recreating the room");
                    match self.create_entry(&room_id, options) {
                        Ok(fresh) => drop(entry.insert(fresh).handle.stop()),
                        Err(e) => {
                            entry.remove();
                            return Err(e);
                        }
                    }
                }
                self.deliver(entry.get(), &room_id, event)
            }
            Entry::Vacant(vacant) => {
                let entry = vacant.insert(self.create_entry(&room_id, options)?);
                self.deliver(&entry, &room_id, event)
            }
        }
    }

    fn create_entry(&self, room_id: &RoomId, options: Option<&RoomOptions>) -> Result<RoomEntry, CoreError> {
        let options = options.cloned().unwrap_or_default();
        let prompts = PromptSource::for_room(&options, &self.settings, &self.catalog)?;
        let rules = self.settings.rules_for(&options);
        let room = Room::new(room_id.clone(), rules, prompts);
        let handle = spawn_room(
            room,
            self.scorers.for_mode(options.mode),
            Arc::clone(&self.outbound),
            self.settings.inbox_capacity,
        );
        info!(room_id = %room_id, mode = ?options.mode, "🆕 Room created");

        Ok(RoomEntry {
            handle,
            created_at: Instant::now(),
            last_activity_ms: AtomicU64::new(self.now_ms()),
        })
    }

    /// Routes an event to an existing room.
    pub fn dispatch(&self, room_id: &RoomId, event: RoomEvent) -> Result<(), CoreError> {
        let entry = self
            .rooms
            .get(room_id)
            .ok_or_else(|| CoreError::RoomNotFound(room_id.clone()))?;
        self.deliver(&entry, room_id, event)
    }

    fn deliver(&self, entry: &RoomEntry, room_id: &RoomId, event: RoomEvent) -> Result<(), CoreError> {
        entry.last_activity_ms.store(self.now_ms(), Ordering::Release);
        match entry.handle.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                warn!(room_id = %room_id, event = event.kind(), "⚠️ Room inbox full");
                Err(CoreError::RoomBusy(room_id.clone()))
            }
            Err(TrySendError::Closed(_)) => Err(CoreError::RoomClosed(room_id.clone())),
        }
    }

    fn is_idle(&self, entry: &RoomEntry, now_ms: u64) -> bool {
        if entry.handle.is_terminated() {
            return true;
        }
        let idle_for = now_ms.saturating_sub(entry.last_activity_ms.load(Ordering::Acquire));
        entry.handle.stats().connected() == 0
            && entry.handle.inbox_is_empty()
            && idle_for >= self.settings.idle_timeout.as_millis() as u64
    }

    /// Stops every room that has had nobody connected and nothing to do for
    /// the idle timeout. Returns how many rooms were reclaimed.
    pub fn reap_idle(&self) -> usize {
        let now_ms = self.now_ms();
        let candidates: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|entry| self.is_idle(entry.value(), now_ms))
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = 0;
        for room_id in candidates {
            let removed = self
                .rooms
                .remove_if(&room_id, |_, entry| self.is_idle(entry, self.now_ms()));
            if let Some((room_id, entry)) = removed {
                // The actor refuses anything still queued once it sees the stop.
                let age_secs = entry.created_at.elapsed().as_secs();
                drop(entry.handle.stop());
                info!(room_id = %room_id, age_secs, "🧹 Reclaimed idle room");
                reaped += 1;
            }
        }
        reaped
    }

    /// Stops every room and waits for the actors to finish.
    pub async fn shutdown_all(&self) {
        self.accepting.store(false, Ordering::Release);

        let room_ids: Vec<RoomId> = self.rooms.iter().map(|entry| entry.key().clone()).collect();
        let mut tasks = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            if let Some((_, entry)) = self.rooms.remove(&room_id) {
                tasks.push(entry.handle.stop());
            }
        }

        let count = tasks.len();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "⚠️ Room actor ended abnormally");
            }
        }
        info!("🏠 Stopped {} rooms", count);
    }

    /// Runs [`RoomDirectory::reap_idle`] every `reap_interval` until shutdown.
    pub fn spawn_reaper(self: &Arc<Self>, shutdown: ShutdownState) -> JoinHandle<()> {
        let directory = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(directory.settings.reap_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.wait_initiated() => break,
                    _ = ticker.tick() => {
                        let reaped = directory.reap_idle();
                        if reaped > 0 {
                            debug!(reaped, remaining = directory.room_count(), "Idle room sweep");
                        }
                    }
                }
            }
            debug!("Room reaper stopped");
        })
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// `(connected, players)` of a live room.
    pub fn room_stats(&self, room_id: &RoomId) -> Option<(usize, usize)> {
        self.rooms.get(room_id).map(|entry| {
            let stats = entry.handle.stats();
            (stats.connected(), stats.players())
        })
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &QuizCatalog {
        &self.catalog
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_events::{ConnectionId, GameMode, PlayerId, ServerMessage};
    use std::time::Duration;

    struct NullOutbound;

    impl Outbound for NullOutbound {
        fn deliver(&self, _to: ConnectionId, _message: ServerMessage) {}

        fn bind(&self, _conn: ConnectionId, _room_id: &RoomId, _player_id: PlayerId) -> bool {
            true
        }

        fn unbind(&self, _conn: ConnectionId, _room_id: &RoomId) {}
    }

    fn directory(settings: RoomSettings) -> Arc<RoomDirectory> {
        let scorers = Scorers::local(settings.quiz_points);
        Arc::new(RoomDirectory::new(
            settings,
            Arc::new(QuizCatalog::new()),
            scorers,
            Arc::new(NullOutbound),
        ))
    }

    fn join_event(conn: u64, token: &str) -> RoomEvent {
        RoomEvent::PlayerJoinRequested {
            conn: ConnectionId(conn),
            identity_token: token.to_string(),
            display_name: token.to_string(),
        }
    }

    fn room(code: &str) -> RoomId {
        RoomId::parse(code).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_creates_then_routes() {
        let directory = directory(RoomSettings::default());
        directory.join(room("ABC"), None, join_event(1, "a")).unwrap();
        directory.join(room("ABC"), None, join_event(2, "b")).unwrap();
        assert_eq!(directory.room_count(), 1);

        settle().await;
        assert_eq!(directory.room_stats(&room("ABC")), Some((2, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_quiz_creates_nothing() {
        let directory = directory(RoomSettings::default());
        let options = RoomOptions {
            mode: GameMode::Quiz,
            quiz_id: Some("missing".into()),
            ..Default::default()
        };
        let result = directory.join(room("QQQ"), Some(&options), join_event(1, "a"));
        assert!(matches!(result, Err(CoreError::QuizNotFound(_))));
        assert!(!directory.contains(&room("QQQ")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_to_unknown_room() {
        let directory = directory(RoomSettings::default());
        let result = directory.dispatch(
            &room("NOPE"),
            RoomEvent::ConnectionRestored {
                conn: ConnectionId(1),
                player_id: PlayerId::from_identity("a"),
            },
        );
        assert!(matches!(result, Err(CoreError::RoomNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_inbox_is_busy() {
        let directory = directory(RoomSettings {
            inbox_capacity: 1,
            ..Default::default()
        });
        // The actor has not run yet, so the first event fills the inbox.
        directory.join(room("BUSY"), None, join_event(1, "a")).unwrap();
        let result = directory.join(room("BUSY"), None, join_event(2, "b"));
        assert!(matches!(result, Err(CoreError::RoomBusy(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaps_only_idle_empty_rooms() {
        let directory = directory(RoomSettings {
            idle_timeout: Duration::from_secs(60),
            ..Default::default()
        });
        directory.join(room("EMPTY"), None, join_event(1, "a")).unwrap();
        directory.join(room("BUSY1"), None, join_event(2, "b")).unwrap();
        settle().await;
        directory
            .dispatch(
                &room("EMPTY"),
                RoomEvent::ConnectionDropped {
                    conn: ConnectionId(1),
                    player_id: PlayerId::from_identity("a"),
                },
            )
            .unwrap();
        settle().await;

        assert_eq!(directory.reap_idle(), 0, "not idle long enough yet");
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(directory.reap_idle(), 1);
        assert!(!directory.contains(&room("EMPTY")));
        assert!(directory.contains(&room("BUSY1")));

        // A reclaimed room id is simply created again.
        directory.join(room("EMPTY"), None, join_event(3, "c")).unwrap();
        assert!(directory.contains(&room("EMPTY")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_actor_is_reaped_and_rejoinable() {
        let directory = directory(RoomSettings {
            idle_timeout: Duration::from_secs(60),
            ..Default::default()
        });
        let dead = room("DEAD");
        directory.join(dead.clone(), None, join_event(1, "a")).unwrap();
        settle().await;
        assert_eq!(directory.room_stats(&dead), Some((1, 1)));

        // The actor dies without going through stop(); its counters still show a player.
        directory.rooms.get(&dead).unwrap().handle.abort();
        settle().await;
        let result = directory.dispatch(
            &dead,
            RoomEvent::ReadyToggled {
                conn: ConnectionId(1),
                player_id: PlayerId::from_identity("a"),
                ready: true,
            },
        );
        assert!(matches!(result, Err(CoreError::RoomClosed(_))));

        // A join replaces the dead actor with a fresh room.
        directory.join(dead.clone(), None, join_event(2, "b")).unwrap();
        settle().await;
        assert_eq!(directory.room_count(), 1);
        assert_eq!(directory.room_stats(&dead), Some((1, 1)));

        // Without a join, the reaper reclaims it right away.
        directory.rooms.get(&dead).unwrap().handle.abort();
        settle().await;
        assert_eq!(directory.reap_idle(), 1);
        assert!(!directory.contains(&dead));
        directory.join(dead.clone(), None, join_event(3, "c")).unwrap();
        assert!(directory.contains(&dead));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_task_runs_until_shutdown() {
        let directory = directory(RoomSettings {
            idle_timeout: Duration::from_secs(10),
            reap_interval: Duration::from_secs(5),
            ..Default::default()
        });
        let shutdown = ShutdownState::new();
        let reaper = directory.spawn_reaper(shutdown.clone());

        directory.join(room("GONE"), None, join_event(1, "a")).unwrap();
        settle().await;
        directory
            .dispatch(
                &room("GONE"),
                RoomEvent::PlayerLeft {
                    conn: ConnectionId(1),
                    player_id: PlayerId::from_identity("a"),
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(directory.room_count(), 0);

        shutdown.initiate_shutdown();
        reaper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_all_stops_rooms() {
        let directory = directory(RoomSettings::default());
        directory.join(room("ONE"), None, join_event(1, "a")).unwrap();
        directory.join(room("TWO"), None, join_event(2, "b")).unwrap();
        settle().await;

        directory.shutdown_all().await;
        assert_eq!(directory.room_count(), 0);
        assert!(!directory.is_accepting());
        let result = directory.join(room("ONE"), None, join_event(3, "c"));
        assert!(matches!(result, Err(CoreError::ShuttingDown)));
    }
}
