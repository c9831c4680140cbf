//! # Room Actor
//!
//! One tokio task per room. The actor owns its [`Room`] exclusively and
//! processes one event at a time from a bounded inbox, so room state needs no
//! locks. Anything slow happens off the actor in its own [`JoinSet`]:
//!
//! - round deadline timers (`sleep_until`, resolving to `RoundTimerFired`)
//! - scorer calls (wrapped in `tokio::time::timeout`, resolving to `ScoringCompleted`)
//! - scoring watchdogs (resolving to `ScoringOverdue`)
//!
//! Their results are polled in the same `select!` loop as the inbox, which
//! makes them ordinary serialized events.

use crate::error::ScorerError;
use crate::scorer::Scorer;
use crate::state::{Effect, Effects, Room, RoomEvent};
use roundtable_events::{ConnectionId, ErrorCode, PlayerId, RoomId, ServerMessage};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace};

/// Where a room's outbound effects go.
///
/// Implemented by the connection registry's table; the actor never sees a
/// socket.
pub trait Outbound: Send + Sync + 'static {
    /// Queues a message for a connection. Unknown connections are ignored.
    fn deliver(&self, to: ConnectionId, message: ServerMessage);

    /// Routes `conn` to `room_id` as `player_id`. Returns `false` if the
    /// connection has already closed.
    fn bind(&self, conn: ConnectionId, room_id: &RoomId, player_id: PlayerId) -> bool;

    /// Stops routing `conn`, if it is still routed to `room_id`.
    fn unbind(&self, conn: ConnectionId, room_id: &RoomId);

    /// Drops a binding of `conn` to `room_id` as `player_id` that was never
    /// confirmed. Confirmed bindings are left alone.
    fn release_pending(&self, _conn: ConnectionId, _room_id: &RoomId, _player_id: PlayerId) {}
}

/// Counters the actor publishes for the directory.
#[derive(Debug, Default)]
pub struct RoomStats {
    connected: AtomicUsize,
    players: AtomicUsize,
    stopped: AtomicBool,
}

impl RoomStats {
    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::Acquire)
    }

    pub fn players(&self) -> usize {
        self.players.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn publish(&self, room: &Room) {
        self.connected.store(room.connected_count(), Ordering::Release);
        self.players.store(room.players().len(), Ordering::Release);
    }
}

/// The directory's handle to a running actor.
#[derive(Debug)]
pub struct RoomHandle {
    inbox: mpsc::Sender<RoomEvent>,
    stop: Option<oneshot::Sender<()>>,
    stats: Arc<RoomStats>,
    task: JoinHandle<()>,
}

impl RoomHandle {
    /// Queues an event without waiting.
    pub fn try_send(&self, event: RoomEvent) -> Result<(), TrySendError<RoomEvent>> {
        self.inbox.try_send(event)
    }

    /// Whether nothing is waiting in the inbox.
    pub fn inbox_is_empty(&self) -> bool {
        self.inbox.capacity() == self.inbox.max_capacity()
    }

    pub fn stats(&self) -> &Arc<RoomStats> {
        &self.stats
    }

    /// Whether the actor is gone, whether it was stopped or died on its own.
    pub fn is_terminated(&self) -> bool {
        self.stats.is_stopped() || self.inbox.is_closed() || self.task.is_finished()
    }

    #[cfg(test)]
    pub(crate) fn abort(&self) {
        self.task.abort();
    }

    /// Signals the actor to stop and returns its task.
    pub fn stop(mut self) -> JoinHandle<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task
    }
}

/// Spawns the actor for `room` and returns its handle.
pub fn spawn_room(
    room: Room,
    scorer: Arc<dyn Scorer>,
    outbound: Arc<dyn Outbound>,
    inbox_capacity: usize,
) -> RoomHandle {
    let (inbox_tx, inbox_rx) = mpsc::channel(inbox_capacity.max(1));
    let (stop_tx, stop_rx) = oneshot::channel();
    let stats = Arc::new(RoomStats::default());

    let actor = RoomActor {
        room,
        inbox: inbox_rx,
        stop: stop_rx,
        scorer,
        outbound,
        stats: Arc::clone(&stats),
        tasks: JoinSet::new(),
    };
    let task = tokio::spawn(actor.run());

    RoomHandle {
        inbox: inbox_tx,
        stop: Some(stop_tx),
        stats,
        task,
    }
}

struct RoomActor {
    room: Room,
    inbox: mpsc::Receiver<RoomEvent>,
    stop: oneshot::Receiver<()>,
    scorer: Arc<dyn Scorer>,
    outbound: Arc<dyn Outbound>,
    stats: Arc<RoomStats>,
    tasks: JoinSet<RoomEvent>,
}

impl RoomActor {
    async fn run(mut self) {
        info!(room_id = %self.room.id(), mode = ?self.room.rules().mode, scorer = self.scorer.name(), "🏠 Room opened");

        loop {
            tokio::select! {
                biased;

                _ = &mut self.stop => break,

                event = self.inbox.recv() => match event {
                    Some(event) => self.process(event),
                    None => break,
                },

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => match joined {
                    Ok(event) => self.process(event),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => error!(room_id = %self.room.id(), error = %e, "❌ Room worker task failed"),
                },
            }
        }

        self.close();
    }

    fn process(&mut self, event: RoomEvent) {
        let origin = event.origin();
        trace!(room_id = %self.room.id(), event = event.kind(), "Processing room event");

        let mut fx = Effects::new();
        self.room.handle(event, Instant::now(), &mut fx);
        loop {
            let batch = fx.drain();
            if batch.is_empty() {
                break;
            }
            for effect in batch {
                self.apply(effect, &mut fx);
            }
        }

        if let Err(violation) = self.room.audit() {
            error!(room_id = %self.room.id(), %violation, "❌ Room invariant violated");
            if let Some(conn) = origin {
                self.outbound
                    .deliver(conn, ServerMessage::error(ErrorCode::Internal, "internal room error"));
            }
        }
        self.stats.publish(&self.room);
    }

    fn apply(&mut self, effect: Effect, fx: &mut Effects) {
        match effect {
            Effect::Send { to, message } => self.outbound.deliver(to, message),
            Effect::Bind { conn, player_id } => {
                if !self.outbound.bind(conn, self.room.id(), player_id) {
                    // Closed before it could be bound; its close never reached this room.
                    debug!(room_id = %self.room.id(), %conn, "Connection closed before binding");
                    self.room
                        .handle(RoomEvent::ConnectionDropped { conn, player_id }, Instant::now(), fx);
                }
            }
            Effect::Unbind { conn } => self.outbound.unbind(conn, self.room.id()),
            Effect::ReleasePending { conn, player_id } => {
                self.outbound.release_pending(conn, self.room.id(), player_id)
            }
            Effect::StartTimer { round_index, at } => {
                self.tasks.spawn(async move {
                    sleep_until(at).await;
                    RoomEvent::RoundTimerFired { round_index }
                });
            }
            Effect::Score { request, overdue_at } => {
                let round_index = request.round_index;
                let scorer = Arc::clone(&self.scorer);
                self.tasks.spawn(async move {
                    let outcome = match tokio::time::timeout(request.timeout, scorer.score(&request)).await {
                        Ok(result) => result,
                        Err(_) => Err(ScorerError::TimedOut),
                    };
                    RoomEvent::ScoringCompleted { round_index, outcome }
                });
                self.tasks.spawn(async move {
                    sleep_until(overdue_at).await;
                    RoomEvent::ScoringOverdue { round_index }
                });
            }
        }
    }

    /// Refuses whatever is still queued and releases the room's connections.
    fn close(mut self) {
        self.inbox.close();
        let mut refused = 0;
        while let Ok(event) = self.inbox.try_recv() {
            if let Some(conn) = event.origin() {
                self.outbound
                    .deliver(conn, ServerMessage::error(ErrorCode::RoomClosed, "room closed, join again"));
                refused += 1;
            }
        }
        self.tasks.abort_all();

        for conn in self.room.players().iter().filter_map(|p| p.connection) {
            self.outbound
                .deliver(conn, ServerMessage::error(ErrorCode::RoomClosed, "room closed"));
            self.outbound.unbind(conn, self.room.id());
        }

        self.stats.stopped.store(true, Ordering::Release);
        info!(room_id = %self.room.id(), refused, "🔒 Room closed");
    }
}
