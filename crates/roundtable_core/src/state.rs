//! # Room State Machine
//!
//! [`Room`] owns the complete truth of one room: membership, host, phase,
//! the active round, recorded answers and scores. It is a plain value with no
//! I/O. Every input arrives as a [`RoomEvent`] and every output leaves as an
//! [`Effect`] pushed into an [`Effects`] buffer: messages to connections,
//! connection bindings, timer requests and scoring requests. The actor in
//! [`crate::actor`] feeds events in one at a time and carries out the
//! effects, which keeps every transition here deterministic and testable
//! without a runtime.
//!
//! ## Lifecycle
//!
//! ```text
//! Lobby --start--> RoundActive --all answered | deadline--> (scoring) --> RoundResults
//!   ^                                                                     |
//!   +--------------------- advance (word mode) ---------------------------+
//!                          advance (quiz mode) starts the next question directly,
//!                          advance after the last round --> Finished --reset--> Lobby
//! ```
//!
//! Scoring happens while the phase is still `RoundActive`; the round simply
//! stops accepting answers. The first scoring result for a round wins and
//! anything that arrives later for that round (or any round but the current
//! one) is discarded, as is a deadline timer for a round that already closed.

use crate::config::RoomRules;
use crate::error::ScorerError;
use crate::policy::{sanitize_display_name, select_host, start_eligible};
use crate::prompt::{PromptSource, RoundPrompt};
use crate::scorer::{fallback_sheet, ScoreSheet, ScoringRequest};
use roundtable_events::{
    current_timestamp_millis, AnswerPayload, ConnectionId, ErrorCode, GameMode, Phase, PlayerId,
    PlayerView, RoomId, RoomSnapshot, RoundResultsView, ScoreLine, ServerMessage, Standing,
};
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Longest kept text per word-mode category.
const MAX_WORD_ANSWER_LEN: usize = 48;

// ============================================================================
// Players
// ============================================================================

/// One member of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    /// The connection currently attached to this player, if any.
    pub connection: Option<ConnectionId>,
    pub ready: bool,
    pub has_answered: bool,
    /// Running total, always equal to the sum of this player's recorded round scores.
    pub score: u32,
    /// Left explicitly outside the lobby; pruned when the room next enters the lobby.
    pub left: bool,
}

impl Player {
    pub fn new(id: PlayerId, display_name: String) -> Self {
        Self {
            id,
            display_name,
            connection: None,
            ready: false,
            has_answered: false,
            score: 0,
            left: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

// ============================================================================
// Events and effects
// ============================================================================

/// Everything that can happen to a room.
#[derive(Debug)]
pub enum RoomEvent {
    PlayerJoinRequested {
        conn: ConnectionId,
        identity_token: String,
        display_name: String,
    },
    ConnectionRestored {
        conn: ConnectionId,
        player_id: PlayerId,
    },
    PlayerLeft {
        conn: ConnectionId,
        player_id: PlayerId,
    },
    ConnectionDropped {
        conn: ConnectionId,
        player_id: PlayerId,
    },
    ReadyToggled {
        conn: ConnectionId,
        player_id: PlayerId,
        ready: bool,
    },
    StartRoundRequested {
        conn: ConnectionId,
        player_id: PlayerId,
    },
    AnswerSubmitted {
        conn: ConnectionId,
        player_id: PlayerId,
        payload: AnswerPayload,
    },
    AdvanceRequested {
        conn: ConnectionId,
        player_id: PlayerId,
    },
    ResetRequested {
        conn: ConnectionId,
        player_id: PlayerId,
    },
    RoundTimerFired {
        round_index: usize,
    },
    ScoringCompleted {
        round_index: usize,
        outcome: Result<ScoreSheet, ScorerError>,
    },
    /// The scorer missed its deadline plus grace.
    ScoringOverdue {
        round_index: usize,
    },
}

impl RoomEvent {
    /// The connection that caused this event, if it came from a client.
    pub fn origin(&self) -> Option<ConnectionId> {
        match self {
            RoomEvent::PlayerJoinRequested { conn, .. }
            | RoomEvent::ConnectionRestored { conn, .. }
            | RoomEvent::PlayerLeft { conn, .. }
            | RoomEvent::ConnectionDropped { conn, .. }
            | RoomEvent::ReadyToggled { conn, .. }
            | RoomEvent::StartRoundRequested { conn, .. }
            | RoomEvent::AnswerSubmitted { conn, .. }
            | RoomEvent::AdvanceRequested { conn, .. }
            | RoomEvent::ResetRequested { conn, .. } => Some(*conn),
            RoomEvent::RoundTimerFired { .. }
            | RoomEvent::ScoringCompleted { .. }
            | RoomEvent::ScoringOverdue { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RoomEvent::PlayerJoinRequested { .. } => "player_join_requested",
            RoomEvent::ConnectionRestored { .. } => "connection_restored",
            RoomEvent::PlayerLeft { .. } => "player_left",
            RoomEvent::ConnectionDropped { .. } => "connection_dropped",
            RoomEvent::ReadyToggled { .. } => "ready_toggled",
            RoomEvent::StartRoundRequested { .. } => "start_round_requested",
            RoomEvent::AnswerSubmitted { .. } => "answer_submitted",
            RoomEvent::AdvanceRequested { .. } => "advance_requested",
            RoomEvent::ResetRequested { .. } => "reset_requested",
            RoomEvent::RoundTimerFired { .. } => "round_timer_fired",
            RoomEvent::ScoringCompleted { .. } => "scoring_completed",
            RoomEvent::ScoringOverdue { .. } => "scoring_overdue",
        }
    }
}

/// Something the room wants done outside of itself.
#[derive(Debug)]
pub enum Effect {
    /// Deliver a message to one connection.
    Send {
        to: ConnectionId,
        message: ServerMessage,
    },
    /// Route the connection's future commands to this room as `player_id`.
    Bind {
        conn: ConnectionId,
        player_id: PlayerId,
    },
    /// Stop routing the connection to this room.
    Unbind { conn: ConnectionId },
    /// The room refused a join; forget the connection's unconfirmed binding.
    ReleasePending {
        conn: ConnectionId,
        player_id: PlayerId,
    },
    /// Deliver `RoundTimerFired { round_index }` at `at`.
    StartTimer { round_index: usize, at: Instant },
    /// Run the scorer and deliver `ScoringCompleted`; deliver `ScoringOverdue` at `overdue_at`.
    Score {
        request: ScoringRequest,
        overdue_at: Instant,
    },
}

/// Ordered buffer of effects produced while handling events.
#[derive(Debug, Default)]
pub struct Effects(Vec<Effect>);

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Effect) {
        self.0.push(effect);
    }

    pub fn send(&mut self, to: ConnectionId, message: ServerMessage) {
        self.0.push(Effect::Send { to, message });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Effect> {
        self.0.iter()
    }

    /// Removes and returns all buffered effects.
    pub fn drain(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.0)
    }
}

// ============================================================================
// Room
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundStatus {
    /// Accepting answers until the deadline.
    Open,
    /// Closed; waiting for the scorer.
    Scoring,
}

#[derive(Debug, Clone)]
struct ActiveRound {
    index: usize,
    prompt: RoundPrompt,
    deadline: Instant,
    status: RoundStatus,
}

/// The authoritative state of one room.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    rules: RoomRules,
    prompts: PromptSource,
    phase: Phase,
    /// In join order.
    players: Vec<Player>,
    host_id: Option<PlayerId>,
    round_index: Option<usize>,
    active: Option<ActiveRound>,
    answers: BTreeMap<usize, BTreeMap<PlayerId, AnswerPayload>>,
    scores: BTreeMap<usize, ScoreSheet>,
    last_results: Option<RoundResultsView>,
    standings: Option<Vec<Standing>>,
}

impl Room {
    pub fn new(id: RoomId, rules: RoomRules, prompts: PromptSource) -> Self {
        Self {
            id,
            rules,
            prompts,
            phase: Phase::Lobby,
            players: Vec::new(),
            host_id: None,
            round_index: None,
            active: None,
            answers: BTreeMap::new(),
            scores: BTreeMap::new(),
            last_results: None,
            standings: None,
        }
    }

    /// Applies one event. Never panics on bad input; rejected commands turn
    /// into an `error_notice` to the offending connection and leave the state
    /// untouched.
    pub fn handle(&mut self, event: RoomEvent, now: Instant, fx: &mut Effects) {
        match event {
            RoomEvent::PlayerJoinRequested {
                conn,
                identity_token,
                display_name,
            } => self.on_join(conn, &identity_token, &display_name, now, fx),
            RoomEvent::ConnectionRestored { conn, player_id } => self.on_restore(conn, player_id, now, fx),
            RoomEvent::PlayerLeft { conn, player_id } => self.on_leave(conn, player_id, now, fx),
            RoomEvent::ConnectionDropped { conn, player_id } => self.on_drop(conn, player_id, now, fx),
            RoomEvent::ReadyToggled { conn, player_id, ready } => self.on_ready(conn, player_id, ready, fx),
            RoomEvent::StartRoundRequested { conn, player_id } => self.on_start(conn, player_id, now, fx),
            RoomEvent::AnswerSubmitted {
                conn,
                player_id,
                payload,
            } => self.on_answer(conn, player_id, payload, now, fx),
            RoomEvent::AdvanceRequested { conn, player_id } => self.on_advance(conn, player_id, now, fx),
            RoomEvent::ResetRequested { conn, player_id } => self.on_reset(conn, player_id, now, fx),
            RoomEvent::RoundTimerFired { round_index } => self.on_timer(round_index, now, fx),
            RoomEvent::ScoringCompleted { round_index, outcome } => self.on_scored(round_index, outcome, fx),
            RoomEvent::ScoringOverdue { round_index } => {
                self.on_scored(round_index, Err(ScorerError::TimedOut), fx)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------------

    fn on_join(&mut self, conn: ConnectionId, identity_token: &str, display_name: &str, now: Instant, fx: &mut Effects) {
        let player_id = PlayerId::from_identity(identity_token);
        let refuse = |fx: &mut Effects, code: ErrorCode, message: &str| {
            fx.push(Effect::ReleasePending { conn, player_id });
            reject(fx, conn, code, message);
        };

        let Some(name) = sanitize_display_name(display_name) else {
            refuse(fx, ErrorCode::InvalidName, "display name must be 1-24 printable characters");
            return;
        };
        if identity_token.trim().is_empty() {
            refuse(fx, ErrorCode::MalformedMessage, "identity token must not be empty");
            return;
        }

        let idx = match self.index_of(player_id) {
            Some(idx) => {
                let player = &mut self.players[idx];
                player.display_name = name;
                player.left = false;
                idx
            }
            None => {
                if self.players.len() >= self.rules.max_players {
                    refuse(fx, ErrorCode::RoomFull, "room is full");
                    return;
                }
                self.players.push(Player::new(player_id, name));
                self.players.len() - 1
            }
        };

        self.attach(idx, conn, fx);
        self.refresh_host();
        self.greet(conn, player_id, now, fx);
        self.broadcast_roster(fx);
        info!(
            room_id = %self.id,
            player_id = %player_id,
            %conn,
            players = self.players.len(),
            "👋 Player joined"
        );
    }

    fn on_restore(&mut self, conn: ConnectionId, player_id: PlayerId, now: Instant, fx: &mut Effects) {
        let Some(idx) = self.index_of(player_id).filter(|&i| !self.players[i].left) else {
            fx.push(Effect::ReleasePending { conn, player_id });
            reject(fx, conn, ErrorCode::NotInRoom, "no membership in this room, join instead");
            return;
        };

        self.attach(idx, conn, fx);
        self.refresh_host();
        self.greet(conn, player_id, now, fx);
        self.broadcast_roster(fx);
        info!(room_id = %self.id, player_id = %player_id, %conn, "🔌 Player reconnected");
    }

    fn on_leave(&mut self, conn: ConnectionId, player_id: PlayerId, now: Instant, fx: &mut Effects) {
        let Some(idx) = self.current_index(conn, player_id) else {
            debug!(room_id = %self.id, %conn, "Ignoring leave from a detached connection");
            return;
        };

        fx.push(Effect::Unbind { conn });
        if self.phase == Phase::Lobby {
            self.players.remove(idx);
            self.forget(player_id);
        } else {
            let player = &mut self.players[idx];
            player.connection = None;
            player.ready = false;
            player.left = true;
        }

        self.refresh_host();
        self.broadcast_roster(fx);
        info!(room_id = %self.id, player_id = %player_id, phase = %self.phase, "🚪 Player left");
        self.check_all_answered(now, fx);
    }

    fn on_drop(&mut self, conn: ConnectionId, player_id: PlayerId, now: Instant, fx: &mut Effects) {
        let Some(idx) = self.current_index(conn, player_id) else {
            debug!(room_id = %self.id, %conn, "Ignoring drop of a superseded connection");
            return;
        };

        self.players[idx].connection = None;
        self.refresh_host();
        self.broadcast_roster(fx);
        debug!(room_id = %self.id, player_id = %player_id, %conn, "Connection dropped");
        self.check_all_answered(now, fx);
    }

    fn on_ready(&mut self, conn: ConnectionId, player_id: PlayerId, ready: bool, fx: &mut Effects) {
        let Some(idx) = self.authorize(conn, player_id, fx) else {
            return;
        };
        if self.phase != Phase::Lobby {
            reject(fx, conn, ErrorCode::WrongPhase, "ready-check only runs in the lobby");
            return;
        }
        if self.players[idx].ready == ready {
            return;
        }
        self.players[idx].ready = ready;
        self.broadcast_roster(fx);
    }

    // ------------------------------------------------------------------------
    // Rounds
    // ------------------------------------------------------------------------

    fn on_start(&mut self, conn: ConnectionId, player_id: PlayerId, now: Instant, fx: &mut Effects) {
        if self.authorize_control(conn, player_id, fx).is_none() {
            return;
        }

        match self.phase {
            Phase::Lobby => {
                let connected = self.connected_count();
                let ready = self.players.iter().filter(|p| p.is_connected() && p.ready).count();
                if !start_eligible(connected, ready) {
                    reject(
                        fx,
                        conn,
                        ErrorCode::NotReady,
                        format!("{ready} of {connected} players ready"),
                    );
                    return;
                }
            }
            Phase::RoundResults => {}
            Phase::RoundActive | Phase::Finished => {
                reject(fx, conn, ErrorCode::WrongPhase, format!("cannot start a round during {}", self.phase));
                return;
            }
        }

        let next = self.next_round_index();
        match self.begin_round(next, now, fx) {
            Ok(()) => {}
            Err(ErrorCode::NoRoundsRemaining) => {
                reject(fx, conn, ErrorCode::NoRoundsRemaining, "no rounds remaining")
            }
            Err(code) => reject(fx, conn, code, "round could not be scheduled"),
        }
    }

    fn begin_round(&mut self, index: usize, now: Instant, fx: &mut Effects) -> Result<(), ErrorCode> {
        if !self.prompts.has_round(index) {
            return Err(ErrorCode::NoRoundsRemaining);
        }
        let Some(prompt) = self.prompts.prompt_for(index) else {
            return Err(ErrorCode::NoRoundsRemaining);
        };

        let duration = prompt.time_limit().unwrap_or(self.rules.round_duration);
        let Some(deadline) = now.checked_add(duration) else {
            warn!(room_id = %self.id, round_index = index, ?duration, "⚠️ Round deadline out of range");
            return Err(ErrorCode::Internal);
        };
        let duration_ms = duration.as_millis() as u64;

        for player in &mut self.players {
            player.has_answered = false;
            player.ready = false;
        }
        self.answers.insert(index, BTreeMap::new());
        self.round_index = Some(index);
        self.phase = Phase::RoundActive;
        self.broadcast(
            fx,
            ServerMessage::RoundStarted {
                round_index: index,
                prompt: prompt.view(),
                deadline_at: current_timestamp_millis() + duration_ms,
                duration_ms,
            },
        );
        self.active = Some(ActiveRound {
            index,
            prompt,
            deadline,
            status: RoundStatus::Open,
        });
        self.broadcast_roster(fx);
        fx.push(Effect::StartTimer {
            round_index: index,
            at: deadline,
        });

        info!(room_id = %self.id, round_index = index, duration_ms, "🎬 Round started");
        Ok(())
    }

    fn on_answer(&mut self, conn: ConnectionId, player_id: PlayerId, payload: AnswerPayload, now: Instant, fx: &mut Effects) {
        let Some(idx) = self.authorize(conn, player_id, fx) else {
            return;
        };
        let Some(active) = self.active.as_ref().filter(|a| a.status == RoundStatus::Open) else {
            reject(fx, conn, ErrorCode::WrongPhase, "no round is accepting answers");
            return;
        };
        if self.players[idx].has_answered {
            debug!(room_id = %self.id, player_id = %player_id, "Duplicate answer ignored");
            return;
        }
        let payload = match normalize_answer(&active.prompt, payload) {
            Ok(payload) => payload,
            Err(reason) => {
                reject(fx, conn, ErrorCode::InvalidAnswer, reason);
                return;
            }
        };

        let index = active.index;
        self.answers.entry(index).or_default().insert(player_id, payload);
        self.players[idx].has_answered = true;
        self.broadcast(fx, ServerMessage::PlayerAnswered { player_id });
        self.check_all_answered(now, fx);
    }

    /// Closes the round early once every connected player has answered.
    fn check_all_answered(&mut self, now: Instant, fx: &mut Effects) {
        let open = matches!(&self.active, Some(a) if a.status == RoundStatus::Open);
        if !open {
            return;
        }
        let mut connected = self.players.iter().filter(|p| p.is_connected()).peekable();
        if connected.peek().is_none() {
            return;
        }
        if connected.all(|p| p.has_answered) {
            self.close_round(now, fx);
        }
    }

    fn on_timer(&mut self, round_index: usize, now: Instant, fx: &mut Effects) {
        match &self.active {
            Some(active) if active.index == round_index && active.status == RoundStatus::Open => {
                debug!(room_id = %self.id, round_index, "Round deadline reached");
                self.close_round(now, fx);
            }
            _ => debug!(room_id = %self.id, round_index, "Stale round timer ignored"),
        }
    }

    /// Stops accepting answers and asks for the round to be scored.
    fn close_round(&mut self, now: Instant, fx: &mut Effects) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.status != RoundStatus::Open {
            return;
        }

        let answers = self.answers.entry(active.index).or_default();
        for player in self.players.iter().filter(|p| p.is_connected() && !p.has_answered) {
            answers.insert(player.id, AnswerPayload::Blank);
        }
        active.status = RoundStatus::Scoring;

        let request = ScoringRequest {
            round_index: active.index,
            prompt: active.prompt.clone(),
            answers: answers.clone(),
            timeout: self.rules.scoring_timeout,
        };
        info!(
            room_id = %self.id,
            round_index = active.index,
            answers = request.answers.len(),
            "🧮 Round closed, scoring"
        );
        fx.push(Effect::Score {
            request,
            overdue_at: now + self.rules.scoring_timeout + self.rules.scoring_grace,
        });
    }

    fn on_scored(&mut self, round_index: usize, outcome: Result<ScoreSheet, ScorerError>, fx: &mut Effects) {
        let pending = matches!(
            &self.active,
            Some(a) if a.index == round_index && a.status == RoundStatus::Scoring
        );
        if !pending {
            debug!(room_id = %self.id, round_index, "Late scoring result discarded");
            return;
        }

        match outcome {
            Ok(sheet) => self.record_results(sheet, false, fx),
            Err(error) => {
                warn!(room_id = %self.id, round_index, %error, "⚠️ Scorer unavailable, using fallback");
                let Some(request) = self.pending_request() else {
                    return;
                };
                let sheet = fallback_sheet(&request, self.rules.quiz_points);
                self.record_results(sheet, true, fx);
            }
        }
    }

    fn pending_request(&self) -> Option<ScoringRequest> {
        let active = self.active.as_ref()?;
        Some(ScoringRequest {
            round_index: active.index,
            prompt: active.prompt.clone(),
            answers: self.answers.get(&active.index).cloned().unwrap_or_default(),
            timeout: self.rules.scoring_timeout,
        })
    }

    fn record_results(&mut self, sheet: ScoreSheet, degraded: bool, fx: &mut Effects) {
        let Some(active) = self.active.take() else {
            return;
        };
        let index = active.index;
        let answers = self.answers.get(&index).cloned().unwrap_or_default();

        // Only players with a recorded answer are scored; anything else the scorer returned is dropped.
        let lines: ScoreSheet = answers
            .keys()
            .map(|id| {
                let line = sheet
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| ScoreLine::zero("no score returned"));
                (*id, line)
            })
            .collect();

        for player in &mut self.players {
            if let Some(line) = lines.get(&player.id) {
                player.score = player.score.saturating_add(line.points);
            }
        }
        self.scores.insert(index, lines.clone());

        let view = RoundResultsView {
            round_index: index,
            scores: lines,
            answers,
            totals: self.totals(),
            degraded,
            correct_option: active.prompt.correct_option(),
        };
        self.phase = Phase::RoundResults;
        self.last_results = Some(view.clone());
        self.broadcast(fx, ServerMessage::RoundResults(view));
        info!(room_id = %self.id, round_index = index, degraded, "🏁 Round scored");
    }

    fn on_advance(&mut self, conn: ConnectionId, player_id: PlayerId, now: Instant, fx: &mut Effects) {
        if self.authorize_control(conn, player_id, fx).is_none() {
            return;
        }
        if self.phase != Phase::RoundResults {
            reject(fx, conn, ErrorCode::WrongPhase, format!("cannot advance during {}", self.phase));
            return;
        }

        let next = self.next_round_index();
        if !self.prompts.has_round(next) {
            self.finish_game(fx);
            return;
        }
        match self.rules.mode {
            GameMode::Quiz => {
                if self.begin_round(next, now, fx).is_err() {
                    self.finish_game(fx);
                }
            }
            GameMode::Word => self.enter_lobby(now, fx),
        }
    }

    fn finish_game(&mut self, fx: &mut Effects) {
        let ranking = self.ranking();
        self.phase = Phase::Finished;
        self.standings = Some(ranking.clone());
        self.broadcast(
            fx,
            ServerMessage::GameFinished {
                totals: self.totals(),
                ranking,
            },
        );
        info!(room_id = %self.id, rounds = self.scores.len(), "🏆 Game finished");
    }

    fn on_reset(&mut self, conn: ConnectionId, player_id: PlayerId, now: Instant, fx: &mut Effects) {
        if self.authorize_control(conn, player_id, fx).is_none() {
            return;
        }
        if self.phase != Phase::Finished {
            reject(fx, conn, ErrorCode::WrongPhase, "only a finished game can be reset");
            return;
        }

        self.answers.clear();
        self.scores.clear();
        self.round_index = None;
        self.last_results = None;
        self.standings = None;
        self.prompts.reset();
        for player in &mut self.players {
            player.score = 0;
            player.ready = false;
            player.has_answered = false;
        }
        self.enter_lobby(now, fx);
        info!(room_id = %self.id, "🔄 Game reset");
    }

    /// Returns to the lobby, dropping players who left, and resyncs everyone.
    fn enter_lobby(&mut self, now: Instant, fx: &mut Effects) {
        self.phase = Phase::Lobby;
        let departed: Vec<PlayerId> = self.players.iter().filter(|p| p.left).map(|p| p.id).collect();
        self.players.retain(|p| !p.left);
        for id in departed {
            self.forget(id);
        }
        for player in &mut self.players {
            player.ready = false;
            player.has_answered = false;
        }
        self.refresh_host();
        let snapshot = self.snapshot(now);
        self.broadcast(fx, ServerMessage::RoomSnapshot(snapshot));
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Drops a removed player's recorded answers and scores, so a later
    /// rejoin under the same identity starts from zero.
    fn forget(&mut self, player_id: PlayerId) {
        for answers in self.answers.values_mut() {
            answers.remove(&player_id);
        }
        for sheet in self.scores.values_mut() {
            sheet.remove(&player_id);
        }
    }

    fn index_of(&self, player_id: PlayerId) -> Option<usize> {
        self.players.iter().position(|p| p.id == player_id)
    }

    /// The player's index if `conn` is its current connection.
    fn current_index(&self, conn: ConnectionId, player_id: PlayerId) -> Option<usize> {
        self.index_of(player_id)
            .filter(|&idx| self.players[idx].connection == Some(conn))
    }

    fn authorize(&self, conn: ConnectionId, player_id: PlayerId, fx: &mut Effects) -> Option<usize> {
        let idx = self.current_index(conn, player_id);
        if idx.is_none() {
            reject(fx, conn, ErrorCode::NotInRoom, "connection is not attached to this player");
        }
        idx
    }

    /// Like [`Room::authorize`], and additionally enforces the host-only policy.
    fn authorize_control(&self, conn: ConnectionId, player_id: PlayerId, fx: &mut Effects) -> Option<usize> {
        let idx = self.authorize(conn, player_id, fx)?;
        if !self.rules.anyone_can_start && self.host_id != Some(player_id) {
            reject(fx, conn, ErrorCode::NotHost, "only the host may do that");
            return None;
        }
        Some(idx)
    }

    fn attach(&mut self, idx: usize, conn: ConnectionId, fx: &mut Effects) {
        let player = &mut self.players[idx];
        if let Some(old) = player.connection.replace(conn) {
            if old != conn {
                fx.send(
                    old,
                    ServerMessage::error(ErrorCode::Superseded, "this player connected from another session"),
                );
                fx.push(Effect::Unbind { conn: old });
            }
        }
        fx.push(Effect::Bind {
            conn,
            player_id: player.id,
        });
    }

    fn refresh_host(&mut self) {
        let next = select_host(self.host_id, &self.players);
        if next != self.host_id {
            if let Some(host) = next {
                info!(room_id = %self.id, host_id = %host, "👑 Host changed");
            }
            self.host_id = next;
        }
    }

    fn greet(&self, conn: ConnectionId, player_id: PlayerId, now: Instant, fx: &mut Effects) {
        fx.send(
            conn,
            ServerMessage::Welcome {
                room_id: self.id.clone(),
                player_id,
            },
        );
        fx.send(conn, ServerMessage::RoomSnapshot(self.snapshot(now)));
    }

    fn broadcast(&self, fx: &mut Effects, message: ServerMessage) {
        for conn in self.players.iter().filter_map(|p| p.connection) {
            fx.send(conn, message.clone());
        }
    }

    fn broadcast_roster(&self, fx: &mut Effects) {
        self.broadcast(
            fx,
            ServerMessage::RosterChanged {
                players: self.roster(),
                host_id: self.host_id,
            },
        );
    }

    fn next_round_index(&self) -> usize {
        self.round_index.map_or(0, |i| i + 1)
    }

    fn totals(&self) -> BTreeMap<PlayerId, u32> {
        self.players.iter().map(|p| (p.id, p.score)).collect()
    }

    /// Highest total first; ties share a rank and keep join order.
    fn ranking(&self) -> Vec<Standing> {
        let mut ordered: Vec<&Player> = self.players.iter().collect();
        ordered.sort_by(|a, b| b.score.cmp(&a.score));

        let mut rank = 0;
        let mut previous = None;
        ordered
            .into_iter()
            .enumerate()
            .map(|(position, player)| {
                if previous != Some(player.score) {
                    rank = position + 1;
                    previous = Some(player.score);
                }
                Standing {
                    rank,
                    player_id: player.id,
                    display_name: player.display_name.clone(),
                    total: player.score,
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------------

    pub fn roster(&self) -> Vec<PlayerView> {
        self.players
            .iter()
            .map(|p| PlayerView {
                id: p.id,
                display_name: p.display_name.clone(),
                connected: p.is_connected(),
                ready: p.ready,
                has_answered: p.has_answered,
                score: p.score,
                is_host: self.host_id == Some(p.id),
            })
            .collect()
    }

    /// Everything a client needs to rebuild its view of the room.
    pub fn snapshot(&self, now: Instant) -> RoomSnapshot {
        let active = self.active.as_ref().filter(|_| self.phase == Phase::RoundActive);
        let show_results = matches!(self.phase, Phase::RoundResults | Phase::Finished);
        RoomSnapshot {
            room_id: self.id.clone(),
            mode: self.rules.mode,
            phase: self.phase,
            players: self.roster(),
            host_id: self.host_id,
            round_index: self.round_index,
            rounds_total: Some(self.prompts.total_rounds()),
            current_prompt: active.map(|a| a.prompt.view()),
            deadline_remaining_ms: active.map(|a| match a.status {
                RoundStatus::Open => a.deadline.saturating_duration_since(now).as_millis() as u64,
                RoundStatus::Scoring => 0,
            }),
            last_results: self.last_results.clone().filter(|_| show_results),
            standings: self.standings.clone().filter(|_| self.phase == Phase::Finished),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn rules(&self) -> &RoomRules {
        &self.rules
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn host_id(&self) -> Option<PlayerId> {
        self.host_id
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn round_index(&self) -> Option<usize> {
        self.round_index
    }

    /// Deadline of the round currently accepting answers.
    pub fn deadline(&self) -> Option<Instant> {
        self.active
            .as_ref()
            .filter(|a| a.status == RoundStatus::Open)
            .map(|a| a.deadline)
    }

    /// Whether a closed round is waiting for its scorer.
    pub fn is_scoring(&self) -> bool {
        matches!(&self.active, Some(a) if a.status == RoundStatus::Scoring)
    }

    pub fn connected_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_connected()).count()
    }

    pub fn answers(&self, round_index: usize) -> Option<&BTreeMap<PlayerId, AnswerPayload>> {
        self.answers.get(&round_index)
    }

    pub fn scores(&self, round_index: usize) -> Option<&ScoreSheet> {
        self.scores.get(&round_index)
    }

    /// A player's total recomputed from the recorded round scores.
    pub fn derived_total(&self, player_id: PlayerId) -> u32 {
        self.scores
            .values()
            .filter_map(|sheet| sheet.get(&player_id))
            .map(|line| line.points)
            .sum()
    }

    pub fn last_results(&self) -> Option<&RoundResultsView> {
        self.last_results.as_ref()
    }

    pub fn standings(&self) -> Option<&[Standing]> {
        self.standings.as_deref()
    }

    /// Checks the room's structural invariants.
    pub fn audit(&self) -> Result<(), String> {
        if let Some(host) = self.host_id {
            if self.index_of(host).is_none() {
                return Err(format!("host {host} is not a member"));
            }
        }
        if self.connected_count() > 0 {
            let host_connected = self
                .host_id
                .and_then(|h| self.player(h))
                .is_some_and(|p| p.is_connected());
            if !host_connected {
                return Err("players are connected but the host is not".to_string());
            }
        }
        match (&self.active, self.phase) {
            (Some(active), Phase::RoundActive) if self.round_index == Some(active.index) => {}
            (None, phase) if phase != Phase::RoundActive => {}
            (active, phase) => {
                return Err(format!(
                    "phase {phase} with active round {:?} and round index {:?}",
                    active.as_ref().map(|a| a.index),
                    self.round_index
                ));
            }
        }
        if self.phase == Phase::Lobby {
            let next = self.next_round_index();
            if self.answers.contains_key(&next) || self.scores.contains_key(&next) {
                return Err(format!("lobby already holds answers or scores for round {next}"));
            }
        }
        for (i, player) in self.players.iter().enumerate() {
            if self.players[..i].iter().any(|p| p.id == player.id) {
                return Err(format!("player {} appears twice", player.id));
            }
        }
        Ok(())
    }
}

fn reject(fx: &mut Effects, conn: ConnectionId, code: ErrorCode, message: impl Into<String>) {
    let message = message.into();
    debug!(%conn, %code, %message, "Command rejected");
    fx.send(conn, ServerMessage::error(code, message));
}

/// Checks an answer against the prompt and trims it to what the scorer needs.
fn normalize_answer(prompt: &RoundPrompt, payload: AnswerPayload) -> Result<AnswerPayload, String> {
    match (prompt, payload) {
        (RoundPrompt::Quiz { question, .. }, AnswerPayload::Choice(choice)) => {
            if choice < question.options.len() {
                Ok(AnswerPayload::Choice(choice))
            } else {
                Err(format!("option {choice} does not exist"))
            }
        }
        (RoundPrompt::Word { categories, .. }, AnswerPayload::Words(words)) => {
            let kept = words
                .into_iter()
                .filter(|(category, _)| categories.contains(category))
                .map(|(category, text)| {
                    let text: String = text.trim().chars().take(MAX_WORD_ANSWER_LEN).collect();
                    (category, text)
                })
                .collect();
            Ok(AnswerPayload::Words(kept))
        }
        (RoundPrompt::Quiz { .. }, _) => Err("quiz answers must be an option index".to_string()),
        (RoundPrompt::Word { .. }, _) => Err("word answers must map categories to text".to_string()),
    }
}
