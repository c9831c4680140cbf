//! Wire messages exchanged between connections and rooms.
//!
//! Both directions are closed enums with an internal `type` tag, so the
//! compiler enforces exhaustive handling and an unknown tag fails at parse
//! time.
//!
//! ```json
//! {"type": "join_room", "room_id": "QUIZ1", "identity_token": "d3v1c3", "display_name": "Ada"}
//! {"type": "submit_answer", "payload": 2}
//! {"type": "submit_answer", "payload": {"City": "Lima", "Animal": "Llama"}}
//! ```

use crate::types::{
    GameMode, Phase, PlayerId, PlayerView, PromptView, RoomId, RoomOptions, RoundResultsView,
    Standing, AnswerPayload,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A message a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join (or create) a room. Re-joining with the same identity reattaches.
    JoinRoom {
        room_id: String,
        identity_token: String,
        display_name: String,
        #[serde(default)]
        options: Option<RoomOptions>,
    },
    /// Resume an existing membership on a new connection.
    RejoinRoom {
        room_id: String,
        identity_token: String,
    },
    LeaveRoom,
    SetReady {
        ready: bool,
    },
    StartRound,
    SubmitAnswer {
        payload: AnswerPayload,
    },
    Advance,
    /// Return a finished game to the lobby.
    ResetGame,
}

impl ClientMessage {
    /// Parses a JSON text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::RejoinRoom { .. } => "rejoin_room",
            ClientMessage::LeaveRoom => "leave_room",
            ClientMessage::SetReady { .. } => "set_ready",
            ClientMessage::StartRound => "start_round",
            ClientMessage::SubmitAnswer { .. } => "submit_answer",
            ClientMessage::Advance => "advance",
            ClientMessage::ResetGame => "reset_game",
        }
    }
}

/// Machine-readable reason attached to an [`ServerMessage::ErrorNotice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unparseable frame or unknown message type.
    MalformedMessage,
    /// The connection is not attached to a room (or not to this player).
    NotInRoom,
    InvalidRoomId,
    InvalidName,
    RoomFull,
    /// The room's inbox is full; retry shortly.
    RoomBusy,
    /// The room was reclaimed while the message was in flight.
    RoomClosed,
    UnknownQuiz,
    /// The action is not valid in the room's current phase.
    WrongPhase,
    /// A host-only action under host-gated policy.
    NotHost,
    /// The ready-check quorum is not met.
    NotReady,
    NoRoundsRemaining,
    InvalidAnswer,
    /// Another connection took over this player.
    Superseded,
    RateLimited,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MalformedMessage => "malformed_message",
            ErrorCode::NotInRoom => "not_in_room",
            ErrorCode::InvalidRoomId => "invalid_room_id",
            ErrorCode::InvalidName => "invalid_name",
            ErrorCode::RoomFull => "room_full",
            ErrorCode::RoomBusy => "room_busy",
            ErrorCode::RoomClosed => "room_closed",
            ErrorCode::UnknownQuiz => "unknown_quiz",
            ErrorCode::WrongPhase => "wrong_phase",
            ErrorCode::NotHost => "not_host",
            ErrorCode::NotReady => "not_ready",
            ErrorCode::NoRoundsRemaining => "no_rounds_remaining",
            ErrorCode::InvalidAnswer => "invalid_answer",
            ErrorCode::Superseded => "superseded",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full state of a room, sent to a (re)attaching connection and whenever the
/// room returns to the lobby. A client that missed any number of events can
/// rebuild its entire view from one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub mode: GameMode,
    pub phase: Phase,
    pub players: Vec<PlayerView>,
    pub host_id: Option<PlayerId>,
    /// Index of the current (or last) round; `None` before the first round.
    pub round_index: Option<usize>,
    pub rounds_total: Option<usize>,
    pub current_prompt: Option<PromptView>,
    pub deadline_remaining_ms: Option<u64>,
    pub last_results: Option<RoundResultsView>,
    pub standings: Option<Vec<Standing>>,
}

/// A message a room may emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms a join or rejoin; always precedes the snapshot.
    Welcome {
        room_id: RoomId,
        player_id: PlayerId,
    },
    RoomSnapshot(RoomSnapshot),
    /// The complete roster, never a delta.
    RosterChanged {
        players: Vec<PlayerView>,
        host_id: Option<PlayerId>,
    },
    RoundStarted {
        round_index: usize,
        prompt: PromptView,
        /// Unix epoch milliseconds.
        deadline_at: u64,
        duration_ms: u64,
    },
    /// Content-free progress notice.
    PlayerAnswered {
        player_id: PlayerId,
    },
    RoundResults(RoundResultsView),
    GameFinished {
        totals: BTreeMap<PlayerId, u32>,
        ranking: Vec<Standing>,
    },
    ErrorNotice {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    /// Builds an error notice.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::ErrorNotice {
            code,
            message: message.into(),
        }
    }

    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::RoomSnapshot(_) => "room_snapshot",
            ServerMessage::RosterChanged { .. } => "roster_changed",
            ServerMessage::RoundStarted { .. } => "round_started",
            ServerMessage::PlayerAnswered { .. } => "player_answered",
            ServerMessage::RoundResults(_) => "round_results",
            ServerMessage::GameFinished { .. } => "game_finished",
            ServerMessage::ErrorNotice { .. } => "error_notice",
        }
    }

    /// Serializes to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_room() {
        let msg = ClientMessage::parse(
            r#"{"type":"join_room","room_id":"abcd","identity_token":"t","display_name":"Ada",
                "options":{"mode":"quiz","quiz_id":"sample"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::JoinRoom { room_id, options, .. } => {
                assert_eq!(room_id, "abcd");
                let options = options.unwrap();
                assert_eq!(options.mode, GameMode::Quiz);
                assert_eq!(options.quiz_id.as_deref(), Some("sample"));
                assert_eq!(options.rounds, None);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_parse_unit_variants() {
        assert_eq!(ClientMessage::parse(r#"{"type":"leave_room"}"#).unwrap(), ClientMessage::LeaveRoom);
        assert_eq!(ClientMessage::parse(r#"{"type":"advance"}"#).unwrap(), ClientMessage::Advance);
        assert_eq!(ClientMessage::parse(r#"{"type":"reset_game"}"#).unwrap(), ClientMessage::ResetGame);
    }

    #[test]
    fn test_parse_submit_answer_payloads() {
        let quiz = ClientMessage::parse(r#"{"type":"submit_answer","payload":1}"#).unwrap();
        assert_eq!(
            quiz,
            ClientMessage::SubmitAnswer {
                payload: AnswerPayload::Choice(1)
            }
        );

        let word = ClientMessage::parse(r#"{"type":"submit_answer","payload":{"Animal":"Bear"}}"#).unwrap();
        assert!(matches!(
            word,
            ClientMessage::SubmitAnswer {
                payload: AnswerPayload::Words(_)
            }
        ));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(ClientMessage::parse(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::parse(r#"{"ready":true}"#).is_err());
        assert!(ClientMessage::parse("not json").is_err());
    }

    #[test]
    fn test_error_notice_wire_form() {
        let json = ServerMessage::error(ErrorCode::NotHost, "only the host may start")
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "error_notice");
        assert_eq!(value["code"], "not_host");
        assert_eq!(value["message"], "only the host may start");
    }

    #[test]
    fn test_error_code_strings_match_serde() {
        for code in [ErrorCode::MalformedMessage, ErrorCode::RoomBusy, ErrorCode::NoRoundsRemaining] {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, serde_json::Value::String(code.as_str().to_string()));
        }
    }
}
