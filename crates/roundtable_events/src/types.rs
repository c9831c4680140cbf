//! # Core Type Definitions
//!
//! Identifiers, phases and the views a room exposes to its clients.
//!
//! ## Key Types
//!
//! - [`RoomId`] - short, human-typable room code (also the actor's address)
//! - [`PlayerId`] - stable player identity derived from a client identity token
//! - [`ConnectionId`] - opaque handle of one transport connection
//! - [`AnswerPayload`] - what a player submitted for a round
//!
//! Wrapper types keep the three identifiers from being confused with each
//! other, and every type here serializes to plain JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Namespace for deriving player ids from identity tokens (UUIDv5).
const IDENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x9c1f_52d4_6b7e_4c0a_8f3e_2d61_a4b5_c7e9);

/// Short external identifier of a room.
///
/// Room ids are normalized to upper case and must be 3-12 ASCII alphanumeric
/// characters, so `"abcd"` and `" ABCD "` address the same room.
///
/// # Examples
///
/// ```rust
/// use roundtable_events::RoomId;
///
/// let id = RoomId::parse(" quiz1 ")?;
/// assert_eq!(id.as_str(), "QUIZ1");
/// assert!(RoomId::parse("no spaces").is_err());
/// # Ok::<(), roundtable_events::RoomIdError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

/// Reasons a string is not a valid [`RoomId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomIdError {
    #[error("room id must be between {min} and {max} characters, got {len}")]
    Length { len: usize, min: usize, max: usize },

    #[error("room id may only contain ASCII letters and digits")]
    Characters,
}

impl RoomId {
    /// Shortest accepted room id.
    pub const MIN_LEN: usize = 3;
    /// Longest accepted room id.
    pub const MAX_LEN: usize = 12;

    /// Parses and normalizes a room id.
    pub fn parse(raw: &str) -> Result<Self, RoomIdError> {
        let trimmed = raw.trim();
        let len = trimmed.chars().count();
        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&len) {
            return Err(RoomIdError::Length {
                len,
                min: Self::MIN_LEN,
                max: Self::MAX_LEN,
            });
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RoomIdError::Characters);
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// The normalized code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl std::str::FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of a player.
///
/// A player id is not tied to a socket. It is derived from the identity token
/// the client presents when joining, so a client that reconnects on a new
/// socket with the same token is recognised as the same player and gets its
/// score, ready flag and answers back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Derives the player id for an identity token (UUIDv5, deterministic).
    pub fn from_identity(identity_token: &str) -> Self {
        Self(Uuid::new_v5(&IDENTITY_NAMESPACE, identity_token.as_bytes()))
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of one transport connection.
///
/// Allocated by the connection registry; a player may be reached through a
/// different connection after every reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// Room state vocabulary
// ============================================================================

/// The phase of a room. A room is in exactly one phase at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    RoundActive,
    RoundResults,
    Finished,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Lobby => "lobby",
            Phase::RoundActive => "round_active",
            Phase::RoundResults => "round_results",
            Phase::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// The shape of game a room plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Open-ended word prompts: one letter, several categories per round.
    #[default]
    Word,
    /// Fixed-choice quiz questions, one question per round.
    Quiz,
}

/// Options supplied by the join that creates a room. Ignored for existing rooms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomOptions {
    pub mode: GameMode,
    /// Quiz to play (quiz mode). Falls back to the built-in sample quiz.
    pub quiz_id: Option<String>,
    /// Categories for word mode.
    pub categories: Option<Vec<String>>,
    /// Number of rounds per game in word mode.
    pub rounds: Option<usize>,
    pub round_duration_secs: Option<u64>,
    /// Whether any connected player may start/advance rounds, or only the host.
    pub anyone_can_start: Option<bool>,
}

/// What a player submitted for one round.
///
/// Opaque to the coordinator; only the scorer interprets it. On the wire a
/// quiz answer is a bare option index and a word answer is a
/// `{category: text}` object. A missing submission is recorded as `Blank`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerPayload {
    Choice(usize),
    Words(BTreeMap<String, String>),
    Blank,
}

/// Points and a human-readable explanation for one player in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreLine {
    pub points: u32,
    pub explanation: String,
}

impl ScoreLine {
    pub fn new(points: u32, explanation: impl Into<String>) -> Self {
        Self {
            points,
            explanation: explanation.into(),
        }
    }

    pub fn zero(explanation: impl Into<String>) -> Self {
        Self::new(0, explanation)
    }
}

// ============================================================================
// Client-facing views
// ============================================================================

/// One roster entry as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub display_name: String,
    pub connected: bool,
    pub ready: bool,
    pub has_answered: bool,
    pub score: u32,
    pub is_host: bool,
}

/// The prompt of the active round, without any answer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptView {
    Word {
        letter: char,
        categories: Vec<String>,
    },
    Quiz {
        question_index: usize,
        question_count: usize,
        text: String,
        options: Vec<String>,
    },
}

/// Scores of one finished round plus running totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResultsView {
    pub round_index: usize,
    pub scores: BTreeMap<PlayerId, ScoreLine>,
    pub answers: BTreeMap<PlayerId, AnswerPayload>,
    pub totals: BTreeMap<PlayerId, u32>,
    /// Set when the results came from the local fallback rather than the scorer.
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<usize>,
}

/// A row of the final ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    /// 1-based; players with equal totals share a rank.
    pub rank: usize,
    pub player_id: PlayerId,
    pub display_name: String,
    pub total: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_normalization() {
        assert_eq!(RoomId::parse("abc").unwrap().as_str(), "ABC");
        assert_eq!(RoomId::parse("  Ab12 ").unwrap().as_str(), "AB12");
        assert!(matches!(RoomId::parse("ab"), Err(RoomIdError::Length { len: 2, .. })));
        assert!(matches!(RoomId::parse("abcdefghijklm"), Err(RoomIdError::Length { .. })));
        assert_eq!(RoomId::parse("ab-cd"), Err(RoomIdError::Characters));
    }

    #[test]
    fn test_room_id_serde_validates() {
        let id: RoomId = serde_json::from_str("\"wxyz\"").unwrap();
        assert_eq!(id.as_str(), "WXYZ");
        assert!(serde_json::from_str::<RoomId>("\"x\"").is_err());
    }

    #[test]
    fn test_player_id_is_stable_per_token() {
        let a = PlayerId::from_identity("alice-device");
        let b = PlayerId::from_identity("alice-device");
        let c = PlayerId::from_identity("bob-device");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(serde_json::to_string(&a).unwrap(), format!("\"{a}\""));
    }

    #[test]
    fn test_answer_payload_wire_forms() {
        let choice: AnswerPayload = serde_json::from_str("2").unwrap();
        assert_eq!(choice, AnswerPayload::Choice(2));

        let words: AnswerPayload = serde_json::from_str(r#"{"City":"Berlin"}"#).unwrap();
        match words {
            AnswerPayload::Words(map) => assert_eq!(map.get("City").map(String::as_str), Some("Berlin")),
            other => panic!("unexpected payload {other:?}"),
        }

        let blank: AnswerPayload = serde_json::from_str("null").unwrap();
        assert_eq!(blank, AnswerPayload::Blank);
    }

    #[test]
    fn test_player_id_map_keys_serialize_as_strings() {
        let id = PlayerId::from_identity("k");
        let mut totals = BTreeMap::new();
        totals.insert(id, 7u32);
        let json = serde_json::to_string(&totals).unwrap();
        assert_eq!(json, format!("{{\"{id}\":7}}"));
        let back: BTreeMap<PlayerId, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, totals);
    }
}
