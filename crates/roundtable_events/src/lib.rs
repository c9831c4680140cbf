//! # Roundtable Events
//!
//! The shared vocabulary of the Roundtable room coordinator. Every other crate
//! in the workspace speaks in these types:
//!
//! - [`types`] - identifiers ([`RoomId`], [`PlayerId`], [`ConnectionId`]), room
//!   [`Phase`], [`GameMode`], answer payloads and the read-only views that are
//!   sent to clients.
//! - [`messages`] - the closed set of wire messages. [`ClientMessage`] is what a
//!   connection may send, [`ServerMessage`] is what a room may emit. Both are
//!   internally tagged JSON (`{"type": "join_room", ...}`), so an unknown tag is
//!   rejected when the text is parsed, long before any game logic runs.
//! - [`shutdown`] - [`ShutdownState`], shared by the transport and the room
//!   directory to coordinate a graceful stop.
//! - [`utils`] - timestamp helpers.
//!
//! ## Example
//!
//! ```rust
//! use roundtable_events::{ClientMessage, PlayerId};
//!
//! let msg = ClientMessage::parse(r#"{"type":"set_ready","ready":true}"#).unwrap();
//! assert_eq!(msg.kind(), "set_ready");
//!
//! // The same identity token always maps to the same player.
//! assert_eq!(PlayerId::from_identity("token-1"), PlayerId::from_identity("token-1"));
//! ```

pub mod messages;
pub mod shutdown;
pub mod types;
pub mod utils;

pub use messages::{ClientMessage, ErrorCode, RoomSnapshot, ServerMessage};
pub use shutdown::ShutdownState;
pub use types::{
    AnswerPayload, ConnectionId, GameMode, Phase, PlayerId, PlayerView, PromptView, RoomId,
    RoomIdError, RoomOptions, RoundResultsView, ScoreLine, Standing,
};
pub use utils::{current_timestamp, current_timestamp_millis};
