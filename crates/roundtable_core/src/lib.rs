//! # Roundtable Core
//!
//! Room coordination for turn-based word and quiz games: a room owns a roster
//! of players and drives them through rounds of
//! `Lobby -> RoundActive -> RoundResults -> ... -> Finished`.
//!
//! ## Architecture
//!
//! - [`state`] - the pure room state machine. [`Room::handle`] consumes one
//!   [`RoomEvent`] and records [`Effect`]s; it performs no I/O and reads the
//!   clock only through the `now` it is given.
//! - [`actor`] - one tokio task per room that feeds the state machine from a
//!   bounded inbox and carries out its effects (messages, bindings, timers,
//!   scorer calls).
//! - [`directory`] - creates, routes to and reclaims room actors by id.
//! - [`registry`] - maps transport connections to `(room, player)` and turns
//!   wire messages into room events.
//! - [`scorer`] - the [`Scorer`] trait and its quiz, word and HTTP backends.
//! - [`prompt`] - word letters, quiz decks and the quiz catalog.
//! - [`policy`] - start eligibility, host selection, name validation.
//!
//! Only a room's actor ever touches that room's state. Everything else talks
//! to it through its inbox, so no room state is behind a lock.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roundtable_core::{assemble, QuizCatalog, RoomSettings, Scorers};
//! use roundtable_events::ClientMessage;
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let settings = RoomSettings::default();
//! let scorers = Scorers::local(settings.quiz_points);
//! let registry = assemble(settings, Arc::new(QuizCatalog::new()), scorers);
//!
//! let (conn, mut outbox) = registry.open();
//! registry.handle(conn, ClientMessage::parse(
//!     r#"{"type":"join_room","room_id":"ABCD","identity_token":"t1","display_name":"Ada"}"#,
//! ).unwrap());
//! while let Some(message) = outbox.recv().await {
//!     println!("{}", message.to_json().unwrap());
//! }
//! # }
//! ```

pub mod actor;
pub mod config;
pub mod directory;
pub mod error;
pub mod policy;
pub mod prompt;
pub mod registry;
pub mod scorer;
pub mod state;


pub use actor::{spawn_room, Outbound, RoomHandle, RoomStats};
pub use config::{RoomRules, RoomSettings};
pub use directory::RoomDirectory;
pub use error::{CoreError, ScorerError};
pub use prompt::{sample_quiz, PromptSource, Question, Quiz, QuizCatalog, RoundPrompt, SAMPLE_QUIZ_ID};
pub use registry::{Binding, ConnectionRegistry, ConnectionTable};
pub use scorer::{
    HttpScorer, LetterRuleJudge, QuizScorer, ScoreSheet, Scorer, Scorers, ScoringRequest, WordScorer,
};
pub use state::{Effect, Effects, Player, Room, RoomEvent};

use std::sync::Arc;

/// Wires a connection table, a room directory and a registry together.
pub fn assemble(settings: RoomSettings, catalog: Arc<QuizCatalog>, scorers: Scorers) -> Arc<ConnectionRegistry> {
    let table = Arc::new(ConnectionTable::new());
    let directory = Arc::new(RoomDirectory::new(settings, catalog, scorers, table.clone()));
    Arc::new(ConnectionRegistry::new(table, directory))
}
