//! Error types for the room coordinator.
//!
//! These are operator-facing errors: routing and loading failures that a
//! caller has to handle. Anything a player did wrong is reported to that
//! player's connection as an `error_notice` and never becomes a `CoreError`.

use roundtable_events::{ErrorCode, RoomId, RoomIdError};

/// Failures surfaced by the directory, registry and quiz catalog.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("invalid room id: {0}")]
    InvalidRoomId(#[from] RoomIdError),

    /// A room command arrived on a connection that has not joined a room.
    #[error("connection has not joined a room")]
    NotAttached,

    /// The room's inbox is full.
    #[error("room {0} is busy")]
    RoomBusy(RoomId),

    /// The room's actor stopped while the event was being delivered.
    #[error("room {0} is closed")]
    RoomClosed(RoomId),

    #[error("room directory is shut down")]
    ShuttingDown,

    #[error("quiz '{0}' not found")]
    QuizNotFound(String),

    #[error("quiz catalog I/O error: {0}")]
    CatalogIo(#[from] std::io::Error),

    #[error("quiz catalog parse error: {0}")]
    CatalogParse(#[from] serde_json::Error),

    #[error("invalid quiz '{id}': {reason}")]
    InvalidQuiz { id: String, reason: String },

    #[error("scorer error: {0}")]
    Scorer(#[from] ScorerError),
}

impl CoreError {
    /// The wire code reported to a client when this error ends a request.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::RoomNotFound(_) | CoreError::NotAttached => ErrorCode::NotInRoom,
            CoreError::InvalidRoomId(_) => ErrorCode::InvalidRoomId,
            CoreError::RoomBusy(_) => ErrorCode::RoomBusy,
            CoreError::RoomClosed(_) | CoreError::ShuttingDown => ErrorCode::RoomClosed,
            CoreError::QuizNotFound(_) => ErrorCode::UnknownQuiz,
            CoreError::CatalogIo(_)
            | CoreError::CatalogParse(_)
            | CoreError::InvalidQuiz { .. }
            | CoreError::Scorer(_) => ErrorCode::Internal,
        }
    }
}

/// Why a scorer call produced no score sheet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScorerError {
    #[error("scorer timed out")]
    TimedOut,

    #[error("scorer failed: {0}")]
    Failed(String),

    /// The remote validator could not be reached or answered garbage.
    #[error("scorer transport error: {0}")]
    Transport(String),
}
