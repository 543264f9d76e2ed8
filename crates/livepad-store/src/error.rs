use livepad_shared::{ResourceKind, RoomError};
use thiserror::Error;

/// Everything that can go wrong between a room operation and SQLite.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Creating the data directory failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The room, note or file does not exist.
    #[error("Record not found")]
    NotFound,

    /// A room with this id was already created, or a note id is taken.
    #[error("Record already exists")]
    AlreadyExists,

    /// Conditional append refused because the room is at its cap.
    #[error("Capacity exceeded: at most {cap} {kind}s")]
    CapacityExceeded { kind: ResourceKind, cap: usize },

    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored value no longer parses into its domain type.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Bad file id: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("Bad timestamp: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// A previous holder of the connection lock panicked.
    #[error("Database lock poisoned")]
    Poisoned,

    /// The blocking task running a query failed.
    #[error("Storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// True when a rusqlite error is a UNIQUE / PRIMARY KEY violation.
    pub(crate) fn is_constraint(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<StoreError> for RoomError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => RoomError::NotFound,
            StoreError::CapacityExceeded { kind, cap } => RoomError::CapacityExceeded { kind, cap },
            other => RoomError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
