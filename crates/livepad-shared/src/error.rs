use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a capacity or duplicate-id error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Note,
    File,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Note => f.write_str("note"),
            ResourceKind::File => f.write_str("file"),
        }
    }
}

/// Outcome of a room operation that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// Wrong credential. Deliberately says nothing about why.
    #[error("Invalid password.")]
    AuthenticationFailed,

    /// Mutation attempted outside the room the connection joined.
    #[error("Not authenticated for this room")]
    Unauthorized,

    #[error("Room is full: at most {cap} {kind}s allowed")]
    CapacityExceeded { kind: ResourceKind, cap: usize },

    /// Target room, note or file is gone, usually because of a race.
    #[error("Not found")]
    NotFound,

    #[error("A {kind} with id {id} already exists")]
    DuplicateId { kind: ResourceKind, id: String },

    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl RoomError {
    /// Errors that are absorbed silently instead of being reported back.
    pub fn is_silent(&self) -> bool {
        matches!(self, RoomError::NotFound)
    }
}
