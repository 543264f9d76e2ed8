//! Wire protocol between clients and the server.
//!
//! Every frame is a JSON text message `{"event": "<name>", "data": ...}`.
//! Commands and events are closed enums, so a frame that does not match one
//! of the variants below is rejected at the transport boundary and never
//! reaches the room authority.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{FileRef, Note, NoteDraft, RoomId, RoomLifetime, RoomSnapshot};

/// Client → server commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Probe the storage backend.
    TestConnection,

    /// Join (or create) a room.
    AuthenticateRoom(AuthenticateRoom),

    AddNote(AddNote),

    UpdateNote(UpdateNote),

    DeleteNote(DeleteNote),

    DeleteFile(DeleteFile),

    DeleteRoom(DeleteRoom),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRoom {
    pub room_id: RoomId,
    pub password_hash: String,
    /// Only consulted when the room does not exist yet.
    #[serde(default)]
    pub lifetime: Option<RoomLifetime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddNote {
    pub room_id: RoomId,
    pub note: NoteDraft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNote {
    pub room_id: RoomId,
    pub note_id: String,
    #[serde(alias = "encryptedContent")]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNote {
    pub room_id: RoomId,
    pub note_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFile {
    pub room_id: RoomId,
    pub file_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRoom {
    pub room_id: RoomId,
}

impl ClientCommand {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Event name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::TestConnection => "test-connection",
            ClientCommand::AuthenticateRoom(_) => "authenticate-room",
            ClientCommand::AddNote(_) => "add-note",
            ClientCommand::UpdateNote(_) => "update-note",
            ClientCommand::DeleteNote(_) => "delete-note",
            ClientCommand::DeleteFile(_) => "delete-file",
            ClientCommand::DeleteRoom(_) => "delete-room",
        }
    }
}

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    ConnectionStatus(ConnectionStatus),

    AuthenticationSuccess,

    AuthenticationFailed { message: String },

    /// Full snapshot sent right after a successful join.
    RoomData(RoomSnapshot),

    NoteAdded(Note),

    NoteUpdated(NoteContent),

    /// Id of the removed note.
    NoteDeleted(String),

    FileAdded(FileRef),

    /// Id of the removed file.
    FileDeleted(Uuid),

    RoomDeleted,

    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteContent {
    pub note_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Connected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub socket: LinkState,
    pub storage: LinkState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ConnectionStatus(_) => "connection-status",
            ServerEvent::AuthenticationSuccess => "authentication-success",
            ServerEvent::AuthenticationFailed { .. } => "authentication-failed",
            ServerEvent::RoomData(_) => "room-data",
            ServerEvent::NoteAdded(_) => "note-added",
            ServerEvent::NoteUpdated(_) => "note-updated",
            ServerEvent::NoteDeleted(_) => "note-deleted",
            ServerEvent::FileAdded(_) => "file-added",
            ServerEvent::FileDeleted(_) => "file-deleted",
            ServerEvent::RoomDeleted => "room-deleted",
            ServerEvent::Error { .. } => "error",
        }
    }
}
