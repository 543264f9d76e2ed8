use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{ROOM_ID_MAX_BYTES, ROOM_ID_MIN_BYTES};
use crate::error::RoomError;

/// Current time, truncated to millisecond precision so that timestamps
/// survive a round trip through the store unchanged.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Room identity: a hex digest derived client-side from the passphrase.
///
/// Always stored lowercase. Construction validates length and alphabet, so a
/// `RoomId` that made it past deserialization is well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(s: &str) -> Result<Self, RoomError> {
        let s = s.trim();
        let bytes = hex::decode(s).map_err(|e| RoomError::InvalidRoomId(e.to_string()))?;
        if !(ROOM_ID_MIN_BYTES..=ROOM_ID_MAX_BYTES).contains(&bytes.len()) {
            return Err(RoomError::InvalidRoomId(format!(
                "expected {}..={} bytes, got {}",
                ROOM_ID_MIN_BYTES,
                ROOM_ID_MAX_BYTES,
                bytes.len()
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars, for logs.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

/// One live client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Room lifetime
// ---------------------------------------------------------------------------

/// Lifetime a client may pick when a room is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomLifetime {
    #[serde(rename = "3h")]
    ThreeHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl RoomLifetime {
    pub const ALL: [RoomLifetime; 4] = [
        RoomLifetime::ThreeHours,
        RoomLifetime::OneDay,
        RoomLifetime::SevenDays,
        RoomLifetime::ThirtyDays,
    ];

    pub fn duration(self) -> Duration {
        match self {
            RoomLifetime::ThreeHours => Duration::hours(3),
            RoomLifetime::OneDay => Duration::days(1),
            RoomLifetime::SevenDays => Duration::days(7),
            RoomLifetime::ThirtyDays => Duration::days(30),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoomLifetime::ThreeHours => "3h",
            RoomLifetime::OneDay => "1d",
            RoomLifetime::SevenDays => "7d",
            RoomLifetime::ThirtyDays => "30d",
        }
    }
}

impl fmt::Display for RoomLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomLifetime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "3h" => Ok(RoomLifetime::ThreeHours),
            "1d" => Ok(RoomLifetime::OneDay),
            "7d" => Ok(RoomLifetime::SevenDays),
            "30d" => Ok(RoomLifetime::ThirtyDays),
            other => Err(format!("unknown room lifetime: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Room contents
// ---------------------------------------------------------------------------

/// An encrypted text entry. `id` is chosen by the client and only has to be
/// unique within its room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    /// Opaque ciphertext, may be empty.
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A note as submitted by a client, before the server stamps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDraft {
    pub id: String,
    #[serde(default)]
    pub content: String,
}

impl NoteDraft {
    pub fn stamp(self, at: DateTime<Utc>) -> Note {
        Note {
            id: self.id,
            content: self.content,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Metadata for an uploaded (encrypted) file. The bytes live elsewhere;
/// `url` is the opaque locator handed out by the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub id: Uuid,
    /// Encrypted file name.
    pub name: String,
    pub url: String,
    /// Declared MIME type of the original file. UI hint only, never trusted.
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Size of the stored (encrypted) payload in bytes.
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// The canonical room document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(rename = "_id")]
    pub id: RoomId,
    /// Verification-only digest, immutable after creation.
    pub password_hash: String,
    pub text_notes: Vec<Note>,
    pub files: Vec<FileRef>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Room {
    /// A fresh, empty room that expires `lifetime` after `now`.
    pub fn new(id: RoomId, password_hash: String, lifetime: RoomLifetime, now: DateTime<Utc>) -> Self {
        Self {
            id,
            password_hash,
            text_notes: Vec::new(),
            files: Vec::new(),
            created_at: now,
            expires_at: now + lifetime.duration(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            text_notes: self.text_notes.clone(),
            files: self.files.clone(),
        }
    }

    pub fn into_snapshot(self) -> RoomSnapshot {
        RoomSnapshot {
            text_notes: self.text_notes,
            files: self.files,
        }
    }
}

/// What a joining client receives: everything except the credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub text_notes: Vec<Note>,
    pub files: Vec<FileRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_is_normalized_to_lowercase() {
        let id = RoomId::parse(&"AB".repeat(16)).unwrap();
        assert_eq!(id.as_str(), "ab".repeat(16));
        assert_eq!(id.short(), "abababab");
    }

    #[test]
    fn room_id_rejects_bad_input() {
        assert!(RoomId::parse("not-hex").is_err());
        assert!(RoomId::parse(&"ab".repeat(8)).is_err());
        assert!(RoomId::parse(&"ab".repeat(33)).is_err());
        assert!(RoomId::parse(&"ab".repeat(32)).is_ok());
    }

    #[test]
    fn room_id_validates_on_deserialize() {
        let ok: Result<RoomId, _> = serde_json::from_str(&format!("\"{}\"", "0f".repeat(16)));
        assert!(ok.is_ok());
        let bad: Result<RoomId, _> = serde_json::from_str("\"zz\"");
        assert!(bad.is_err());
    }

    #[test]
    fn lifetime_wire_names() {
        for lifetime in RoomLifetime::ALL {
            let json = serde_json::to_string(&lifetime).unwrap();
            assert_eq!(json, format!("\"{}\"", lifetime.as_str()));
            assert_eq!(lifetime.as_str().parse::<RoomLifetime>().unwrap(), lifetime);
        }
        assert!("2w".parse::<RoomLifetime>().is_err());
    }

    #[test]
    fn new_room_expires_after_lifetime() {
        let now = now();
        let room = Room::new(
            RoomId::parse(&"01".repeat(16)).unwrap(),
            "hash".into(),
            RoomLifetime::ThreeHours,
            now,
        );
        assert_eq!(room.expires_at - room.created_at, Duration::hours(3));
        assert!(!room.is_expired(now));
        assert!(room.is_expired(now + Duration::hours(3)));
    }

    #[test]
    fn file_ref_uses_type_on_the_wire() {
        let file = FileRef {
            id: Uuid::nil(),
            name: "enc".into(),
            url: "/files/x".into(),
            mime_type: "image/png".into(),
            size: 42,
            created_at: now(),
        };
        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(value["type"], "image/png");
        assert!(value.get("createdAt").is_some());
    }
}
