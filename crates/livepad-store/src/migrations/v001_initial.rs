//! v001 -- Initial schema creation.
//!
//! A room document is the `rooms` row plus its `notes` and `files` rows.
//! Child rows keep insertion order through the `seq` column and disappear
//! with their room via `ON DELETE CASCADE`.
//!
//! Timestamps are RFC-3339 UTC strings with fixed millisecond precision, so
//! text comparison orders them chronologically.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Rooms
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rooms (
    id            TEXT PRIMARY KEY NOT NULL,  -- lowercase hex digest
    password_hash TEXT NOT NULL,              -- opaque, immutable
    created_at    TEXT NOT NULL,
    expires_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rooms_expires_at ON rooms(expires_at);

-- ----------------------------------------------------------------
-- Text notes
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notes (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id    TEXT NOT NULL,                 -- FK -> rooms(id)
    id         TEXT NOT NULL,                 -- client-generated
    content    TEXT NOT NULL,                 -- opaque ciphertext
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    UNIQUE (room_id, id),
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Files (metadata only, bytes live in the blob store)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id    TEXT NOT NULL,                 -- FK -> rooms(id)
    id         TEXT NOT NULL,                 -- UUID v4
    name       TEXT NOT NULL,                 -- encrypted file name
    url        TEXT NOT NULL,                 -- blob locator
    mime_type  TEXT NOT NULL,
    size       INTEGER NOT NULL,
    created_at TEXT NOT NULL,

    UNIQUE (room_id, id),
    FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
