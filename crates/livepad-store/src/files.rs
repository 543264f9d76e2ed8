use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use livepad_shared::types::{FileRef, RoomId};
use livepad_shared::ResourceKind;

use crate::database::{from_db_time, to_db_time, Database};
use crate::error::{Result, StoreError};
use crate::rooms::room_exists;

impl Database {
    /// Append file metadata under the same conditional-insert rule as notes.
    pub fn append_file(&mut self, room_id: &RoomId, file: &FileRef, cap: usize) -> Result<()> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx
            .execute(
                "INSERT INTO files (room_id, id, name, url, mime_type, size, created_at)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
                 WHERE EXISTS (SELECT 1 FROM rooms WHERE id = ?1)
                   AND (SELECT COUNT(*) FROM files WHERE room_id = ?1) < ?8",
                params![
                    room_id.as_str(),
                    file.id.to_string(),
                    file.name,
                    file.url,
                    file.mime_type,
                    file.size as i64,
                    to_db_time(&file.created_at),
                    cap as i64,
                ],
            )
            .map_err(|e| {
                if StoreError::is_constraint(&e) {
                    StoreError::AlreadyExists
                } else {
                    StoreError::Sqlite(e)
                }
            })?;

        if inserted == 0 {
            return Err(if room_exists(&tx, room_id)? {
                StoreError::CapacityExceeded {
                    kind: ResourceKind::File,
                    cap,
                }
            } else {
                StoreError::NotFound
            });
        }

        tx.commit()?;
        Ok(())
    }

    /// Remove file metadata and return what was removed, so the caller can
    /// reclaim the bytes. [`StoreError::NotFound`] if it was already gone.
    pub fn remove_file(&mut self, room_id: &RoomId, file_id: Uuid) -> Result<FileRef> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let file = tx
            .query_row(
                "SELECT id, name, url, mime_type, size, created_at
                 FROM files
                 WHERE room_id = ?1 AND id = ?2",
                params![room_id.as_str(), file_id.to_string()],
                row_to_file,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        tx.execute(
            "DELETE FROM files WHERE room_id = ?1 AND id = ?2",
            params![room_id.as_str(), file_id.to_string()],
        )?;

        tx.commit()?;
        Ok(file)
    }
}

pub(crate) fn insert_file(conn: &Connection, room_id: &RoomId, file: &FileRef) -> Result<()> {
    conn.execute(
        "INSERT INTO files (room_id, id, name, url, mime_type, size, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            room_id.as_str(),
            file.id.to_string(),
            file.name,
            file.url,
            file.mime_type,
            file.size as i64,
            to_db_time(&file.created_at),
        ],
    )?;
    Ok(())
}

/// Files of a room in insertion order.
pub(crate) fn files_for_room(conn: &Connection, room_id: &RoomId) -> Result<Vec<FileRef>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, url, mime_type, size, created_at
         FROM files
         WHERE room_id = ?1
         ORDER BY seq ASC",
    )?;

    let rows = stmt.query_map(params![room_id.as_str()], row_to_file)?;

    let mut files = Vec::new();
    for row in rows {
        files.push(row?);
    }
    Ok(files)
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRef> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let url: String = row.get(2)?;
    let mime_type: String = row.get(3)?;
    let size: i64 = row.get(4)?;
    let created_str: String = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(FileRef {
        id,
        name,
        url,
        mime_type,
        size: size.max(0) as u64,
        created_at: from_db_time(5, &created_str)?,
    })
}
