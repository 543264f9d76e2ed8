use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use livepad_shared::types::{Room, RoomId};

use crate::database::{from_db_time, to_db_time, Database};
use crate::error::{Result, StoreError};
use crate::files::files_for_room;
use crate::notes::notes_for_room;

impl Database {
    /// Insert a new room document. Fails with [`StoreError::AlreadyExists`]
    /// if the id is taken; the primary key makes two racing creators end up
    /// with exactly one winner.
    pub fn create_room(&mut self, room: &Room) -> Result<()> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO rooms (id, password_hash, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                room.id.as_str(),
                room.password_hash,
                to_db_time(&room.created_at),
                to_db_time(&room.expires_at),
            ],
        )
        .map_err(|e| {
            if StoreError::is_constraint(&e) {
                StoreError::AlreadyExists
            } else {
                StoreError::Sqlite(e)
            }
        })?;

        for note in &room.text_notes {
            crate::notes::insert_note(&tx, &room.id, note)?;
        }
        for file in &room.files {
            crate::files::insert_file(&tx, &room.id, file)?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn get_room(&self, id: &RoomId) -> Result<Room> {
        load_room(self.conn(), id)?.ok_or(StoreError::NotFound)
    }

    /// Delete a room and everything in it. Returns the document as it was at
    /// the moment of deletion, or `None` if it was already gone.
    pub fn delete_room(&mut self, id: &RoomId) -> Result<Option<Room>> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let room = load_room(&tx, id)?;
        if room.is_some() {
            tx.execute("DELETE FROM rooms WHERE id = ?1", params![id.as_str()])?;
        }

        tx.commit()?;
        Ok(room)
    }

    /// Like [`Database::delete_room`], but only if the room has expired by
    /// `now`.
    pub fn delete_room_if_expired(
        &mut self,
        id: &RoomId,
        now: DateTime<Utc>,
    ) -> Result<Option<Room>> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let room = load_room(&tx, id)?.filter(|room| room.is_expired(now));
        if room.is_some() {
            tx.execute("DELETE FROM rooms WHERE id = ?1", params![id.as_str()])?;
        }

        tx.commit()?;
        Ok(room)
    }

    /// Every room whose `expires_at <= now`, oldest expiry first.
    pub fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Room>> {
        let mut stmt = self.conn().prepare(
            "SELECT id FROM rooms
             WHERE expires_at <= ?1
             ORDER BY expires_at ASC",
        )?;

        let ids = stmt.query_map(params![to_db_time(&now)], |row| row.get::<_, String>(0))?;

        let mut rooms = Vec::new();
        for id in ids {
            let id = RoomId::parse(&id?).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            if let Some(room) = load_room(self.conn(), &id)? {
                rooms.push(room);
            }
        }
        Ok(rooms)
    }

    #[cfg(test)]
    pub(crate) fn room_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM rooms", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

pub(crate) fn room_exists(conn: &Connection, id: &RoomId) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM rooms WHERE id = ?1",
            params![id.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn load_room(conn: &Connection, id: &RoomId) -> Result<Option<Room>> {
    let header = conn
        .query_row(
            "SELECT password_hash, created_at, expires_at
             FROM rooms
             WHERE id = ?1",
            params![id.as_str()],
            |row| {
                let password_hash: String = row.get(0)?;
                let created_str: String = row.get(1)?;
                let expires_str: String = row.get(2)?;
                Ok((
                    password_hash,
                    from_db_time(1, &created_str)?,
                    from_db_time(2, &expires_str)?,
                ))
            },
        )
        .optional()?;

    let Some((password_hash, created_at, expires_at)) = header else {
        return Ok(None);
    };

    Ok(Some(Room {
        id: id.clone(),
        password_hash,
        text_notes: notes_for_room(conn, id)?,
        files: files_for_room(conn, id)?,
        created_at,
        expires_at,
    }))
}
