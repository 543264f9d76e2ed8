use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use livepad_shared::types::{Note, RoomId};
use livepad_shared::ResourceKind;

use crate::database::{from_db_time, to_db_time, Database};
use crate::error::{Result, StoreError};
use crate::rooms::room_exists;

impl Database {
    /// Append a note if, and only if, the room exists and holds fewer than
    /// `cap` notes. Count check and insert are one statement, so two racing
    /// appends cannot both squeeze under the cap.
    pub fn append_note(&mut self, room_id: &RoomId, note: &Note, cap: usize) -> Result<()> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx
            .execute(
                "INSERT INTO notes (room_id, id, content, created_at, updated_at)
                 SELECT ?1, ?2, ?3, ?4, ?5
                 WHERE EXISTS (SELECT 1 FROM rooms WHERE id = ?1)
                   AND (SELECT COUNT(*) FROM notes WHERE room_id = ?1) < ?6",
                params![
                    room_id.as_str(),
                    note.id,
                    note.content,
                    to_db_time(&note.created_at),
                    to_db_time(&note.updated_at),
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
                    kind: ResourceKind::Note,
                    cap,
                }
            } else {
                StoreError::NotFound
            });
        }

        tx.commit()?;
        Ok(())
    }

    /// Replace a note's content in place. Only `content` and `updated_at`
    /// change. Returns the updated note, or [`StoreError::NotFound`] if the
    /// room or the note is gone.
    pub fn update_note_content(
        &mut self,
        room_id: &RoomId,
        note_id: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<Note> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let affected = tx.execute(
            "UPDATE notes SET content = ?3, updated_at = ?4
             WHERE room_id = ?1 AND id = ?2",
            params![room_id.as_str(), note_id, content, to_db_time(&updated_at)],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        let note = tx
            .query_row(
                "SELECT id, content, created_at, updated_at
                 FROM notes
                 WHERE room_id = ?1 AND id = ?2",
                params![room_id.as_str(), note_id],
                row_to_note,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        tx.commit()?;
        Ok(note)
    }

    /// Remove a note. Returns whether anything was removed.
    pub fn remove_note(&mut self, room_id: &RoomId, note_id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM notes WHERE room_id = ?1 AND id = ?2",
            params![room_id.as_str(), note_id],
        )?;
        Ok(affected > 0)
    }
}

pub(crate) fn insert_note(conn: &Connection, room_id: &RoomId, note: &Note) -> Result<()> {
    conn.execute(
        "INSERT INTO notes (room_id, id, content, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            room_id.as_str(),
            note.id,
            note.content,
            to_db_time(&note.created_at),
            to_db_time(&note.updated_at),
        ],
    )?;
    Ok(())
}

/// Notes of a room in insertion order.
pub(crate) fn notes_for_room(conn: &Connection, room_id: &RoomId) -> Result<Vec<Note>> {
    let mut stmt = conn.prepare(
        "SELECT id, content, created_at, updated_at
         FROM notes
         WHERE room_id = ?1
         ORDER BY seq ASC",
    )?;

    let rows = stmt.query_map(params![room_id.as_str()], row_to_note)?;

    let mut notes = Vec::new();
    for row in rows {
        notes.push(row?);
    }
    Ok(notes)
}

fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    let id: String = row.get(0)?;
    let content: String = row.get(1)?;
    let created_str: String = row.get(2)?;
    let updated_str: String = row.get(3)?;

    Ok(Note {
        id,
        content,
        created_at: from_db_time(2, &created_str)?,
        updated_at: from_db_time(3, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use livepad_shared::types::{now, NoteDraft};

    use crate::test_support::{db_with_room, room_id};

    fn note(id: &str) -> Note {
        NoteDraft {
            id: id.into(),
            content: format!("cipher-{id}"),
        }
        .stamp(now())
    }

    #[test]
    fn append_keeps_insertion_order() {
        let (mut db, room) = db_with_room(1);
        for id in ["b", "a", "c"] {
            db.append_note(&room, &note(id), 4).unwrap();
        }

        let ids: Vec<_> = db
            .get_room(&room)
            .unwrap()
            .text_notes
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    #[test]
    fn append_respects_cap() {
        let (mut db, room) = db_with_room(1);
        for i in 0..4 {
            db.append_note(&room, &note(&format!("n{i}")), 4).unwrap();
        }

        let err = db.append_note(&room, &note("n4"), 4).unwrap_err();
        assert!(matches!(
            err,
            StoreError::CapacityExceeded {
                kind: ResourceKind::Note,
                cap: 4
            }
        ));
        assert_eq!(db.get_room(&room).unwrap().text_notes.len(), 4);
    }

    #[test]
    fn append_to_missing_room_is_not_found() {
        let mut db = Database::open_in_memory().unwrap();
        let err = db.append_note(&room_id(7), &note("n1"), 4).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn duplicate_note_id_is_rejected() {
        let (mut db, room) = db_with_room(1);
        db.append_note(&room, &note("same"), 4).unwrap();

        let err = db.append_note(&room, &note("same"), 4).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
    }

    #[test]
    fn same_note_id_in_different_rooms() {
        let (mut db, first) = db_with_room(1);
        let second = room_id(2);
        db.create_room(&livepad_shared::types::Room::new(
            second.clone(),
            "h".into(),
            livepad_shared::types::RoomLifetime::OneDay,
            now(),
        ))
        .unwrap();

        db.append_note(&first, &note("n1"), 4).unwrap();
        db.append_note(&second, &note("n1"), 4).unwrap();
    }

    #[test]
    fn update_changes_content_and_timestamp_only() {
        let (mut db, room) = db_with_room(1);
        let original = note("n1");
        db.append_note(&room, &original, 4).unwrap();

        let later = original.updated_at + Duration::seconds(5);
        let updated = db.update_note_content(&room, "n1", "new", later).unwrap();

        assert_eq!(updated.id, original.id);
        assert_eq!(updated.created_at, original.created_at);
        assert_eq!(updated.updated_at, later);
        assert_eq!(updated.content, "new");
    }

    #[test]
    fn update_missing_note_is_not_found() {
        let (mut db, room) = db_with_room(1);
        let err = db
            .update_note_content(&room, "ghost", "x", now())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn remove_is_idempotent() {
        let (mut db, room) = db_with_room(1);
        db.append_note(&room, &note("n1"), 4).unwrap();

        assert!(db.remove_note(&room, "n1").unwrap());
        assert!(!db.remove_note(&room, "n1").unwrap());
    }
}
