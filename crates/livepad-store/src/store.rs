//! Async handle over [`Database`].
//!
//! SQLite calls block, so every operation runs on tokio's blocking pool and
//! never stalls the tasks serving other connections. The spawned job owns
//! everything it needs: if the awaiting task is dropped halfway through, the
//! write still completes.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use livepad_shared::constants::{DEFAULT_MAX_FILES, DEFAULT_MAX_NOTES};
use livepad_shared::types::{FileRef, Note, Room, RoomId};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Per-room caps enforced by the conditional appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomLimits {
    pub max_notes: usize,
    pub max_files: usize,
}

impl Default for RoomLimits {
    fn default() -> Self {
        Self {
            max_notes: DEFAULT_MAX_NOTES,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

/// Cloneable, thread-safe room store.
#[derive(Clone)]
pub struct RoomStore {
    db: Arc<Mutex<Database>>,
    limits: RoomLimits,
}

impl RoomStore {
    pub fn new(db: Database, limits: RoomLimits) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            limits,
        }
    }

    pub fn open(path: &Path, limits: RoomLimits) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?, limits))
    }

    pub fn open_in_memory(limits: RoomLimits) -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?, limits))
    }

    async fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            job(&mut *guard)
        })
        .await?
    }

    pub async fn ping(&self) -> Result<()> {
        self.run(|db| db.ping()).await
    }

    pub async fn get(&self, id: &RoomId) -> Result<Room> {
        let id = id.clone();
        self.run(move |db| db.get_room(&id)).await
    }

    /// Create a room; [`StoreError::AlreadyExists`] if the id is taken.
    pub async fn create(&self, room: Room) -> Result<()> {
        self.run(move |db| db.create_room(&room)).await
    }

    pub async fn append_note(&self, id: &RoomId, note: Note) -> Result<()> {
        let id = id.clone();
        let cap = self.limits.max_notes;
        self.run(move |db| db.append_note(&id, &note, cap)).await
    }

    pub async fn update_note_content(
        &self,
        id: &RoomId,
        note_id: &str,
        content: String,
        updated_at: DateTime<Utc>,
    ) -> Result<Note> {
        let id = id.clone();
        let note_id = note_id.to_string();
        self.run(move |db| db.update_note_content(&id, &note_id, &content, updated_at))
            .await
    }

    pub async fn remove_note(&self, id: &RoomId, note_id: &str) -> Result<bool> {
        let id = id.clone();
        let note_id = note_id.to_string();
        self.run(move |db| db.remove_note(&id, &note_id)).await
    }

    pub async fn append_file(&self, id: &RoomId, file: FileRef) -> Result<()> {
        let id = id.clone();
        let cap = self.limits.max_files;
        self.run(move |db| db.append_file(&id, &file, cap)).await
    }

    pub async fn remove_file(&self, id: &RoomId, file_id: Uuid) -> Result<FileRef> {
        let id = id.clone();
        self.run(move |db| db.remove_file(&id, file_id)).await
    }

    /// Delete a room; returns the removed document, `None` if absent.
    pub async fn delete(&self, id: &RoomId) -> Result<Option<Room>> {
        let id = id.clone();
        self.run(move |db| db.delete_room(&id)).await
    }

    pub async fn delete_if_expired(&self, id: &RoomId, now: DateTime<Utc>) -> Result<Option<Room>> {
        let id = id.clone();
        self.run(move |db| db.delete_room_if_expired(&id, now)).await
    }

    /// Finite snapshot of the rooms that have expired by `now`.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Room>> {
        self.run(move |db| db.list_expired(now)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepad_shared::types::{now, NoteDraft, RoomLifetime};
    use livepad_shared::ResourceKind;

    use crate::test_support::room_id;

    async fn store_with_room() -> (RoomStore, RoomId) {
        let store = RoomStore::open_in_memory(RoomLimits::default()).unwrap();
        let room = Room::new(room_id(1), "hash".into(), RoomLifetime::OneDay, now());
        store.create(room.clone()).await.unwrap();
        (store, room.id)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_never_exceed_cap() {
        let (store, room) = store_with_room().await;

        let mut handles = Vec::new();
        for i in 0..12 {
            let store = store.clone();
            let room = room.clone();
            handles.push(tokio::spawn(async move {
                let note = NoteDraft {
                    id: format!("n{i}"),
                    content: String::new(),
                }
                .stamp(now());
                store.append_note(&room, note).await
            }));
        }

        let mut ok = 0;
        let mut full = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(StoreError::CapacityExceeded {
                    kind: ResourceKind::Note,
                    ..
                }) => full += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(ok, 4);
        assert_eq!(full, 8);
        assert_eq!(store.get(&room).await.unwrap().text_notes.len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_creates_have_one_winner() {
        let store = RoomStore::open_in_memory(RoomLimits::default()).unwrap();

        let mut handles = Vec::new();
        for i in 0..6 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let room = Room::new(room_id(5), format!("hash-{i}"), RoomLifetime::OneDay, now());
                store.create(room).await.map(|_| format!("hash-{i}"))
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(hash) => winners.push(hash),
                Err(StoreError::AlreadyExists) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(winners.len(), 1);
        let stored = store.get(&room_id(5)).await.unwrap();
        assert_eq!(stored.password_hash, winners[0]);
    }

    #[tokio::test]
    async fn file_round_trip_through_handle() {
        let (store, room) = store_with_room().await;
        let file = FileRef {
            id: Uuid::new_v4(),
            name: "enc".into(),
            url: "/files/abc".into(),
            mime_type: "text/plain".into(),
            size: 3,
            created_at: now(),
        };

        store.append_file(&room, file.clone()).await.unwrap();
        assert_eq!(store.remove_file(&room, file.id).await.unwrap(), file);
        assert!(matches!(
            store.remove_file(&room, file.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn ping_and_delete() {
        let (store, room) = store_with_room().await;
        store.ping().await.unwrap();

        assert!(store.delete(&room).await.unwrap().is_some());
        assert!(matches!(store.get(&room).await, Err(StoreError::NotFound)));
    }
}
