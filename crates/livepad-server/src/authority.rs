//! Room authority: the only place room state is mutated.
//!
//! Every command runs as persist-then-broadcast. If the store rejects a
//! write, nothing is sent to the room, so members never see an event for
//! state that does not exist.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use livepad_shared::protocol::{ClientCommand, ConnectionStatus, LinkState, NoteContent, ServerEvent};
use livepad_shared::types::{
    now, ConnectionId, FileRef, Note, NoteDraft, Room, RoomId, RoomLifetime, RoomSnapshot,
};
use livepad_shared::{ResourceKind, RoomError};
use livepad_store::{RoomStore, StoreError};

use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::fanout::{Audience, Fanout};
use crate::session::SessionRegistry;

pub struct RoomAuthority {
    store: RoomStore,
    blobs: Arc<BlobStore>,
    registry: Arc<SessionRegistry>,
    fanout: Fanout,
    config: Arc<ServerConfig>,
}

impl RoomAuthority {
    pub fn new(
        store: RoomStore,
        blobs: Arc<BlobStore>,
        registry: Arc<SessionRegistry>,
        config: Arc<ServerConfig>,
    ) -> Self {
        let fanout = Fanout::new(Arc::clone(&registry));
        Self {
            store,
            blobs,
            registry,
            fanout,
            config,
        }
    }

    pub fn store(&self) -> &RoomStore {
        &self.store
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    /// Join `room_id`, creating it on first contact.
    ///
    /// The lifetime is only consulted when the room is created. On success
    /// the connection is bound to the room and the current snapshot is
    /// returned; on failure the connection stays where it was.
    pub async fn authenticate(
        &self,
        conn: ConnectionId,
        room_id: &RoomId,
        password_hash: &str,
        lifetime: Option<RoomLifetime>,
    ) -> Result<RoomSnapshot, RoomError> {
        if let Some(bound) = self.registry.bound_room(conn).await {
            if &bound != room_id {
                return Err(RoomError::Unauthorized);
            }
        }

        let room = self.get_or_create(room_id, password_hash, lifetime).await?;
        if !hashes_match(&room.password_hash, password_hash) {
            debug!(room = %room_id.short(), conn = %conn, "Credential mismatch");
            return Err(RoomError::AuthenticationFailed);
        }

        self.registry.bind(conn, room_id).await?;
        self.joined_snapshot(conn, room_id, password_hash).await
    }

    /// Re-read after joining so nothing committed in between is missed. The
    /// room may have been deleted and re-created under another credential
    /// meanwhile, so the hash is checked again against what was read.
    async fn joined_snapshot(
        &self,
        conn: ConnectionId,
        room_id: &RoomId,
        password_hash: &str,
    ) -> Result<RoomSnapshot, RoomError> {
        match self.store.get(room_id).await {
            Ok(room) if hashes_match(&room.password_hash, password_hash) => {
                Ok(room.into_snapshot())
            }
            Ok(_) => {
                debug!(room = %room_id.short(), conn = %conn, "Room re-created under another credential");
                self.registry.leave(conn).await;
                Err(RoomError::AuthenticationFailed)
            }
            Err(StoreError::NotFound) => {
                self.registry.dissolve(room_id).await;
                Err(RoomError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_or_create(
        &self,
        room_id: &RoomId,
        password_hash: &str,
        lifetime: Option<RoomLifetime>,
    ) -> Result<Room, RoomError> {
        match self.store.get(room_id).await {
            Ok(room) => return Ok(room),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let lifetime = self.config.resolve_lifetime(lifetime);
        let room = Room::new(room_id.clone(), password_hash.to_string(), lifetime, now());
        match self.store.create(room.clone()).await {
            Ok(()) => {
                info!(
                    room = %room_id.short(),
                    lifetime = %lifetime,
                    expires_at = %room.expires_at,
                    "Room created"
                );
                Ok(room)
            }
            // Lost the race to another first joiner; their room is the room.
            Err(StoreError::AlreadyExists) => Ok(self.store.get(room_id).await?),
            Err(e) => Err(e.into()),
        }
    }

    /// Check a credential without joining. Used by the upload endpoint.
    pub async fn verify_credential(
        &self,
        room_id: &RoomId,
        password_hash: &str,
    ) -> Result<(), RoomError> {
        let room = self.store.get(room_id).await?;
        if hashes_match(&room.password_hash, password_hash) {
            Ok(())
        } else {
            Err(RoomError::AuthenticationFailed)
        }
    }

    pub async fn add_note(
        &self,
        conn: ConnectionId,
        room_id: &RoomId,
        draft: NoteDraft,
    ) -> Result<Note, RoomError> {
        self.registry.authorize(conn, room_id).await?;

        let note = draft.stamp(now());
        match self.store.append_note(room_id, note.clone()).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => {
                return Err(RoomError::DuplicateId {
                    kind: ResourceKind::Note,
                    id: note.id,
                })
            }
            Err(e) => return Err(e.into()),
        }

        debug!(room = %room_id.short(), note = %note.id, "Note added");
        self.fanout
            .broadcast(room_id, ServerEvent::NoteAdded(note.clone()), Audience::Everyone)
            .await;
        Ok(note)
    }

    /// Replace a note's content. A note or room that vanished mid-edit is
    /// not an error: the update is dropped and `None` returned.
    pub async fn update_note(
        &self,
        conn: ConnectionId,
        room_id: &RoomId,
        note_id: &str,
        content: String,
    ) -> Result<Option<Note>, RoomError> {
        self.registry.authorize(conn, room_id).await?;

        let note = match self
            .store
            .update_note_content(room_id, note_id, content, now())
            .await
        {
            Ok(note) => note,
            Err(StoreError::NotFound) => {
                debug!(room = %room_id.short(), note = %note_id, "Update for missing note dropped");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        // The editor already shows its own keystrokes.
        self.fanout
            .broadcast(
                room_id,
                ServerEvent::NoteUpdated(NoteContent {
                    note_id: note.id.clone(),
                    content: note.content.clone(),
                }),
                Audience::AllExcept(conn),
            )
            .await;
        Ok(Some(note))
    }

    /// Idempotent: deleting an absent note still succeeds and still tells
    /// the room, so every view converges.
    pub async fn delete_note(
        &self,
        conn: ConnectionId,
        room_id: &RoomId,
        note_id: &str,
    ) -> Result<(), RoomError> {
        self.registry.authorize(conn, room_id).await?;

        let removed = self.store.remove_note(room_id, note_id).await?;
        debug!(room = %room_id.short(), note = %note_id, removed, "Note deleted");

        self.fanout
            .broadcast(
                room_id,
                ServerEvent::NoteDeleted(note_id.to_string()),
                Audience::Everyone,
            )
            .await;
        Ok(())
    }

    /// Record a file whose bytes are already stored.
    pub async fn add_file(&self, room_id: &RoomId, file: FileRef) -> Result<(), RoomError> {
        match self.store.append_file(room_id, file.clone()).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => {
                return Err(RoomError::DuplicateId {
                    kind: ResourceKind::File,
                    id: file.id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }

        info!(room = %room_id.short(), file = %file.id, size = file.size, "File added");
        self.fanout
            .broadcast(room_id, ServerEvent::FileAdded(file), Audience::Everyone)
            .await;
        Ok(())
    }

    /// Idempotent like [`RoomAuthority::delete_note`]. The bytes are
    /// reclaimed after the metadata is gone.
    pub async fn delete_file(
        &self,
        conn: ConnectionId,
        room_id: &RoomId,
        file_id: Uuid,
    ) -> Result<(), RoomError> {
        self.registry.authorize(conn, room_id).await?;

        let removed = match self.store.remove_file(room_id, file_id).await {
            Ok(file) => Some(file),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        self.fanout
            .broadcast(room_id, ServerEvent::FileDeleted(file_id), Audience::Everyone)
            .await;

        if let Some(file) = removed {
            self.blobs.reclaim_files(std::slice::from_ref(&file)).await;
            debug!(room = %room_id.short(), file = %file_id, "File deleted");
        }
        Ok(())
    }

    pub async fn delete_room(
        &self,
        conn: ConnectionId,
        room_id: &RoomId,
    ) -> Result<(), RoomError> {
        self.registry.authorize(conn, room_id).await?;

        let removed = self.store.delete(room_id).await?;
        self.close_room(room_id).await;

        if let Some(room) = removed {
            let reclaimed = self.blobs.reclaim_files(&room.files).await;
            info!(
                room = %room_id.short(),
                conn = %conn,
                files = room.files.len(),
                reclaimed,
                "Room deleted"
            );
        }
        Ok(())
    }

    /// Tell the members a room is gone and void their memberships.
    pub(crate) async fn close_room(&self, room_id: &RoomId) {
        self.fanout
            .broadcast(room_id, ServerEvent::RoomDeleted, Audience::Everyone)
            .await;
        self.registry.dissolve(room_id).await;
    }

    pub async fn test_connection(&self) -> ConnectionStatus {
        match self.store.ping().await {
            Ok(()) => ConnectionStatus {
                socket: LinkState::Connected,
                storage: LinkState::Connected,
                error: None,
            },
            Err(e) => {
                error!(error = %e, "Storage health check failed");
                ConnectionStatus {
                    socket: LinkState::Connected,
                    storage: LinkState::Failed,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Run one client command and send any direct replies to `conn`.
    pub async fn handle(&self, conn: ConnectionId, command: ClientCommand) {
        let name = command.name();
        let result = match command {
            ClientCommand::TestConnection => {
                let status = self.test_connection().await;
                self.fanout
                    .send(conn, ServerEvent::ConnectionStatus(status))
                    .await;
                Ok(())
            }
            ClientCommand::AuthenticateRoom(auth) => {
                self.handle_authenticate(conn, &auth.room_id, &auth.password_hash, auth.lifetime)
                    .await;
                Ok(())
            }
            ClientCommand::AddNote(cmd) => self.add_note(conn, &cmd.room_id, cmd.note).await.map(drop),
            ClientCommand::UpdateNote(cmd) => self
                .update_note(conn, &cmd.room_id, &cmd.note_id, cmd.content)
                .await
                .map(drop),
            ClientCommand::DeleteNote(cmd) => self.delete_note(conn, &cmd.room_id, &cmd.note_id).await,
            ClientCommand::DeleteFile(cmd) => self.delete_file(conn, &cmd.room_id, cmd.file_id).await,
            ClientCommand::DeleteRoom(cmd) => self.delete_room(conn, &cmd.room_id).await,
        };

        if let Err(err) = result {
            self.report(conn, name, err).await;
        }
    }

    async fn handle_authenticate(
        &self,
        conn: ConnectionId,
        room_id: &RoomId,
        password_hash: &str,
        lifetime: Option<RoomLifetime>,
    ) {
        match self.authenticate(conn, room_id, password_hash, lifetime).await {
            Ok(snapshot) => {
                let members = self.registry.member_count(room_id).await;
                info!(
                    room = %room_id.short(),
                    conn = %conn,
                    members,
                    notes = snapshot.text_notes.len(),
                    files = snapshot.files.len(),
                    "Authenticated"
                );
                self.fanout.send(conn, ServerEvent::AuthenticationSuccess).await;
                self.fanout.send(conn, ServerEvent::RoomData(snapshot)).await;
            }
            Err(RoomError::Unauthorized) => {
                self.report(conn, "authenticate-room", RoomError::Unauthorized)
                    .await;
            }
            Err(err) => {
                if !matches!(err, RoomError::AuthenticationFailed | RoomError::NotFound) {
                    error!(room = %room_id.short(), conn = %conn, error = %err, "Authentication failed on storage");
                }
                let message = auth_failure_message(&err);
                self.fanout
                    .send(conn, ServerEvent::AuthenticationFailed { message })
                    .await;
            }
        }
    }

    async fn report(&self, conn: ConnectionId, command: &'static str, err: RoomError) {
        if err.is_silent() {
            debug!(conn = %conn, command, "Target gone, command dropped");
            return;
        }

        let message = match &err {
            RoomError::Unauthorized => {
                warn!(conn = %conn, command, "Command outside joined room rejected");
                err.to_string()
            }
            RoomError::Storage(detail) => {
                error!(conn = %conn, command, error = %detail, "Storage failure");
                "Server error, please retry.".to_string()
            }
            _ => {
                debug!(conn = %conn, command, error = %err, "Command rejected");
                err.to_string()
            }
        };
        self.fanout.send(conn, ServerEvent::error(message)).await;
    }
}

/// What a refused joiner is told. A vanished room reads the same as a wrong
/// password.
fn auth_failure_message(err: &RoomError) -> String {
    match err {
        RoomError::AuthenticationFailed | RoomError::NotFound => {
            RoomError::AuthenticationFailed.to_string()
        }
        _ => "Server error during authentication.".to_string(),
    }
}

/// Compare credential hashes without leaking where they differ.
fn hashes_match(stored: &str, presented: &str) -> bool {
    let (stored, presented) = (stored.as_bytes(), presented.as_bytes());
    stored.len() == presented.len() && bool::from(stored.ct_eq(presented))
}
