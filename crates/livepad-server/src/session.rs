//! Session registry: which connection is joined to which room.
//!
//! A connection is bound to at most one room, once. The binding only goes
//! away when the connection closes or the room itself is deleted. Each
//! session owns the sending half of its connection's outbound event queue;
//! fan-out goes through here to reach it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use livepad_shared::protocol::ServerEvent;
use livepad_shared::types::{ConnectionId, RoomId};
use livepad_shared::RoomError;

pub type EventSender = mpsc::Sender<Arc<ServerEvent>>;
pub type EventReceiver = mpsc::Receiver<Arc<ServerEvent>>;

struct Session {
    room: Option<RoomId>,
    tx: EventSender,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<ConnectionId, Session>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl Registry {
    fn drop_member(&mut self, room: &RoomId, conn: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&conn);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
        debug!(room = %room.short(), conn = %conn, "Connection left room");
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Registry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, unauthenticated connection. Returns its id and the
    /// receiver its writer task drains.
    pub async fn connect(&self, capacity: usize) -> (ConnectionId, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ConnectionId::new();
        self.inner
            .write()
            .await
            .sessions
            .insert(conn, Session { room: None, tx });

        debug!(conn = %conn, "Connection registered");
        (conn, rx)
    }

    /// Bind `conn` to `room` and add it to the room's broadcast group.
    ///
    /// Binding the same room again is a no-op. A connection already bound
    /// elsewhere, or one that is no longer registered, is `Unauthorized`.
    pub async fn bind(&self, conn: ConnectionId, room: &RoomId) -> Result<(), RoomError> {
        let mut inner = self.inner.write().await;

        let session = inner.sessions.get_mut(&conn).ok_or(RoomError::Unauthorized)?;
        match &session.room {
            Some(bound) if bound == room => return Ok(()),
            Some(_) => return Err(RoomError::Unauthorized),
            None => session.room = Some(room.clone()),
        }

        let members = inner.rooms.entry(room.clone()).or_default();
        members.insert(conn);

        info!(
            room = %room.short(),
            conn = %conn,
            members = members.len(),
            "Connection joined room"
        );
        Ok(())
    }

    pub async fn bound_room(&self, conn: ConnectionId) -> Option<RoomId> {
        self.inner
            .read()
            .await
            .sessions
            .get(&conn)
            .and_then(|s| s.room.clone())
    }

    /// `Ok` only if `conn` is joined to exactly `room`.
    pub async fn authorize(&self, conn: ConnectionId, room: &RoomId) -> Result<(), RoomError> {
        match self.bound_room(conn).await {
            Some(bound) if &bound == room => Ok(()),
            _ => Err(RoomError::Unauthorized),
        }
    }

    /// Forget a closed connection. Room lifetime is not affected, even if
    /// this was the last member.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let mut inner = self.inner.write().await;
        if let Some(room) = inner.sessions.remove(&conn).and_then(|s| s.room) {
            inner.drop_member(&room, conn);
        }
    }

    /// Undo a binding while keeping the connection registered. It may then
    /// join again.
    pub async fn leave(&self, conn: ConnectionId) {
        let mut inner = self.inner.write().await;
        if let Some(room) = inner.sessions.get_mut(&conn).and_then(|s| s.room.take()) {
            inner.drop_member(&room, conn);
        }
    }

    /// Void every membership of a deleted room. The affected connections go
    /// back to unauthenticated and may join again. Returns who was removed.
    pub async fn dissolve(&self, room: &RoomId) -> Vec<ConnectionId> {
        let mut inner = self.inner.write().await;
        let members: Vec<ConnectionId> = inner
            .rooms
            .remove(room)
            .map(|m| m.into_iter().collect())
            .unwrap_or_default();

        for conn in &members {
            if let Some(session) = inner.sessions.get_mut(conn) {
                session.room = None;
            }
        }

        if !members.is_empty() {
            info!(room = %room.short(), members = members.len(), "Room memberships voided");
        }
        members
    }

    pub async fn member_count(&self, room: &RoomId) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Senders of every member of `room` except `skip`.
    pub(crate) async fn room_senders(
        &self,
        room: &RoomId,
        skip: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, EventSender)> {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room) else {
            return Vec::new();
        };

        members
            .iter()
            .filter(|conn| Some(**conn) != skip)
            .filter_map(|conn| inner.sessions.get(conn).map(|s| (*conn, s.tx.clone())))
            .collect()
    }

    pub(crate) async fn sender(&self, conn: ConnectionId) -> Option<EventSender> {
        self.inner
            .read()
            .await
            .sessions
            .get(&conn)
            .map(|s| s.tx.clone())
    }
}
