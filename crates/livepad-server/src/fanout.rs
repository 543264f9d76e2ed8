use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use livepad_shared::protocol::ServerEvent;
use livepad_shared::types::{ConnectionId, RoomId};

use crate::session::SessionRegistry;

/// Who in a room receives an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every member, including the connection that caused the event.
    Everyone,
    /// Every member except the originating connection.
    AllExcept(ConnectionId),
}

/// Delivers events to the members of a room.
///
/// Delivery is fire-and-forget: a member whose queue is full or who is
/// mid-disconnect simply misses the event. Clients recover by re-joining,
/// which always sends a full snapshot.
#[derive(Clone)]
pub struct Fanout {
    registry: Arc<SessionRegistry>,
}

impl Fanout {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Send one event to the room. Returns how many members it was queued for.
    pub async fn broadcast(&self, room: &RoomId, event: ServerEvent, audience: Audience) -> usize {
        let skip = match audience {
            Audience::Everyone => None,
            Audience::AllExcept(origin) => Some(origin),
        };

        let targets = self.registry.room_senders(room, skip).await;
        let event = Arc::new(event);
        let mut delivered = 0;

        for (conn, tx) in targets {
            match tx.try_send(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(
                        room = %room.short(),
                        target = %conn,
                        event = event.name(),
                        "Dropping event for slow connection"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(room = %room.short(), target = %conn, "Target already closed");
                }
            }
        }

        delivered
    }

    /// Send an event to a single connection (replies, errors).
    pub async fn send(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let Some(tx) = self.registry.sender(conn).await else {
            return false;
        };
        tx.try_send(Arc::new(event)).is_ok()
    }
}
