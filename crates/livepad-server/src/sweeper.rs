//! Periodic eviction of expired rooms.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use livepad_shared::types::now;

use crate::authority::RoomAuthority;

pub struct ExpirySweeper {
    authority: Arc<RoomAuthority>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(authority: Arc<RoomAuthority>, interval: Duration) -> Self {
        Self {
            authority,
            interval,
        }
    }

    /// Run forever. The first pass happens immediately so rooms that expired
    /// while the server was down do not wait a full period.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep_once(now()).await;
            }
        })
    }

    /// One pass over every room expired at `now`. Returns how many rooms
    /// were removed.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        let store = self.authority.store();
        let blobs = self.authority.blobs();

        let expired = match store.list_expired(now).await {
            Ok(rooms) => rooms,
            Err(e) => {
                error!(error = %e, "Could not list expired rooms");
                return 0;
            }
        };
        if expired.is_empty() {
            debug!("Sweep found no expired rooms");
            return 0;
        }

        let mut removed = 0;
        for room in expired {
            blobs.reclaim_files(&room.files).await;

            match store.delete_if_expired(&room.id, now).await {
                Ok(Some(last)) => {
                    // Files appended after the listing.
                    let stragglers: Vec<_> = last
                        .files
                        .into_iter()
                        .filter(|f| !room.files.iter().any(|seen| seen.id == f.id))
                        .collect();
                    blobs.reclaim_files(&stragglers).await;

                    self.authority.close_room(&room.id).await;
                    removed += 1;
                    debug!(room = %room.id.short(), "Expired room removed");
                }
                Ok(None) => {
                    debug!(room = %room.id.short(), "Room already gone before sweep");
                }
                Err(e) => {
                    error!(room = %room.id.short(), error = %e, "Could not delete expired room");
                }
            }
        }

        info!(removed, "Expiry sweep finished");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use livepad_shared::protocol::ServerEvent;
    use livepad_shared::types::{FileRef, Room, RoomLifetime};
    use uuid::Uuid;

    use crate::authority::tests::{authority, drain, join, room};
    use crate::blob_store::BlobStore;

    #[tokio::test]
    async fn expired_room_and_bytes_are_gone_after_one_pass() {
        let (authority, _dir) = authority().await;
        let (_conn, mut rx) = join(&authority, &room(1)).await;

        let blob = authority.blobs().put(b"secret").await.unwrap();
        let file = FileRef {
            id: Uuid::new_v4(),
            name: "enc".into(),
            url: BlobStore::locator(blob),
            mime_type: "application/octet-stream".into(),
            size: 6,
            created_at: now(),
        };
        authority.add_file(&room(1), file).await.unwrap();
        drain(&mut rx);

        let sweeper = ExpirySweeper::new(Arc::clone(&authority), Duration::from_secs(3600));
        let later = now() + ChronoDuration::days(2);
        assert_eq!(sweeper.sweep_once(later).await, 1);

        assert!(authority.store().get(&room(1)).await.is_err());
        assert!(authority.blobs().fetch(blob).await.is_err());
        assert_eq!(drain(&mut rx), vec![ServerEvent::RoomDeleted]);
        assert_eq!(authority.registry().member_count(&room(1)).await, 0);
    }

    #[tokio::test]
    async fn fresh_rooms_survive() {
        let (authority, _dir) = authority().await;
        let created = now();
        authority
            .store()
            .create(Room::new(room(1), "h".into(), RoomLifetime::ThreeHours, created))
            .await
            .unwrap();
        authority
            .store()
            .create(Room::new(room(2), "h".into(), RoomLifetime::ThirtyDays, created))
            .await
            .unwrap();

        let sweeper = ExpirySweeper::new(Arc::clone(&authority), Duration::from_secs(3600));
        assert_eq!(sweeper.sweep_once(created + ChronoDuration::days(1)).await, 1);

        assert!(authority.store().get(&room(1)).await.is_err());
        assert!(authority.store().get(&room(2)).await.is_ok());
    }

    #[tokio::test]
    async fn room_expiring_exactly_now_is_swept() {
        let (authority, _dir) = authority().await;
        let created = now();
        let doc = Room::new(room(3), "h".into(), RoomLifetime::ThreeHours, created);
        let expires_at = doc.expires_at;
        authority.store().create(doc).await.unwrap();

        let sweeper = ExpirySweeper::new(Arc::clone(&authority), Duration::from_secs(3600));
        assert_eq!(sweeper.sweep_once(expires_at).await, 1);
    }
}
