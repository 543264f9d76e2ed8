//! On-disk storage for uploaded file payloads.
//!
//! Payloads arrive already encrypted by the client and are kept as opaque
//! bytes, one file per payload, named after a random id. The store hands out
//! a locator (`/files/<id>`) that ends up in the room's file metadata; that
//! locator is the only link between a `FileRef` and its bytes.

use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use livepad_shared::constants::FILE_LOCATOR_PREFIX;
use livepad_shared::types::FileRef;

use crate::error::ServerError;

#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    max_size: usize,
}

impl BlobStore {
    pub async fn new(root: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        if let Err(e) = fs::create_dir_all(&root).await {
            return Err(ServerError::BlobStorage(format!(
                "cannot create {}: {e}",
                root.display()
            )));
        }
        info!(root = %root.display(), max_size, "Upload storage ready");
        Ok(Self { root, max_size })
    }

    /// Locator for a stored payload, as recorded in `FileRef::url`.
    pub fn locator(id: Uuid) -> String {
        format!("{FILE_LOCATOR_PREFIX}{id}")
    }

    /// Inverse of [`BlobStore::locator`]. `None` for anything we did not mint.
    pub fn resolve(locator: &str) -> Option<Uuid> {
        let id = locator.strip_prefix(FILE_LOCATOR_PREFIX)?;
        Uuid::parse_str(id).ok()
    }

    // A uuid renders as plain hex and dashes, so it cannot leave `root`.
    fn path_of(&self, id: Uuid) -> PathBuf {
        self.root.join(id.as_hyphenated().to_string())
    }

    /// Write a new payload and return its id.
    pub async fn put(&self, bytes: &[u8]) -> Result<Uuid, ServerError> {
        match bytes.len() {
            0 => return Err(ServerError::BadRequest("Empty file".to_string())),
            size if size > self.max_size => {
                return Err(ServerError::BlobTooLarge {
                    size,
                    max: self.max_size,
                })
            }
            _ => {}
        }

        let id = Uuid::new_v4();
        fs::write(self.path_of(id), bytes)
            .await
            .map_err(|e| ServerError::BlobStorage(format!("write {id}: {e}")))?;

        debug!(blob = %id, size = bytes.len(), "Payload written");
        Ok(id)
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Vec<u8>, ServerError> {
        fs::read(self.path_of(id)).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ServerError::BlobNotFound(id),
            _ => ServerError::BlobStorage(format!("read {id}: {e}")),
        })
    }

    /// Remove a payload. One that is already gone counts as removed.
    pub async fn remove(&self, id: Uuid) -> Result<(), ServerError> {
        match fs::remove_file(self.path_of(id)).await {
            Ok(()) => {
                debug!(blob = %id, "Payload removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServerError::BlobStorage(format!("remove {id}: {e}"))),
        }
    }

    /// Best-effort reclaim of the bytes behind each file. Failures are logged
    /// and skipped; metadata removal never waits on this. Returns how many
    /// payloads are now gone.
    pub async fn reclaim_files(&self, files: &[FileRef]) -> usize {
        let mut reclaimed = 0;
        for file in files {
            let Some(id) = Self::resolve(&file.url) else {
                warn!(file = %file.id, "File has no payload locator, nothing to reclaim");
                continue;
            };
            match self.remove(id).await {
                Ok(()) => reclaimed += 1,
                Err(e) => warn!(file = %file.id, error = %e, "Could not reclaim file bytes"),
            }
        }
        reclaimed
    }
}
