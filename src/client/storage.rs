// src/client/storage.rs
// Durable pending-call marker: the room id of an invite shown through the native call UI.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{error::CallError, types::RoomId};

/// Fixed storage key of the marker.
pub const PENDING_CALL_KEY: &str = "pendingCall";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCallMarker {
    pub room_id: RoomId,
}

/// Absence of a marker means no invite is pending.
#[async_trait]
pub trait PendingCallStore: Send + Sync {
    async fn save(&self, room_id: &str) -> Result<(), CallError>;
    async fn load(&self) -> Result<Option<RoomId>, CallError>;
    async fn clear(&self) -> Result<(), CallError>;
}

// ── File ──────────────────────────────────────────────────────────────────────

/// Marker kept as `<dir>/pendingCall.json`, so it survives a process restart.
#[derive(Debug, Clone)]
pub struct FilePendingCallStore {
    path: PathBuf,
}

impl FilePendingCallStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { path: dir.as_ref().join(format!("{PENDING_CALL_KEY}.json")) }
    }

    pub fn path(&self) -> &Path { &self.path }
}

#[async_trait]
impl PendingCallStore for FilePendingCallStore {
    async fn save(&self, room_id: &str) -> Result<(), CallError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_vec(&PendingCallMarker { room_id: room_id.to_owned() })?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<RoomId>, CallError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<PendingCallMarker>(&raw) {
            Ok(marker) => Ok(Some(marker.room_id)),
            Err(e) => {
                debug!("[store] unreadable marker ignored: {e}");
                Ok(None)
            }
        }
    }

    async fn clear(&self) -> Result<(), CallError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Memory ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryPendingCallStore {
    marker: Mutex<Option<RoomId>>,
}

impl MemoryPendingCallStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl PendingCallStore for MemoryPendingCallStore {
    async fn save(&self, room_id: &str) -> Result<(), CallError> {
        *self.marker.lock().await = Some(room_id.to_owned());
        Ok(())
    }

    async fn load(&self) -> Result<Option<RoomId>, CallError> {
        Ok(self.marker.lock().await.clone())
    }

    async fn clear(&self) -> Result<(), CallError> {
        *self.marker.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePendingCallStore::new(dir.path());

        assert_eq!(store.load().await.unwrap(), None);
        store.save("r1").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("r1"));

        // a second instance sees the same marker, as after a restart
        let reopened = FilePendingCallStore::new(dir.path());
        assert_eq!(reopened.load().await.unwrap().as_deref(), Some("r1"));

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_marker_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePendingCallStore::new(dir.path());
        tokio::fs::write(store.path(), b"not json").await.unwrap();

        assert_eq!(store.load().await.unwrap(), None);
    }
}
