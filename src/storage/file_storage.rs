use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::notifier::ChangeNotifier;
use crate::storage::storage_trait::SessionStore;
use crate::storage::types::{Session, StatePatch};

/// Filesystem-backed store: one JSON document per session under `<base>/sessions`.
pub struct FileStorage {
    base_path: PathBuf,
    write_lock: Mutex<()>,
    notifier: ChangeNotifier,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let sessions_dir = base_path.join("sessions");
        fs::create_dir_all(&sessions_dir).map_err(|e| { error!("Failed to create sessions dir {}: {}", sessions_dir.display(), e); StorageError::WriteFailed })?;
        info!("FileStorage initialized at {}", base_path.display());

        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
            notifier: ChangeNotifier::new(),
        })
    }

    /// Construct FileStorage using env var RADIO_SYNC_STORAGE_DIR if set, otherwise current directory.
    pub fn new_default() -> Result<Self, StorageError> {
        if let Ok(dir) = std::env::var("RADIO_SYNC_STORAGE_DIR") {
            info!("Using FileStorage from RADIO_SYNC_STORAGE_DIR: {}", dir);
            return Self::new(PathBuf::from(dir));
        }
        let cwd = std::env::current_dir().map_err(|e| { error!("Failed to get current dir: {}", e); StorageError::ReadFailed })?;
        info!("Using FileStorage at current directory: {}", cwd.display());
        Self::new(cwd)
    }

    fn sessions_dir(&self) -> PathBuf { self.base_path.join("sessions") }

    fn session_file_path(&self, id: Uuid) -> PathBuf { self.sessions_dir().join(format!("{}.json", id)) }

    fn write_session_file(&self, session: &Session) -> Result<(), StorageError> {
        let path = self.session_file_path(session.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(session).map_err(|e| { error!("Failed to encode session {}: {}", session.id, e); StorageError::WriteFailed })?;
        let mut f = File::create(&tmp).map_err(|e| { error!("Failed to create session file {}: {}", tmp.display(), e); StorageError::WriteFailed })?;
        f.write_all(&body).map_err(|e| { error!("Failed to write session file {}: {}", tmp.display(), e); StorageError::WriteFailed })?;
        // rename keeps readers from ever seeing a half-written document
        fs::rename(&tmp, &path).map_err(|e| { error!("Failed to move session file into place {}: {}", path.display(), e); StorageError::WriteFailed })?;
        debug!("Saved session {} to {}", session.id, path.display());
        Ok(())
    }

    fn read_session_file(&self, id: Uuid) -> Result<Option<Session>, StorageError> {
        let path = self.session_file_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let mut content = String::new();
        File::open(&path).and_then(|mut f| f.read_to_string(&mut content)).map_err(|e| { error!("Failed to read session file {}: {}", path.display(), e); StorageError::ReadFailed })?;
        let session = serde_json::from_str(&content).map_err(|e| { error!("Invalid session file {}: {}", path.display(), e); StorageError::ReadFailed })?;
        Ok(Some(session))
    }
}

#[async_trait]
impl SessionStore for FileStorage {
    async fn insert(&self, session: &Session) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::WriteFailed)?;
        self.write_session_file(session)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>, StorageError> {
        self.read_session_file(id)
    }

    async fn update(&self, id: Uuid, patch: &StatePatch) -> Result<Session, StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::WriteFailed)?;
        let mut session = self.read_session_file(id)?.ok_or(StorageError::NotFound)?;
        session.apply(patch);
        self.write_session_file(&session)?;
        self.notifier.publish(&session);
        Ok(session)
    }

    fn subscribe(&self, id: Uuid) -> broadcast::Receiver<Session> {
        self.notifier.subscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serial_test::serial;
    use tempfile::TempDir;

    fn new_session() -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            track_url: "https://soundcloud.com/artist/track".into(),
            authority_secret_hash: "deadbeef".into(),
            created_at: now,
            playing: false,
            position_ms: 0,
            state_updated_at: now,
            authority_lease_expires_at: now + Duration::seconds(20),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_get_session() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let session = new_session();
        storage.insert(&session).await.unwrap();

        let loaded = storage.get(session.id).await.unwrap();
        assert_eq!(loaded, Some(session));
        assert_eq!(storage.get(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let session = new_session();
        {
            let storage = FileStorage::new(dir.path()).unwrap();
            storage.insert(&session).await.unwrap();
            let now = Utc::now();
            storage
                .update(
                    session.id,
                    &StatePatch {
                        playing: true,
                        position_ms: 90_000,
                        state_updated_at: now,
                        authority_lease_expires_at: now + Duration::seconds(20),
                        last_error: None,
                    },
                )
                .await
                .unwrap();
        }
        let reopened = FileStorage::new(dir.path()).unwrap();
        let loaded = reopened.get(session.id).await.unwrap().unwrap();
        assert!(loaded.playing);
        assert_eq!(loaded.position_ms, 90_000);
    }

    #[tokio::test]
    async fn test_update_missing_session() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let now = Utc::now();
        let patch = StatePatch {
            playing: false,
            position_ms: 0,
            state_updated_at: now,
            authority_lease_expires_at: now,
            last_error: None,
        };
        assert_eq!(storage.update(Uuid::new_v4(), &patch).await, Err(StorageError::NotFound));
    }

    #[test]
    #[serial]
    fn test_new_default_uses_env_dir() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("RADIO_SYNC_STORAGE_DIR", dir.path());
        let storage = FileStorage::new_default();
        std::env::remove_var("RADIO_SYNC_STORAGE_DIR");
        assert!(storage.is_ok());
        assert!(dir.path().join("sessions").is_dir());
    }
}
