//! In-memory session storage.
//!
//! Suitable for development, testing, and single-instance deployments.
//! Sessions are lost when the process restarts.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use log::{debug, error};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::notifier::ChangeNotifier;
use crate::storage::storage_trait::SessionStore;
use crate::storage::types::{Session, StatePatch};

#[derive(Default)]
pub struct MemoryStorage {
    sessions: RwLock<HashMap<Uuid, Session>>,
    notifier: ChangeNotifier,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of sessions currently stored.
    pub fn len(&self) -> usize {
        self.sessions.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemoryStorage {
    async fn insert(&self, session: &Session) -> Result<(), StorageError> {
        self.sessions
            .write()
            .map_err(|_| {
                error!("Session map lock poisoned");
                StorageError::WriteFailed
            })?
            .insert(session.id, session.clone());
        debug!("[{}] session stored in memory", session.id);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>, StorageError> {
        let sessions = self.sessions.read().map_err(|_| StorageError::ReadFailed)?;
        Ok(sessions.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, patch: &StatePatch) -> Result<Session, StorageError> {
        let mut sessions = self.sessions.write().map_err(|_| StorageError::WriteFailed)?;
        let session = sessions.get_mut(&id).ok_or(StorageError::NotFound)?;
        session.apply(patch);
        let committed = session.clone();
        // published under the lock so subscribers see commit order
        self.notifier.publish(&committed);
        Ok(committed)
    }

    fn subscribe(&self, id: Uuid) -> broadcast::Receiver<Session> {
        self.notifier.subscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn new_session() -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            track_url: "https://soundcloud.com/a/b".into(),
            authority_secret_hash: "hash".into(),
            created_at: now,
            playing: false,
            position_ms: 0,
            state_updated_at: now,
            authority_lease_expires_at: now + Duration::seconds(20),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn insert_get_update_and_notify() {
        let storage = MemoryStorage::new();
        let session = new_session();
        storage.insert(&session).await.unwrap();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get(session.id).await.unwrap(), Some(session.clone()));

        let mut rx = storage.subscribe(session.id);
        let now = Utc::now();
        let patch = StatePatch {
            playing: true,
            position_ms: 4_200,
            state_updated_at: now,
            authority_lease_expires_at: now + Duration::seconds(20),
            last_error: None,
        };
        let committed = storage.update(session.id, &patch).await.unwrap();
        assert!(committed.playing);
        assert_eq!(rx.recv().await.unwrap(), committed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_updates_are_pushed_in_commit_order() {
        let storage = std::sync::Arc::new(MemoryStorage::new());
        for round in 0..200u64 {
            let session = new_session();
            storage.insert(&session).await.unwrap();
            let mut rx = storage.subscribe(session.id);

            let writers: Vec<_> = (0..4u64)
                .map(|writer| {
                    let storage = storage.clone();
                    tokio::spawn(async move {
                        let now = Utc::now();
                        let patch = StatePatch {
                            playing: writer % 2 == 0,
                            position_ms: round * 10 + writer,
                            state_updated_at: now,
                            authority_lease_expires_at: now + Duration::seconds(20),
                            last_error: None,
                        };
                        storage.update(session.id, &patch).await.unwrap();
                    })
                })
                .collect();
            for writer in writers {
                writer.await.unwrap();
            }

            let mut last = None;
            for _ in 0..4 {
                last = Some(rx.recv().await.unwrap());
            }
            assert_eq!(last, storage.get(session.id).await.unwrap(), "round {}", round);
        }
    }

    #[tokio::test]
    async fn update_unknown_session_is_not_found() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let patch = StatePatch {
            playing: true,
            position_ms: 0,
            state_updated_at: now,
            authority_lease_expires_at: now,
            last_error: None,
        };
        assert_eq!(storage.update(Uuid::new_v4(), &patch).await, Err(StorageError::NotFound));
        assert_eq!(storage.get(Uuid::new_v4()).await.unwrap(), None);
    }
}
