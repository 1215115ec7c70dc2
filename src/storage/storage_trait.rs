//! Session State Store trait
//!
//! This module defines the `SessionStore` trait, the authoritative keyed record
//! of every session.
//!
//! Implementors of this trait are responsible for:
//! - Persisting newly created sessions
//! - Returning the current row for a session id
//! - Applying state patches, last writer wins by arrival order
//! - Notifying subscribers with the full row after every committed update
//!
//! All methods return a `Result` to handle potential storage errors.

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::types::{Session, StatePatch};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a freshly created session.
    async fn insert(&self, session: &Session) -> Result<(), StorageError>;

    /// Returns the row for `id`, or `None` if no such session exists.
    async fn get(&self, id: Uuid) -> Result<Option<Session>, StorageError>;

    /// Applies `patch` and returns the committed row.
    ///
    /// Fails with `StorageError::NotFound` if the session does not exist.
    async fn update(&self, id: Uuid, patch: &StatePatch) -> Result<Session, StorageError>;

    /// Subscribes to the committed rows of session `id`.
    fn subscribe(&self, id: Uuid) -> broadcast::Receiver<Session>;
}
