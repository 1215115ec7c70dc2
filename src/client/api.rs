use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::authority::crypto::SecretString;
use crate::authority::types::{CreatedSession, StatePayload};
use crate::error_handling::types::SyncError;
use crate::storage::types::SessionSnapshot;

/// What a participant can ask of the authority.
///
/// Every failure is reported through the [`SyncError`] taxonomy so host and
/// listener logic does not care whether the authority is in-process or remote.
#[async_trait]
pub trait SyncApi: Send + Sync {
    /// Creates a session; `track_url` is validated by the authority.
    async fn create_session(&self, track_url: &str) -> Result<CreatedSession, SyncError>;

    async fn fetch_session(&self, session_id: Uuid) -> Result<SessionSnapshot, SyncError>;

    /// Sends an authenticated state write and returns the authority time at
    /// which it was applied.
    async fn post_state(
        &self,
        session_id: Uuid,
        credential: &SecretString,
        payload: &StatePayload,
    ) -> Result<DateTime<Utc>, SyncError>;

    /// Current authority time, used for offset estimation.
    async fn server_time(&self) -> Result<DateTime<Utc>, SyncError>;

    /// Push notifications: one snapshot per committed store update. The stream
    /// ends when the underlying channel closes; delivery is best effort.
    async fn subscribe(
        &self,
        session_id: Uuid,
    ) -> Result<BoxStream<'static, SessionSnapshot>, SyncError>;
}
