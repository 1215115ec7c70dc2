use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use log::debug;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::api::SyncApi;
use crate::authority::crypto::SecretString;
use crate::authority::lease_manager::AuthorityManager;
use crate::authority::types::{CreatedSession, StatePayload};
use crate::error_handling::types::SyncError;
use crate::storage::types::SessionSnapshot;

/// Talks to an [`AuthorityManager`] living in the same process.
///
/// An optional one-way latency is slept before and after every call, which
/// lets tests reproduce the symmetric round trip the offset estimator assumes.
pub struct LocalApi {
    manager: Arc<AuthorityManager>,
    base_url: String,
    latency: Duration,
}

impl LocalApi {
    pub fn new(manager: Arc<AuthorityManager>, base_url: impl Into<String>) -> Self {
        Self {
            manager,
            base_url: base_url.into(),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, one_way: Duration) -> Self {
        self.latency = one_way;
        self
    }

    async fn hop(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl SyncApi for LocalApi {
    async fn create_session(&self, track_url: &str) -> Result<CreatedSession, SyncError> {
        self.hop().await;
        let created = self.manager.create_session(track_url, &self.base_url).await;
        self.hop().await;
        created
    }

    async fn fetch_session(&self, session_id: Uuid) -> Result<SessionSnapshot, SyncError> {
        self.hop().await;
        let snapshot = self.manager.get_session(session_id).await;
        self.hop().await;
        snapshot
    }

    async fn post_state(
        &self,
        session_id: Uuid,
        credential: &SecretString,
        payload: &StatePayload,
    ) -> Result<DateTime<Utc>, SyncError> {
        self.hop().await;
        let request = payload.clone().into_request()?;
        let applied = self
            .manager
            .validate_and_apply(session_id, Some(credential.expose_secret()), request)
            .await;
        self.hop().await;
        applied.map(|applied| applied.server_time)
    }

    async fn server_time(&self) -> Result<DateTime<Utc>, SyncError> {
        self.hop().await;
        let now = self.manager.server_time();
        self.hop().await;
        Ok(now)
    }

    async fn subscribe(
        &self,
        session_id: Uuid,
    ) -> Result<BoxStream<'static, SessionSnapshot>, SyncError> {
        self.manager.get_session(session_id).await?;
        let receiver = self.manager.subscribe(session_id);
        let stream = BroadcastStream::new(receiver).filter_map(move |item| async move {
            match item {
                Ok(session) => Some(session.snapshot()),
                Err(e) => {
                    // lagged receivers skip ahead, the periodic poll covers the gap
                    debug!("[{}] push notification dropped: {}", session_id, e);
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
