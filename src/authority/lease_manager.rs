//! Lease & Authority Manager
//!
//! The only component that mutates session state. It creates sessions, hands
//! the authority credential out exactly once, and accepts state writes from
//! the holder of that credential. Every accepted write renews the host lease
//! for [`LEASE_DURATION_MS`]; there is no separate renewal message.
//!
//! Concurrent writers are not ordered: the store applies whatever arrives
//! last, regardless of when the host claims the event happened.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use regex::Regex;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::crypto::{credential_matches, generate_credential, hash_credential};
use super::types::{clamp_position, AppliedState, CreatedSession, StateRequest, LEASE_DURATION_MS};
use crate::clock::Clock;
use crate::configuration::types::ServerConfig;
use crate::error_handling::types::SyncError;
use crate::storage::storage_trait::SessionStore;
use crate::storage::types::{Session, SessionSnapshot, StatePatch};

static TRACK_URL: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?i)^https?://(?:[^/?#@]*@)?([^/?#:]+)(?::\d+)?(?:[/?#].*)?$")
        .expect("track URL pattern is valid")
});

pub struct AuthorityManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    secret_pepper: String,
    track_host: String,
}

impl AuthorityManager {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>, config: &ServerConfig) -> Self {
        Self {
            store,
            clock,
            secret_pepper: config.secret_pepper.clone(),
            track_host: config.track_host.to_ascii_lowercase(),
        }
    }

    /// Authority time, served to clients for offset estimation.
    pub fn server_time(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Accepts an absolute http(s) URL whose host contains the configured track host.
    pub fn validate_track_url(&self, raw: &str) -> Result<String, SyncError> {
        let trimmed = raw.trim();
        let host = TRACK_URL
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_ascii_lowercase());
        match host {
            Some(host) if host.contains(&self.track_host) => Ok(trimmed.to_string()),
            _ => Err(SyncError::InvalidState("Invalid track URL".to_string())),
        }
    }

    /// Creates a paused session at position 0 and returns its links.
    ///
    /// The credential exists in plaintext only in the returned value; the
    /// store keeps its peppered hash.
    pub async fn create_session(
        &self,
        track_url: &str,
        base_url: &str,
    ) -> Result<CreatedSession, SyncError> {
        let track_url = self.validate_track_url(track_url)?;
        let credential = generate_credential();
        let now = self.clock.now();

        let session = Session {
            id: Uuid::new_v4(),
            track_url,
            authority_secret_hash: hash_credential(credential.expose_secret(), &self.secret_pepper),
            created_at: now,
            playing: false,
            position_ms: 0,
            state_updated_at: now,
            authority_lease_expires_at: now + Duration::milliseconds(LEASE_DURATION_MS),
            last_error: None,
        };
        self.store.insert(&session).await?;
        info!("[{}] session created for {}", session.id, session.track_url);

        let base_url = base_url.trim_end_matches('/');
        let listener_url = format!("{}/session/{}", base_url, session.id);
        Ok(CreatedSession {
            session_id: session.id,
            session_url_host: format!("{}#host={}", listener_url, credential.expose_secret()),
            session_url_listener: listener_url,
            host_secret: credential,
        })
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<SessionSnapshot, SyncError> {
        self.store
            .get(session_id)
            .await?
            .map(|session| session.snapshot())
            .ok_or(SyncError::NotFound)
    }

    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<Session> {
        self.store.subscribe(session_id)
    }

    /// Validates the authority credential and persists the requested state.
    ///
    /// - `NotFound` if the session does not exist.
    /// - `Unauthorized` if the credential is absent or its hash does not
    ///   match; the session is left untouched.
    /// - Otherwise stores `playing`, the clamped position, `state_updated_at = now`
    ///   and `authority_lease_expires_at = now + 20s`, clears `last_error`, and
    ///   returns `now`.
    pub async fn validate_and_apply(
        &self,
        session_id: Uuid,
        credential: Option<&str>,
        request: StateRequest,
    ) -> Result<AppliedState, SyncError> {
        let session = self.store.get(session_id).await?.ok_or(SyncError::NotFound)?;

        let authorized = credential
            .map(|c| credential_matches(c, &session.authority_secret_hash, &self.secret_pepper))
            .unwrap_or(false);
        if !authorized {
            warn!("[{}] state write rejected: bad authority credential", session_id);
            return Err(SyncError::Unauthorized);
        }

        let now = self.clock.now();
        let patch = StatePatch {
            playing: request.playing,
            position_ms: clamp_position(request.position_ms),
            state_updated_at: now,
            authority_lease_expires_at: now + Duration::milliseconds(LEASE_DURATION_MS),
            last_error: None,
        };
        let committed = self.store.update(session_id, &patch).await?;
        debug!(
            "[{}] {:?} applied: playing={} position={}ms",
            session_id, request.action, committed.playing, committed.position_ms
        );

        Ok(AppliedState {
            session: committed.snapshot(),
            server_time: now,
        })
    }
}
