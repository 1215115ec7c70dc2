use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authoritative session row, as persisted by a [`SessionStore`](super::storage_trait::SessionStore).
///
/// `authority_secret_hash` never leaves the authority: everything handed to
/// clients goes through [`SessionSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub track_url: String,
    pub authority_secret_hash: String,
    pub created_at: DateTime<Utc>,
    /// Last known playback intent
    pub playing: bool,
    /// Playback position as of `state_updated_at`
    pub position_ms: u64,
    /// Authority time of the last accepted state write
    pub state_updated_at: DateTime<Utc>,
    /// Authority time after which the host is considered offline
    pub authority_lease_expires_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Session {
    pub fn apply(&mut self, patch: &StatePatch) {
        self.playing = patch.playing;
        self.position_ms = patch.position_ms;
        self.state_updated_at = patch.state_updated_at;
        self.authority_lease_expires_at = patch.authority_lease_expires_at;
        self.last_error = patch.last_error.clone();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::from(self)
    }
}

/// Fields touched by an accepted state write. Everything else on the row is
/// immutable after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct StatePatch {
    pub playing: bool,
    pub position_ms: u64,
    pub state_updated_at: DateTime<Utc>,
    pub authority_lease_expires_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Public view of a session, served to every participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub track_url: String,
    pub created_at: DateTime<Utc>,
    pub playing: bool,
    pub position_ms: u64,
    pub state_updated_at: DateTime<Utc>,
    pub authority_lease_expires_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// `true` once authority time has passed the lease expiry.
    pub fn host_offline_at(&self, server_now: DateTime<Utc>) -> bool {
        server_now > self.authority_lease_expires_at
    }
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            track_url: session.track_url.clone(),
            created_at: session.created_at,
            playing: session.playing,
            position_ms: session.position_ms,
            state_updated_at: session.state_updated_at,
            authority_lease_expires_at: session.authority_lease_expires_at,
            last_error: session.last_error.clone(),
        }
    }
}
