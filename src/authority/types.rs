use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::crypto::SecretString;
use crate::error_handling::types::SyncError;
use crate::storage::types::SessionSnapshot;

/// Lease granted by every accepted state write.
pub const LEASE_DURATION_MS: i64 = 20_000;

/// Why the host sent a state write. Informational only: every accepted
/// write renews the lease the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HostAction {
    Play,
    Pause,
    Seek,
    Heartbeat,
}

/// A decoded state write.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRequest {
    pub action: Option<HostAction>,
    pub playing: bool,
    /// Raw reported position, clamped on apply.
    pub position_ms: f64,
}

/// State write as it travels on the wire. Fields are optional so that a
/// missing one is reported as `InvalidState` instead of a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<HostAction>,
    #[serde(default)]
    pub playing: Option<bool>,
    #[serde(default, deserialize_with = "lenient_position")]
    pub position_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_sent_at_ms: Option<i64>,
}

/// Accepts any JSON number. Literals beyond the `f64` range such as `1e400`
/// decode as infinite so `clamp_position` can turn them into 0.
fn lenient_position<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number: Option<serde_json::Number> = Option::deserialize(deserializer)?;
    Ok(number.map(|n| match n.as_f64() {
        Some(value) => value,
        None => n.to_string().parse::<f64>().unwrap_or(f64::INFINITY),
    }))
}

impl StatePayload {
    pub fn into_request(self) -> Result<StateRequest, SyncError> {
        match (self.playing, self.position_ms) {
            (Some(playing), Some(position_ms)) => Ok(StateRequest {
                action: self.action,
                playing,
                position_ms,
            }),
            _ => Err(SyncError::InvalidState("Invalid payload".to_string())),
        }
    }
}

/// Result of an accepted write; `server_time` lets the writer recalibrate its clock offset.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedState {
    pub session: SessionSnapshot,
    pub server_time: DateTime<Utc>,
}

/// Everything the creator of a session receives, exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session_id: Uuid,
    pub host_secret: SecretString,
    pub session_url_host: String,
    pub session_url_listener: String,
}

/// Floors a reported position to a non-negative integer; anything non-finite becomes 0.
pub fn clamp_position(raw: f64) -> u64 {
    if !raw.is_finite() {
        return 0;
    }
    // float to int casts saturate
    raw.floor().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_floors_and_never_goes_negative() {
        assert_eq!(clamp_position(1234.9), 1234);
        assert_eq!(clamp_position(0.0), 0);
        assert_eq!(clamp_position(-0.5), 0);
        assert_eq!(clamp_position(-5000.0), 0);
        assert_eq!(clamp_position(f64::NAN), 0);
        assert_eq!(clamp_position(f64::INFINITY), 0);
        assert_eq!(clamp_position(f64::NEG_INFINITY), 0);
        assert_eq!(clamp_position(1e30), u64::MAX);
    }

    #[test]
    fn out_of_range_position_decodes_as_infinite() {
        for raw in ["1e400", "-1e400"] {
            let body = format!(r#"{{"action":"SEEK","playing":true,"position_ms":{}}}"#, raw);
            let payload: StatePayload = serde_json::from_str(&body).unwrap();
            let request = payload.into_request().unwrap();
            assert!(request.position_ms.is_infinite());
            assert_eq!(clamp_position(request.position_ms), 0);
        }

        let null: StatePayload =
            serde_json::from_str(r#"{"playing":true,"position_ms":null}"#).unwrap();
        assert!(matches!(null.into_request(), Err(SyncError::InvalidState(_))));
    }

    #[test]
    fn payload_requires_playing_and_position() {
        let ok: StatePayload =
            serde_json::from_str(r#"{"action":"SEEK","playing":true,"position_ms":12.5}"#).unwrap();
        let request = ok.into_request().unwrap();
        assert_eq!(request.action, Some(HostAction::Seek));
        assert!(request.playing);
        assert_eq!(request.position_ms, 12.5);

        let integer: StatePayload =
            serde_json::from_str(r#"{"playing":false,"position_ms":5000}"#).unwrap();
        assert_eq!(integer.into_request().unwrap().position_ms, 5000.0);

        let missing: StatePayload = serde_json::from_str(r#"{"playing":true}"#).unwrap();
        assert!(matches!(missing.into_request(), Err(SyncError::InvalidState(_))));
    }

    #[test]
    fn actions_use_uppercase_names() {
        assert_eq!(serde_json::to_string(&HostAction::Heartbeat).unwrap(), "\"HEARTBEAT\"");
        assert_eq!(serde_json::from_str::<HostAction>("\"PLAY\"").unwrap(), HostAction::Play);
    }
}
