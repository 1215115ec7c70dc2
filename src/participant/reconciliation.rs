//! Listener-side correction rules.
//!
//! Pure decisions over a snapshot, the offset-corrected authority time and
//! the local playhead; the listener task carries them out.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::storage::types::SessionSnapshot;

/// Drift tolerated on event-driven reconciliation.
pub const DRIFT_THRESHOLD_MS: u64 = 700;
/// Drift tolerated on the periodic safety-net pass.
pub const PERIODIC_DRIFT_THRESHOLD_MS: u64 = 1_800;
/// How long the autoplay probe waits before re-reading the playhead.
pub const AUTOPLAY_PROBE_DELAY: Duration = Duration::from_millis(1_200);
/// Minimum advance during the probe for playback to count as started.
pub const AUTOPLAY_MIN_ADVANCE_MS: u64 = 200;

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    Initial,
    Pushed,
    Periodic,
}

impl SyncReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncReason::Initial => "initial",
            SyncReason::Pushed => "pushed",
            SyncReason::Periodic => "periodic",
        }
    }
}

/// Where playback should be right now according to the snapshot.
///
/// Paused sessions stay at the stored position; playing ones are
/// extrapolated by the authority time elapsed since the write, never
/// backwards.
pub fn target_position_ms(snapshot: &SessionSnapshot, server_now: DateTime<Utc>) -> u64 {
    if !snapshot.playing {
        return snapshot.position_ms;
    }
    let elapsed = (server_now - snapshot.state_updated_at).num_milliseconds().max(0);
    snapshot
        .position_ms
        .saturating_add(u64::try_from(elapsed).unwrap_or(0))
}

pub fn drift_threshold_ms(reason: SyncReason) -> u64 {
    match reason {
        SyncReason::Periodic => PERIODIC_DRIFT_THRESHOLD_MS,
        SyncReason::Initial | SyncReason::Pushed => DRIFT_THRESHOLD_MS,
    }
}

/// Per-session autoplay bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoplayGate {
    /// The last probe saw the playhead stall after `play`.
    pub blocked: bool,
    /// The listener started playback by hand; disables both the gate and the probe.
    pub manually_started: bool,
    /// The one-shot probe has been spent.
    pub probe_done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackAction {
    Pause,
    /// Target is playing but autoplay is blocked; wait for a manual start.
    Hold,
    Play { probe: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub target_ms: u64,
    pub drift_ms: u64,
    pub host_offline: bool,
    /// Seek to `target_ms` before acting.
    pub seek: bool,
    pub action: PlaybackAction,
}

pub fn plan(
    snapshot: &SessionSnapshot,
    server_now: DateTime<Utc>,
    current_ms: u64,
    reason: SyncReason,
    gate: AutoplayGate,
) -> ReconcilePlan {
    let target_ms = target_position_ms(snapshot, server_now);
    let drift_ms = current_ms.abs_diff(target_ms);
    let host_offline = snapshot.host_offline_at(server_now);
    // a host that looks gone may be stale data; only the safety net may still yank playback
    let seek = drift_ms > drift_threshold_ms(reason)
        && (!host_offline || reason == SyncReason::Periodic);

    let action = if !snapshot.playing {
        PlaybackAction::Pause
    } else if gate.blocked && !gate.manually_started {
        PlaybackAction::Hold
    } else {
        PlaybackAction::Play {
            probe: reason != SyncReason::Periodic && !gate.manually_started && !gate.probe_done,
        }
    };

    ReconcilePlan {
        target_ms,
        drift_ms,
        host_offline,
        seek,
        action,
    }
}

/// Probe verdict: `true` when playback did not really start.
pub fn autoplay_blocked(before_ms: u64, after_ms: u64) -> bool {
    after_ms.saturating_sub(before_ms) < AUTOPLAY_MIN_ADVANCE_MS
}
