//! Authority clock offset estimation.
//!
//! A client never trusts its own clock when extrapolating playback: it keeps an
//! offset such that `server_now = local_now + offset`, measured from one request
//! round trip and assuming the request and the response took equally long.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::debug;

use super::source::Clock;
use crate::client::api::SyncApi;

/// Offset to add to local time to approximate authority time.
///
/// `t0` is the local dispatch time, `t_server` the authority time carried by the
/// response and `t1` the local receipt time, all in epoch milliseconds.
pub fn compute_offset(t0: i64, t_server: i64, t1: i64) -> i64 {
    t_server + (t1 - t0) / 2 - t1
}

/// Per-client offset estimate. Starts at 0 and is only replaced by a
/// successful measurement.
pub struct OffsetEstimator {
    clock: Arc<dyn Clock>,
    offset_ms: AtomicI64,
}

impl OffsetEstimator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            offset_ms: AtomicI64::new(0),
        }
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::SeqCst)
    }

    pub fn local_now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Local time corrected by the current offset.
    pub fn server_now(&self) -> DateTime<Utc> {
        self.clock.now() + Duration::milliseconds(self.offset_ms())
    }

    /// Queries the authority clock once. No retry: a failure leaves the
    /// previous offset in effect and returns `None`.
    pub async fn estimate(&self, api: &dyn SyncApi) -> Option<i64> {
        let t0 = self.clock.now_ms();
        match api.server_time().await {
            Ok(server_time) => {
                let t1 = self.clock.now_ms();
                Some(self.record_round_trip(t0, server_time, t1))
            }
            Err(e) => {
                debug!("Clock offset estimate failed, keeping {}ms: {}", self.offset_ms(), e);
                None
            }
        }
    }

    /// Folds in any round trip whose response carried an authority timestamp,
    /// such as an accepted state write.
    pub fn record_round_trip(&self, t0: i64, server_time: DateTime<Utc>, t1: i64) -> i64 {
        let offset = compute_offset(t0, server_time.timestamp_millis(), t1);
        self.offset_ms.store(offset, Ordering::SeqCst);
        debug!("Clock offset now {}ms (round trip {}ms)", offset, t1 - t0);
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::source::ManualClock;
    use chrono::TimeZone;

    #[test]
    fn symmetric_round_trip_without_skew_gives_zero() {
        assert_eq!(compute_offset(1_000, 1_050, 1_100), 0);
    }

    #[test]
    fn authority_ahead_gives_positive_offset() {
        // authority is 5s ahead, 200ms round trip
        assert_eq!(compute_offset(1_000, 6_100, 1_200), 5_000);
        assert_eq!(compute_offset(1_000, -3_900, 1_200), -5_000);
    }

    #[test]
    fn server_now_applies_offset() {
        let clock = Arc::new(ManualClock::new(1_000));
        let estimator = OffsetEstimator::new(clock.clone());
        assert_eq!(estimator.server_now().timestamp_millis(), 1_000);

        clock.set_ms(1_100);
        let server_time = Utc.timestamp_millis_opt(1_050).unwrap();
        assert_eq!(estimator.record_round_trip(1_000, server_time, 1_100), 0);
        assert_eq!(estimator.server_now().timestamp_millis(), clock.now_ms());

        let ahead = Utc.timestamp_millis_opt(3_050).unwrap();
        estimator.record_round_trip(1_000, ahead, 1_100);
        assert_eq!(estimator.offset_ms(), 2_000);
        assert_eq!(estimator.server_now().timestamp_millis(), 3_100);
    }
}
