use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::time::Instant;

/// A source of wall-clock time.
///
/// The authority stamps session writes with its own `Clock`; each client owns
/// a separate one and corrects it with an [`OffsetEstimator`](super::OffsetEstimator).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// The operating system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock time derived from the tokio monotonic clock.
///
/// Anchored to the system time at construction and then advanced by
/// `tokio::time::Instant`, so it follows paused/advanced time in tests. An
/// optional skew shifts the reported time to emulate a client whose clock
/// disagrees with the authority.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor_utc: DateTime<Utc>,
    anchor_instant: Instant,
    skew: Duration,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::with_skew(Duration::zero())
    }

    pub fn with_skew(skew: Duration) -> Self {
        Self {
            anchor_utc: Utc::now(),
            anchor_instant: Instant::now(),
            skew,
        }
    }

    /// A clock sharing this one's anchor, so the two disagree by exactly `skew`
    /// no matter how much tokio time passed in between.
    pub fn skewed(&self, skew: Duration) -> Self {
        Self {
            skew,
            ..self.clone()
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.anchor_instant);
        let elapsed = Duration::from_std(elapsed).unwrap_or_else(|_| Duration::zero());
        self.anchor_utc + elapsed + self.skew
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn set_ms(&self, ms: i64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.now_ms.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(ms).single().unwrap_or(DateTime::UNIX_EPOCH)
    }

    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_ms(250);
        assert_eq!(clock.now_ms(), 1_250);
        assert_eq!(clock.now().timestamp_millis(), 1_250);
        clock.set_ms(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn monotonic_clock_follows_tokio_time() {
        let clock = MonotonicClock::new();
        let before = clock.now_ms();
        tokio::time::advance(std::time::Duration::from_millis(3_000)).await;
        assert_eq!(clock.now_ms() - before, 3_000);
    }

    #[tokio::test(start_paused = true)]
    async fn skewed_clock_is_shifted() {
        let straight = MonotonicClock::new();
        let skewed = MonotonicClock::with_skew(Duration::milliseconds(-4_000));
        let delta = straight.now_ms() - skewed.now_ms();
        // both anchors are taken from the system clock a few microseconds apart
        assert!((3_990..=4_010).contains(&delta), "delta was {}", delta);
    }

    #[tokio::test(start_paused = true)]
    async fn derived_clock_keeps_the_anchor() {
        let base = MonotonicClock::new();
        tokio::time::advance(std::time::Duration::from_secs(60)).await;
        let derived = base.skewed(Duration::milliseconds(250));
        assert_eq!(derived.now_ms() - base.now_ms(), 250);
    }
}
