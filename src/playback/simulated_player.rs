//! A player that keeps time on the tokio clock.
//!
//! Stands in for the embedded audio widget in tests and in the CLI. The
//! playhead advances in real (or paused test) time while playing, a progress
//! tick is emitted every 250 ms, and reaching the configured track length
//! stops playback with a `Finish` event.
//!
//! Browser autoplay restrictions are reproduced with
//! [`SimulatedPlayer::with_autoplay_blocked`]: programmatic `play` calls are
//! ignored until [`SimulatedPlayer::grant_user_gesture`] is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::widget::{PlaybackWidget, WidgetEvent};
use crate::error_handling::types::WidgetError;

pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);
const EVENT_CAPACITY: usize = 64;

#[derive(Debug)]
struct Playhead {
    playing: bool,
    /// Position at `anchor`
    base_ms: u64,
    anchor: Instant,
}

impl Playhead {
    fn position_ms(&self, duration_ms: Option<u64>) -> u64 {
        let position = if self.playing {
            let elapsed = self.anchor.elapsed().as_millis();
            self.base_ms.saturating_add(u64::try_from(elapsed).unwrap_or(u64::MAX))
        } else {
            self.base_ms
        };
        match duration_ms {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn rebase(&mut self, position_ms: u64, playing: bool) {
        self.base_ms = position_ms;
        self.anchor = Instant::now();
        self.playing = playing;
    }
}

struct PlayerInner {
    playhead: Mutex<Playhead>,
    events: broadcast::Sender<WidgetEvent>,
    duration_ms: Option<u64>,
    autoplay_blocked: bool,
    gesture_granted: AtomicBool,
    load_failure: Option<String>,
}

impl PlayerInner {
    fn playhead(&self) -> MutexGuard<'_, Playhead> {
        // the playhead holds plain data, a poisoned lock is still consistent
        self.playhead.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: WidgetEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Advances bookkeeping by one progress interval.
    fn tick(&self) {
        let event = {
            let mut playhead = self.playhead();
            if !playhead.playing {
                return;
            }
            let position = playhead.position_ms(self.duration_ms);
            match self.duration_ms {
                Some(duration) if position >= duration => {
                    playhead.rebase(duration, false);
                    WidgetEvent::Finish
                }
                _ => WidgetEvent::Progress,
            }
        };
        if event == WidgetEvent::Finish {
            info!("Simulated player reached end of track");
        }
        self.emit(event);
    }
}

pub struct SimulatedPlayer {
    inner: Arc<PlayerInner>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedPlayer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(PlayerInner {
                playhead: Mutex::new(Playhead {
                    playing: false,
                    base_ms: 0,
                    anchor: Instant::now(),
                }),
                events,
                duration_ms: None,
                autoplay_blocked: false,
                gesture_granted: AtomicBool::new(false),
                load_failure: None,
            }),
            ticker: Mutex::new(None),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut PlayerInner)) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            f(inner);
        }
        self
    }

    /// Track length; playback stops with `Finish` when reached.
    pub fn with_duration(self, duration_ms: u64) -> Self {
        self.configure(|inner| inner.duration_ms = Some(duration_ms))
    }

    pub fn with_autoplay_blocked(self) -> Self {
        self.configure(|inner| inner.autoplay_blocked = true)
    }

    /// Makes `ready` fail with the given message.
    pub fn with_load_failure(self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.configure(|inner| inner.load_failure = Some(message))
    }

    /// A user interaction: lifts the autoplay restriction for good.
    pub fn grant_user_gesture(&self) {
        self.inner.gesture_granted.store(true, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.inner.playhead().playing
    }

    fn spawn_ticker(&self) {
        let mut ticker = self.ticker.lock().unwrap_or_else(|p| p.into_inner());
        if ticker.is_some() {
            return;
        }
        let weak: Weak<PlayerInner> = Arc::downgrade(&self.inner);
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(inner) => inner.tick(),
                    None => break,
                }
            }
        }));
    }
}

impl Default for SimulatedPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SimulatedPlayer {
    fn drop(&mut self) {
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl PlaybackWidget for SimulatedPlayer {
    async fn ready(&self) -> Result<(), WidgetError> {
        if let Some(message) = &self.inner.load_failure {
            return Err(WidgetError::LoadFailed(message.clone()));
        }
        self.spawn_ticker();
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<WidgetEvent> {
        self.inner.events.subscribe()
    }

    async fn position_ms(&self) -> u64 {
        self.inner.playhead().position_ms(self.inner.duration_ms)
    }

    async fn seek_to(&self, position_ms: u64) {
        {
            let mut playhead = self.inner.playhead();
            let target = match self.inner.duration_ms {
                Some(duration) => position_ms.min(duration),
                None => position_ms,
            };
            let playing = playhead.playing;
            playhead.rebase(target, playing);
        }
        debug!("Simulated player seeked to {}ms", position_ms);
        self.inner.emit(WidgetEvent::Seek);
    }

    async fn play(&self) {
        if self.inner.autoplay_blocked && !self.inner.gesture_granted.load(Ordering::SeqCst) {
            debug!("Simulated player ignored play: autoplay blocked");
            return;
        }
        {
            let mut playhead = self.inner.playhead();
            if playhead.playing {
                return;
            }
            let position = playhead.position_ms(self.inner.duration_ms);
            playhead.rebase(position, true);
        }
        self.inner.emit(WidgetEvent::Play);
    }

    async fn pause(&self) {
        {
            let mut playhead = self.inner.playhead();
            if !playhead.playing {
                return;
            }
            let position = playhead.position_ms(self.inner.duration_ms);
            playhead.rebase(position, false);
        }
        self.inner.emit(WidgetEvent::Pause);
    }
}
