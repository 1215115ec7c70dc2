//! Host Reporter
//!
//! Runs on the client holding the authority credential. It turns widget
//! events into state writes and keeps a background heartbeat so the lease
//! never lapses while nothing happens.
//!
//! Every write is fire-and-forget: a failed send is logged at debug level and
//! dropped; the next event or heartbeat re-establishes state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::authority::crypto::SecretString;
use crate::authority::types::{HostAction, StatePayload};
use crate::client::api::SyncApi;
use crate::clock::OffsetEstimator;
use crate::error_handling::types::WidgetError;
use crate::playback::widget::{PlaybackWidget, WidgetEvent};

/// Re-sends after a seek, absorbing widgets that report a stale position right after seeking.
pub const SEEK_RESEND_DELAYS: [Duration; 3] = [
    Duration::ZERO,
    Duration::from_millis(350),
    Duration::from_millis(900),
];
pub const PROGRESS_THROTTLE: Duration = Duration::from_millis(1_200);
pub const HEARTBEAT_PLAYING: Duration = Duration::from_millis(1_500);
pub const HEARTBEAT_PAUSED: Duration = Duration::from_millis(10_000);

struct ReporterShared {
    session_id: Uuid,
    api: Arc<dyn SyncApi>,
    widget: Arc<dyn PlaybackWidget>,
    credential: SecretString,
    estimator: Arc<OffsetEstimator>,
    /// Playback intent last observed from the widget
    playing: AtomicBool,
    closed: AtomicBool,
    accepted: AtomicU64,
}

impl ReporterShared {
    fn heartbeat_interval(&self) -> Duration {
        if self.playing.load(Ordering::SeqCst) {
            HEARTBEAT_PLAYING
        } else {
            HEARTBEAT_PAUSED
        }
    }

    /// Sends one state write; `playing` overrides the recorded intent.
    async fn report(&self, action: HostAction, playing: Option<bool>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let position_ms = self.widget.position_ms().await;
        let playing = playing.unwrap_or_else(|| self.playing.load(Ordering::SeqCst));
        let t0 = self.estimator.local_now_ms();
        let payload = StatePayload {
            action: Some(action),
            playing: Some(playing),
            position_ms: Some(position_ms as f64),
            client_sent_at_ms: Some(t0),
        };

        match self.api.post_state(self.session_id, &self.credential, &payload).await {
            Ok(server_time) => {
                if self.closed.load(Ordering::SeqCst) {
                    return;
                }
                let t1 = self.estimator.local_now_ms();
                self.estimator.record_round_trip(t0, server_time, t1);
                self.accepted.fetch_add(1, Ordering::SeqCst);
                debug!(
                    "[{}] {:?} reported: playing={} position={}ms",
                    self.session_id, action, playing, position_ms
                );
            }
            Err(e) => debug!("[{}] {:?} report dropped: {}", self.session_id, action, e),
        }
    }
}

pub struct HostReporter {
    shared: Arc<ReporterShared>,
    tasks: Vec<JoinHandle<()>>,
}

impl HostReporter {
    /// Calibrates the clock offset, seeds the playback intent from the
    /// current session state and starts reporting once the widget is ready.
    pub async fn start(
        session_id: Uuid,
        api: Arc<dyn SyncApi>,
        widget: Arc<dyn PlaybackWidget>,
        credential: SecretString,
        estimator: Arc<OffsetEstimator>,
    ) -> Result<Self, WidgetError> {
        estimator.estimate(api.as_ref()).await;
        let playing = match api.fetch_session(session_id).await {
            Ok(snapshot) => snapshot.playing,
            Err(e) => {
                debug!("[{}] initial fetch failed, assuming paused: {}", session_id, e);
                false
            }
        };

        // subscribe before ready so no early event is missed
        let events = widget.events();
        widget.ready().await?;

        let shared = Arc::new(ReporterShared {
            session_id,
            api,
            widget,
            credential,
            estimator,
            playing: AtomicBool::new(playing),
            closed: AtomicBool::new(false),
            accepted: AtomicU64::new(0),
        });

        let tasks = vec![
            tokio::spawn(event_loop(shared.clone(), events)),
            tokio::spawn(heartbeat_loop(shared.clone())),
        ];
        info!("[{}] host reporter started (playing={})", session_id, playing);

        Ok(Self { shared, tasks })
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.session_id
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    /// Number of writes the authority accepted so far.
    pub fn accepted_reports(&self) -> u64 {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Stops all timers and drops in-flight writes.
    pub fn shutdown(&mut self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("[{}] host reporter stopped", self.shared.session_id);
    }
}

impl Drop for HostReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn event_loop(
    shared: Arc<ReporterShared>,
    mut events: tokio::sync::broadcast::Receiver<WidgetEvent>,
) {
    // owns every in-flight send; aborting this task aborts them too
    let mut inflight = JoinSet::new();
    let mut last_progress: Option<Instant> = None;

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("[{}] skipped {} widget events", shared.session_id, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                match event {
                    WidgetEvent::Play => {
                        shared.playing.store(true, Ordering::SeqCst);
                        let s = shared.clone();
                        inflight.spawn(async move { s.report(HostAction::Play, Some(true)).await });
                    }
                    WidgetEvent::Pause | WidgetEvent::Finish => {
                        shared.playing.store(false, Ordering::SeqCst);
                        let s = shared.clone();
                        inflight.spawn(async move { s.report(HostAction::Pause, Some(false)).await });
                    }
                    WidgetEvent::Seek => {
                        for delay in SEEK_RESEND_DELAYS {
                            let s = shared.clone();
                            inflight.spawn(async move {
                                if !delay.is_zero() {
                                    sleep(delay).await;
                                }
                                s.report(HostAction::Seek, None).await
                            });
                        }
                    }
                    WidgetEvent::Progress => {
                        let due = last_progress.map_or(true, |at| at.elapsed() >= PROGRESS_THROTTLE);
                        if due {
                            last_progress = Some(Instant::now());
                            let s = shared.clone();
                            inflight.spawn(async move { s.report(HostAction::Heartbeat, None).await });
                        }
                    }
                }
            }
            Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
        }
    }
}

async fn heartbeat_loop(shared: Arc<ReporterShared>) {
    loop {
        sleep(shared.heartbeat_interval()).await;
        shared.report(HostAction::Heartbeat, None).await;
    }
}
