//! Listener Reconciler
//!
//! Runs on every client without the authority credential. Snapshots arrive
//! from three places (the initial fetch, push notifications and a periodic
//! poll) and all of them are funnelled into one channel drained by a single
//! consumer task, which owns the reconciliation state and is the only code
//! that drives the widget.
//!
//! ```text
//!  push stream ──┐
//!  9s poll ──────┼──► mpsc<ListenerEvent> ──► consumer ──► widget
//!  1s tick ──────┤                               │
//!  manual start ─┘                               └──► watch<ListenerStatus>
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep, MissedTickBehavior};
use uuid::Uuid;

use super::reconciliation::{
    autoplay_blocked, plan, target_position_ms, AutoplayGate, PlaybackAction, SyncReason,
    AUTOPLAY_PROBE_DELAY,
};
use crate::client::api::SyncApi;
use crate::clock::OffsetEstimator;
use crate::error_handling::types::SyncError;
use crate::playback::widget::PlaybackWidget;
use crate::storage::types::SessionSnapshot;

pub const PERIODIC_POLL: Duration = Duration::from_millis(9_000);
pub const STATUS_TICK: Duration = Duration::from_millis(1_000);
const EVENT_CAPACITY: usize = 64;

/// What a listener UI shows.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerStatus {
    pub snapshot: SessionSnapshot,
    pub host_offline: bool,
    pub autoplay_blocked: bool,
    pub manually_started: bool,
    pub widget_error: Option<String>,
    /// Target position computed by the last reconciliation
    pub last_target_ms: Option<u64>,
}

impl ListenerStatus {
    pub fn label(&self) -> &'static str {
        if self.host_offline {
            "HOST OFFLINE"
        } else if self.snapshot.playing {
            "LIVE"
        } else {
            "PAUSED"
        }
    }
}

#[derive(Debug)]
enum ListenerEvent {
    Snapshot {
        snapshot: SessionSnapshot,
        reason: SyncReason,
    },
    /// Re-run reconciliation on the latest known snapshot.
    Reapply { reason: SyncReason },
    ProbeFinished { blocked: bool },
    ManualStart { reply: oneshot::Sender<Option<u64>> },
    Tick,
}

/// Per-session reconciliation context, owned by the consumer task.
struct ReconcileContext {
    session_id: Uuid,
    widget: Arc<dyn PlaybackWidget>,
    estimator: Arc<OffsetEstimator>,
    latest: SessionSnapshot,
    gate: AutoplayGate,
    widget_ready: bool,
    status: watch::Sender<ListenerStatus>,
    events: mpsc::Sender<ListenerEvent>,
    probes: JoinSet<()>,
}

impl ReconcileContext {
    fn publish(&self, last_target_ms: Option<u64>) {
        let host_offline = self.latest.host_offline_at(self.estimator.server_now());
        let latest = &self.latest;
        let gate = self.gate;
        self.status.send_if_modified(|status| {
            let next = ListenerStatus {
                snapshot: latest.clone(),
                host_offline,
                autoplay_blocked: gate.blocked,
                manually_started: gate.manually_started,
                widget_error: status.widget_error.clone(),
                last_target_ms: last_target_ms.or(status.last_target_ms),
            };
            if *status == next {
                return false;
            }
            if status.host_offline != next.host_offline {
                info!("[{}] status {}", latest.id, next.label());
            }
            *status = next;
            true
        });
    }

    async fn reconcile(&mut self, reason: SyncReason) {
        if !self.widget_ready {
            self.publish(None);
            return;
        }

        let server_now = self.estimator.server_now();
        let current_ms = self.widget.position_ms().await;
        let plan = plan(&self.latest, server_now, current_ms, reason, self.gate);
        debug!(
            "[{}] reconcile ({}): target={}ms current={}ms drift={}ms seek={} offline={}",
            self.session_id,
            reason.as_str(),
            plan.target_ms,
            current_ms,
            plan.drift_ms,
            plan.seek,
            plan.host_offline
        );

        if plan.seek {
            self.widget.seek_to(plan.target_ms).await;
        }
        match plan.action {
            PlaybackAction::Pause => self.widget.pause().await,
            PlaybackAction::Hold => {}
            PlaybackAction::Play { probe } => {
                self.widget.play().await;
                if probe {
                    self.start_probe().await;
                }
            }
        }
        self.publish(Some(plan.target_ms));
    }

    async fn start_probe(&mut self) {
        self.gate.probe_done = true;
        let before = self.widget.position_ms().await;
        let widget = self.widget.clone();
        let events = self.events.clone();
        self.probes.spawn(async move {
            sleep(AUTOPLAY_PROBE_DELAY).await;
            let after = widget.position_ms().await;
            let blocked = autoplay_blocked(before, after);
            let _ = events.send(ListenerEvent::ProbeFinished { blocked }).await;
        });
    }

    async fn manual_start(&mut self) -> Option<u64> {
        if !self.widget_ready {
            return None;
        }
        let target_ms = target_position_ms(&self.latest, self.estimator.server_now());
        self.widget.seek_to(target_ms).await;
        self.widget.play().await;
        self.gate.manually_started = true;
        self.gate.blocked = false;
        info!("[{}] playback started manually at {}ms", self.session_id, target_ms);
        self.publish(Some(target_ms));
        Some(target_ms)
    }

    async fn handle(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::Snapshot { snapshot, reason } => {
                self.latest = snapshot;
                self.reconcile(reason).await;
            }
            ListenerEvent::Reapply { reason } => self.reconcile(reason).await,
            ListenerEvent::ProbeFinished { blocked } => {
                if !self.gate.manually_started {
                    if blocked {
                        warn!("[{}] autoplay blocked, waiting for a manual start", self.session_id);
                    }
                    self.gate.blocked = blocked;
                    self.publish(None);
                }
            }
            ListenerEvent::ManualStart { reply } => {
                let started = self.manual_start().await;
                let _ = reply.send(started);
            }
            ListenerEvent::Tick => self.publish(None),
        }
    }
}

pub struct ListenerReconciler {
    session_id: Uuid,
    status: watch::Receiver<ListenerStatus>,
    events: mpsc::Sender<ListenerEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl ListenerReconciler {
    /// Calibrates the clock offset and fetches the session. A failing initial
    /// fetch is the one error a listener surfaces; everything afterwards
    /// degrades silently. Widget failures are reported through the status.
    pub async fn start(
        session_id: Uuid,
        api: Arc<dyn SyncApi>,
        widget: Arc<dyn PlaybackWidget>,
        estimator: Arc<OffsetEstimator>,
    ) -> Result<Self, SyncError> {
        estimator.estimate(api.as_ref()).await;
        let initial = api.fetch_session(session_id).await?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (status_tx, status_rx) = watch::channel(ListenerStatus {
            host_offline: initial.host_offline_at(estimator.server_now()),
            snapshot: initial.clone(),
            autoplay_blocked: false,
            manually_started: false,
            widget_error: None,
            last_target_ms: None,
        });

        let mut tasks = Vec::new();
        match api.subscribe(session_id).await {
            Ok(stream) => tasks.push(tokio::spawn(forward_pushes(stream, events_tx.clone()))),
            Err(e) => warn!("[{}] push notifications unavailable, polling only: {}", session_id, e),
        }
        tasks.push(tokio::spawn(poll_periodically(session_id, api, events_tx.clone())));
        tasks.push(tokio::spawn(tick_status(events_tx.clone())));

        let context = ReconcileContext {
            session_id,
            widget,
            estimator,
            latest: initial,
            gate: AutoplayGate::default(),
            widget_ready: false,
            status: status_tx,
            events: events_tx.clone(),
            probes: JoinSet::new(),
        };
        tasks.push(tokio::spawn(consume(context, events_rx)));
        info!("[{}] listener started", session_id);

        Ok(Self {
            session_id,
            status: status_rx,
            events: events_tx,
            tasks,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn status(&self) -> ListenerStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ListenerStatus> {
        self.status.clone()
    }

    /// The listener tapped "start": seek to the live position, play, and stop
    /// second-guessing autoplay for this session. `None` until the widget is ready.
    pub async fn manual_start(&self) -> Option<u64> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(ListenerEvent::ManualStart { reply })
            .await
            .ok()?;
        response.await.ok().flatten()
    }

    /// Cancels every timer and stream; late responses are dropped with their tasks.
    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("[{}] listener stopped", self.session_id);
    }
}

impl Drop for ListenerReconciler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn consume(mut context: ReconcileContext, mut events: mpsc::Receiver<ListenerEvent>) {
    match context.widget.ready().await {
        Ok(()) => {
            context.widget_ready = true;
            context.reconcile(SyncReason::Initial).await;
        }
        Err(e) => {
            warn!("[{}] {}", context.session_id, e);
            context.status.send_modify(|status| status.widget_error = Some(e.to_string()));
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => context.handle(event).await,
                None => break,
            },
            Some(_) = context.probes.join_next(), if !context.probes.is_empty() => {}
        }
    }
}

async fn forward_pushes(
    mut stream: futures::stream::BoxStream<'static, SessionSnapshot>,
    events: mpsc::Sender<ListenerEvent>,
) {
    while let Some(snapshot) = stream.next().await {
        let event = ListenerEvent::Snapshot {
            snapshot,
            reason: SyncReason::Pushed,
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
    debug!("push stream ended, relying on the periodic poll");
}

async fn poll_periodically(
    session_id: Uuid,
    api: Arc<dyn SyncApi>,
    events: mpsc::Sender<ListenerEvent>,
) {
    let mut ticker = interval(PERIODIC_POLL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let event = match api.fetch_session(session_id).await {
            Ok(snapshot) => ListenerEvent::Snapshot {
                snapshot,
                reason: SyncReason::Periodic,
            },
            Err(e) => {
                debug!("[{}] periodic fetch failed, re-applying last snapshot: {}", session_id, e);
                ListenerEvent::Reapply {
                    reason: SyncReason::Periodic,
                }
            }
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
}

async fn tick_status(events: mpsc::Sender<ListenerEvent>) {
    let mut ticker = interval(STATUS_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if events.send(ListenerEvent::Tick).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::lease_manager::AuthorityManager;
    use crate::authority::types::StatePayload;
    use crate::authority::HostAction;
    use crate::client::local_api::LocalApi;
    use crate::clock::{Clock, MonotonicClock};
    use crate::configuration::types::ServerConfig;
    use crate::playback::simulated_player::SimulatedPlayer;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::authority::types::CreatedSession;

    struct Fixture {
        api: Arc<LocalApi>,
        clock: Arc<dyn Clock>,
        created: CreatedSession,
    }

    async fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let manager = Arc::new(AuthorityManager::new(
            Arc::new(MemoryStorage::new()),
            clock.clone(),
            &ServerConfig::default(),
        ));
        let api = Arc::new(LocalApi::new(manager, "http://local"));
        let created = api.create_session("https://soundcloud.com/a/b").await.unwrap();
        Fixture { api, clock, created }
    }

    impl Fixture {
        async fn host_writes(&self, action: HostAction, playing: bool, position_ms: f64) {
            let payload = StatePayload {
                action: Some(action),
                playing: Some(playing),
                position_ms: Some(position_ms),
                client_sent_at_ms: None,
            };
            self.api
                .post_state(self.created.session_id, &self.created.host_secret, &payload)
                .await
                .unwrap();
        }

        async fn listener(&self, player: Arc<SimulatedPlayer>) -> ListenerReconciler {
            ListenerReconciler::start(
                self.created.session_id,
                self.api.clone(),
                player,
                Arc::new(OffsetEstimator::new(self.clock.clone())),
            )
            .await
            .unwrap()
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn initial_state_is_paused_at_zero() {
        let fx = fixture().await;
        let player = Arc::new(SimulatedPlayer::new());
        let listener = fx.listener(player.clone()).await;
        settle().await;

        let status = listener.status();
        assert!(!status.snapshot.playing);
        assert_eq!(status.snapshot.position_ms, 0);
        assert_eq!(status.label(), "PAUSED");
        assert_eq!(status.last_target_ms, Some(0));
        assert!(!player.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn follows_pushed_play_and_pause() {
        let fx = fixture().await;
        let player = Arc::new(SimulatedPlayer::new());
        let listener = fx.listener(player.clone()).await;
        settle().await;

        fx.host_writes(HostAction::Play, true, 30_000.0).await;
        settle().await;
        assert!(player.is_playing());
        assert_eq!(player.position_ms().await, 30_000);
        assert_eq!(listener.status().label(), "LIVE");

        sleep(Duration::from_millis(2_000)).await;
        fx.host_writes(HostAction::Pause, false, 32_000.0).await;
        settle().await;
        assert!(!player.is_playing());
        assert_eq!(player.position_ms().await, 32_000);
        assert_eq!(listener.status().label(), "PAUSED");
    }

    #[tokio::test(start_paused = true)]
    async fn small_drift_is_left_alone() {
        let fx = fixture().await;
        let player = Arc::new(SimulatedPlayer::new());
        let _listener = fx.listener(player.clone()).await;
        settle().await;

        player.seek_to(500).await;
        fx.host_writes(HostAction::Heartbeat, false, 0.0).await;
        settle().await;
        // 500ms off is under the 700ms event threshold
        assert_eq!(player.position_ms().await, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_host_offline_after_lease() {
        let fx = fixture().await;
        let player = Arc::new(SimulatedPlayer::new());
        let listener = fx.listener(player.clone()).await;
        settle().await;
        assert!(!listener.status().host_offline);

        sleep(Duration::from_millis(21_500)).await;
        settle().await;
        let status = listener.status();
        assert!(status.host_offline);
        assert_eq!(status.label(), "HOST OFFLINE");
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_autoplay_waits_for_manual_start() {
        let fx = fixture().await;
        fx.host_writes(HostAction::Play, true, 0.0).await;

        let player = Arc::new(SimulatedPlayer::new().with_autoplay_blocked());
        let listener = fx.listener(player.clone()).await;
        settle().await;
        assert!(!player.is_playing());

        sleep(Duration::from_millis(1_300)).await;
        settle().await;
        assert!(listener.status().autoplay_blocked);

        // pushes keep holding while blocked
        fx.host_writes(HostAction::Heartbeat, true, 1_300.0).await;
        settle().await;
        assert!(!player.is_playing());

        player.grant_user_gesture();
        let target = listener.manual_start().await.unwrap();
        assert!(target >= 1_300);
        assert!(player.is_playing());
        let status = listener.status();
        assert!(!status.autoplay_blocked);
        assert!(status.manually_started);
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_probe_clears_when_playing() {
        let fx = fixture().await;
        fx.host_writes(HostAction::Play, true, 0.0).await;
        let player = Arc::new(SimulatedPlayer::new());
        let listener = fx.listener(player.clone()).await;

        sleep(Duration::from_millis(1_300)).await;
        settle().await;
        assert!(player.is_playing());
        assert!(!listener.status().autoplay_blocked);
    }

    #[tokio::test(start_paused = true)]
    async fn widget_failure_is_non_fatal() {
        let fx = fixture().await;
        let player = Arc::new(SimulatedPlayer::new().with_load_failure("embed refused"));
        let listener = fx.listener(player).await;
        settle().await;

        let status = listener.status();
        assert_eq!(
            status.widget_error.as_deref(),
            Some("Widget failed to load: embed refused")
        );
        assert_eq!(listener.manual_start().await, None);

        fx.host_writes(HostAction::Play, true, 0.0).await;
        settle().await;
        assert_eq!(listener.status().label(), "LIVE");
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_session_fails_to_start() {
        let fx = fixture().await;
        let result = ListenerReconciler::start(
            Uuid::new_v4(),
            fx.api.clone(),
            Arc::new(SimulatedPlayer::new()),
            Arc::new(OffsetEstimator::new(fx.clock.clone())),
        )
        .await;
        assert!(matches!(result, Err(SyncError::NotFound)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_reacting() {
        let fx = fixture().await;
        let player = Arc::new(SimulatedPlayer::new());
        let mut listener = fx.listener(player.clone()).await;
        settle().await;

        listener.shutdown();
        fx.host_writes(HostAction::Play, true, 5_000.0).await;
        sleep(Duration::from_millis(10_000)).await;
        settle().await;
        assert!(!player.is_playing());
        assert_eq!(listener.manual_start().await, None);
    }
}
