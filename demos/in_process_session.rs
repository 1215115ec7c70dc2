//! One host and two listeners on an in-process authority.
//!
//! The second listener's clock runs four seconds fast and its player refuses
//! autoplay until a manual start.

use chrono::Duration as ChronoDuration;
use env_logger::Env;
use log::info;
use radio_sync::authority::AuthorityManager;
use radio_sync::client::{LocalApi, Role, SyncApi};
use radio_sync::clock::{MonotonicClock, OffsetEstimator};
use radio_sync::configuration::types::ServerConfig;
use radio_sync::participant::Participant;
use radio_sync::playback::simulated_player::SimulatedPlayer;
use radio_sync::playback::widget::PlaybackWidget;
use radio_sync::storage::memory_storage::MemoryStorage;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();

    let clock = MonotonicClock::new();
    let manager = Arc::new(AuthorityManager::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(clock.clone()),
        &ServerConfig::default(),
    ));
    let api = Arc::new(
        LocalApi::new(manager, "http://localhost:8080").with_latency(Duration::from_millis(40)),
    );

    let created = api
        .create_session("https://soundcloud.com/artist/track")
        .await
        .expect("create session");
    info!("Host link: {}", created.session_url_host);
    info!("Listener link: {}", created.session_url_listener);

    let session_id = created.session_id;
    let join = |role: Role, player: Arc<SimulatedPlayer>, skew_ms: i64| {
        let api = api.clone();
        let estimator = Arc::new(OffsetEstimator::new(Arc::new(
            clock.skewed(ChronoDuration::milliseconds(skew_ms)),
        )));
        async move {
            Participant::join(role, session_id, api, player, estimator)
                .await
                .expect("join session")
        }
    };

    let host_player = Arc::new(SimulatedPlayer::new());
    let calm_player = Arc::new(SimulatedPlayer::new());
    let blocked_player = Arc::new(SimulatedPlayer::new().with_autoplay_blocked());

    let mut host = join(Role::Host(created.host_secret.clone()), host_player.clone(), 0).await;
    let mut calm = join(Role::Listener, calm_player.clone(), -250).await;
    let mut blocked = join(Role::Listener, blocked_player.clone(), 4_000).await;

    host_player.play().await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    if let Participant::Listener(listener) = &blocked {
        info!(
            "Blocked listener: {} (autoplay blocked: {})",
            listener.status().label(),
            listener.status().autoplay_blocked
        );
        blocked_player.grant_user_gesture();
        if let Some(target) = listener.manual_start().await {
            info!("Manual start seeked to {} ms", target);
        }
    }

    host_player.seek_to(42_000).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    for (name, player) in [
        ("host", &host_player),
        ("calm listener", &calm_player),
        ("blocked listener", &blocked_player),
    ] {
        info!(
            "{:<16} playing={} position={} ms",
            name,
            player.is_playing(),
            player.position_ms().await
        );
    }

    host_player.pause().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    info!("After pause: calm listener playing={}", calm_player.is_playing());

    host.shutdown();
    calm.shutdown();
    blocked.shutdown();
}
