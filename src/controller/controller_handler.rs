use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::authority::lease_manager::AuthorityManager;
use crate::authority::types::CreatedSession;
use crate::client::api::SyncApi;
use crate::client::credentials::{resolve_role, CredentialStore, FileCredentialStore};
use crate::client::http_api::HttpApi;
use crate::client::session_url::parse_session_url;
use crate::clock::{OffsetEstimator, SystemClock};
use crate::configuration::config::Config;
use crate::error_handling::types::*;
use crate::participant::listener_reconciler::ListenerReconciler;
use crate::participant::session_participant::Participant;
use crate::playback::simulated_player::SimulatedPlayer;
use crate::playback::widget::PlaybackWidget;
use crate::storage::open_store;
use crate::web_interface::web_server::WebServer;

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Wires configuration to the authority server and to the CLI participants.
pub struct Controller {
    pub config: Config,
}

/// A line typed by the host at the terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Play,
    Pause,
    Seek(u64),
    Status,
    Quit,
}

impl HostCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next()? {
            "play" => HostCommand::Play,
            "pause" => HostCommand::Pause,
            "status" => HostCommand::Status,
            "quit" | "exit" => HostCommand::Quit,
            "seek" => {
                let seconds: f64 = words.next()?.parse().ok()?;
                if !seconds.is_finite() || seconds < 0.0 {
                    return None;
                }
                HostCommand::Seek((seconds * 1000.0).floor() as u64)
            }
            _ => return None,
        };
        Some(command)
    }
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Runs the authority until Ctrl-C.
    pub async fn serve(&self) -> Result<(), ControllerError> {
        let store = open_store(&self.config.storage).await.map_err(|e| {
            error!("Unable to open {:?} storage: {}", self.config.storage.backend, e);
            e
        })?;
        if self.config.server.secret_pepper.is_empty() {
            warn!("No secret pepper configured, credential hashes are unpeppered");
        }
        let manager = Arc::new(AuthorityManager::new(
            store,
            Arc::new(SystemClock),
            &self.config.server,
        ));

        let server = WebServer::new(manager, &self.config.server)?;
        server.start(shutdown_signal()).await?;
        Ok(())
    }

    /// Asks the authority at `client.server_url` for a new session.
    pub async fn create(&self, track_url: &str) -> Result<CreatedSession, ControllerError> {
        let api = HttpApi::new(self.config.client.server_url.clone())?;
        let created = api.create_session(track_url).await?;
        let store = FileCredentialStore::new(&self.config.client.credentials_path);
        if let Err(e) = store.save(created.session_id, &created.host_secret) {
            warn!("[{}] could not remember host credential: {}", created.session_id, e);
        }
        info!("[{}] session created", created.session_id);
        Ok(created)
    }

    /// Joins a session from its shareable link with a simulated player.
    pub async fn join(&self, session_url: &str) -> Result<(), ControllerError> {
        let link = parse_session_url(session_url)?;
        let store = FileCredentialStore::new(&self.config.client.credentials_path);
        let role = resolve_role(&link, &store);

        let api: Arc<dyn SyncApi> = Arc::new(HttpApi::new(link.base_url.clone())?);
        let player = Arc::new(SimulatedPlayer::new());
        let estimator = Arc::new(OffsetEstimator::new(Arc::new(SystemClock)));

        let mut participant = Participant::join(
            role,
            link.session_id,
            api,
            player.clone(),
            estimator.clone(),
        )
        .await?;

        match &participant {
            Participant::Host(_) => {
                println!("Hosting. Commands: play, pause, seek <secs>, status, quit");
                println!("Multiple host terminals on one session may cause drift.");
                run_host_console(tokio::io::stdin(), player.as_ref(), &estimator).await;
            }
            Participant::Listener(listener) => {
                println!("Listening. Press Ctrl-C to leave.");
                run_listener_status(listener, player.as_ref()).await;
            }
        }

        participant.shutdown();
        Ok(())
    }
}

async fn run_host_console<R>(input: R, player: &SimulatedPlayer, estimator: &OffsetEstimator)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Unable to read host command: {}", e);
                break;
            }
        };

        match HostCommand::parse(&line) {
            Some(HostCommand::Play) => player.play().await,
            Some(HostCommand::Pause) => player.pause().await,
            Some(HostCommand::Seek(position_ms)) => player.seek_to(position_ms).await,
            Some(HostCommand::Status) => println!(
                "{} at {:.1}s (clock offset {}ms)",
                if player.is_playing() { "playing" } else { "paused" },
                player.position_ms().await as f64 / 1000.0,
                estimator.offset_ms()
            ),
            Some(HostCommand::Quit) => break,
            None if line.trim().is_empty() => {}
            None => println!("Unknown command: {}", line.trim()),
        }
    }
}

async fn run_listener_status(listener: &ListenerReconciler, player: &SimulatedPlayer) {
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let status = listener.status();
                let mut line = format!(
                    "[{}] local {:.1}s",
                    status.label(),
                    player.position_ms().await as f64 / 1000.0
                );
                if let Some(target) = status.last_target_ms {
                    line.push_str(&format!(" target {:.1}s", target as f64 / 1000.0));
                }
                if status.autoplay_blocked {
                    line.push_str(" (autoplay blocked)");
                }
                if let Some(e) = &status.widget_error {
                    line.push_str(&format!(" widget error: {}", e));
                }
                println!("{}", line);
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
