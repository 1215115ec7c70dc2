use clap::{Parser, Subcommand};
use log::{error, info};
use radio_sync::configuration::config::Config;
use radio_sync::configuration::types::StorageBackend;
use radio_sync::controller::controller_handler::Controller;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "radio-sync")]
#[command(version = "0.0.2")]
#[command(about = "Shared listening sessions kept in sync by a single host")]
struct Args {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the session authority.
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, value_enum)]
        storage: Option<StorageBackend>,
        #[arg(long)]
        storage_path: Option<PathBuf>,
        /// Base URL written into shareable links.
        #[arg(long)]
        public_url: Option<String>,
        #[arg(long, env = "RADIO_SYNC_SECRET_PEPPER", hide_env_values = true)]
        secret_pepper: Option<String>,
    },
    /// Create a session for a track and print its links.
    Create {
        track_url: String,
        #[arg(long)]
        server_url: Option<String>,
    },
    /// Join a session from a host or listener link.
    Join { session_url: String },
}

fn load_config(args: &Args) -> Config {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).unwrap_or_else(|e| {
            error!("Unable to import configuration from {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => Config::default(),
    };

    match &args.command {
        Command::Serve {
            bind,
            port,
            storage,
            storage_path,
            public_url,
            secret_pepper,
        } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind.clone();
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
            if let Some(storage) = storage {
                config.storage.backend = *storage;
            }
            if let Some(path) = storage_path {
                config.storage.path = path.clone();
            }
            if public_url.is_some() {
                config.server.public_url = public_url.clone();
            }
            if let Some(pepper) = secret_pepper {
                config.server.secret_pepper = pepper.clone();
            }
        }
        Command::Create {
            server_url: Some(url),
            ..
        } => config.client.server_url = url.clone(),
        _ => {}
    }
    config
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();
    let config = load_config(&args);
    info!("Configuration loaded");

    let controller = Controller::new(config).unwrap_or_else(|e| {
        error!("Unable to create a controller instance: {}, exiting...", e);
        std::process::exit(1);
    });

    let result = match args.command {
        Command::Serve { .. } => controller.serve().await,
        Command::Create { track_url, .. } => controller.create(&track_url).await.map(|created| {
            println!("Session:  {}", created.session_id);
            println!("Host:     {}", created.session_url_host);
            println!("Listener: {}", created.session_url_listener);
        }),
        Command::Join { session_url } => controller.join(&session_url).await,
    };

    if let Err(e) = result {
        error!("{}, exiting...", e);
        std::process::exit(1);
    }
}
