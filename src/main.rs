#![allow(missing_docs)]

//! Guardian relay binary.
//!
//! Boots the WhatsApp session machinery and the HTTP surface, or runs one
//! of the diagnostic subcommands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use guardian_relay::config::Config;
use guardian_relay::delivery::DeliveryEngine;
use guardian_relay::logging;
use guardian_relay::server::{self, AppState};
use guardian_relay::session::{ReinitRequest, SessionEvent, SessionTracker};
use guardian_relay::whatsapp::client::WhatsAppClient;
use guardian_relay::whatsapp::setup::{self, ContainerSpec};
use guardian_relay::whatsapp::{events, MediaAsset, MessagingClient};

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(
    name = "guardian-relay",
    version,
    about = "WhatsApp notification relay for student guardians"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay (default).
    Start,
    /// Validate configuration and report media and bridge availability.
    Check,
    /// Print the WhatsApp chat id for a phone number.
    Normalize {
        /// Phone number in any format.
        phone: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Start) {
        Command::Start => start(cli.config.as_deref()).await,
        Command::Check => check(cli.config.as_deref()).await,
        Command::Normalize { phone } => {
            let config = Config::load(cli.config.as_deref())?;
            println!("{}", config.delivery.normalizer().normalize(&phone));
            Ok(())
        }
    }
}

async fn start(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path).context("failed to load configuration")?;

    let _log_guard = match &config.logging.logs_dir {
        Some(dir) => Some(logging::init_production(dir, &config.logging.level)?),
        None => {
            logging::init_cli(&config.logging.level);
            None
        }
    };

    config.validate()?;
    info!(version = env!("CARGO_PKG_VERSION"), "guardian relay starting");

    let media = MediaAsset::load_optional(config.delivery.media_path.as_deref());

    // Session state machine.
    let (reinit_tx, reinit_rx) = mpsc::unbounded_channel::<ReinitRequest>();
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);
    let tracker =
        SessionTracker::new(reinit_tx.clone()).with_terminal_login_code(config.whatsapp.print_qr);
    let session = tracker.handle();
    tokio::spawn(tracker.run(event_rx));

    // Bridge sidecar.
    if let Some(container) = &config.whatsapp.container {
        let docker = bollard::Docker::connect_with_local_defaults()
            .context("Docker is required when [whatsapp.container] is configured")?;
        setup::ensure_container(
            &docker,
            ContainerSpec {
                image: &container.image,
                port: container.port,
                session_dir: &config.whatsapp.session_dir,
            },
        )
        .await?;
    }

    let bridge = WhatsAppClient::new(config.whatsapp.bridge_url.clone());
    let bridge = if config.whatsapp.container.is_some() {
        bridge.with_session_dir(setup::CONTAINER_SESSION_DIR)
    } else {
        bridge.with_session_dir(config.whatsapp.session_dir.clone())
    };
    if let Err(e) = bridge.wait_healthy().await {
        warn!(error = %e, bridge = bridge.base_url(), "WhatsApp bridge not reachable yet");
    }
    let client: Arc<dyn MessagingClient> = Arc::new(bridge);

    let _listener_task = events::spawn_event_listener(config.whatsapp.bridge_url.clone(), event_tx);
    let _reinit_task = setup::spawn_reinitializer(Arc::clone(&client), reinit_rx);
    let _ = reinit_tx.send(ReinitRequest {
        reason: "startup".to_owned(),
    });

    // HTTP surface.
    let engine = DeliveryEngine::new(
        client,
        session.clone(),
        config.delivery.normalizer(),
        config.delivery.message_template()?,
    )
    .with_media(media)
    .with_settings(config.delivery.settings());

    let router = server::router(
        AppState {
            session,
            engine: Arc::new(engine),
        },
        &config.server,
    )?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    server::serve(listener, router, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
    })
    .await?;

    info!("guardian relay shut down cleanly");
    Ok(())
}

async fn check(config_path: Option<&Path>) -> Result<()> {
    logging::init_cli("warn");
    let config = Config::load(config_path).context("failed to load configuration")?;
    config.validate()?;
    println!("configuration: ok");
    println!(
        "listen: {}:{} (origins: {})",
        config.server.host,
        config.server.port,
        config.server.allowed_origins.join(", ")
    );

    match config.delivery.media_path.as_deref() {
        Some(path) => match MediaAsset::load(path) {
            Ok(asset) => println!(
                "media: {} ({}, {} bytes)",
                path.display(),
                asset.mime_type(),
                asset.data().len()
            ),
            Err(e) => println!("media: unavailable, text-only ({e})"),
        },
        None => println!("media: none configured, text-only"),
    }

    let bridge = WhatsAppClient::new(config.whatsapp.bridge_url.clone());
    match bridge.status().await {
        Ok(status) => println!(
            "bridge: reachable at {} (connected: {})",
            bridge.base_url(),
            status.connected
        ),
        Err(e) => println!("bridge: unreachable at {} ({e})", bridge.base_url()),
    }
    Ok(())
}
