//! `shellcore` — client-side connection core for a remote shell.
//!
//! Headless entry point: parses CLI/config, wires the orchestrator against
//! the production WebRTC transport, joins a signaling room, and logs store
//! events via `tracing` until interrupted. There is no rendering/UI shell
//! here — that's a separate concern the core is designed to be driven by.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use shellcore::config::{CliArgs, ShellCoreConfig};
use shellcore::orchestrator::Orchestrator;
use shellcore::signaling::SignalingClient;
use shellcore::stores::connection::ConnectionStore;
use shellcore::stores::device::DeviceStore;
use shellcore::stores::file::FileStore;
use shellcore::stores::notification::NotificationStore;
use shellcore::stores::session::SessionStore;
use shellcore::transport::webrtc::WebrtcTransportManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();
    init_logging(&cli.log_level, cli.log_file.as_deref());

    let config = ShellCoreConfig::load(&cli)?;
    let room_id = cli
        .room
        .clone()
        .ok_or("no room given: pass --room or set SHELLCORE_ROOM")?;

    tracing::info!(signaling_url = %config.signaling_url, %room_id, "starting shellcore core");

    let signaling =
        Arc::new(SignalingClient::connect(config.signaling_url.clone(), config.reconnect_policy()).await?);
    let transport = Arc::new(WebrtcTransportManager::new());

    let connection_store = Arc::new(ConnectionStore::new());
    let session_store = Arc::new(SessionStore::with_watermarks(config.high_watermark, config.low_watermark));
    let file_store = Arc::new(FileStore::new());
    if config.show_hidden_default {
        file_store.toggle_hidden();
    }
    let notification_store = Arc::new(NotificationStore::new());
    let device_store = Arc::new(DeviceStore::new());

    log_store_events(
        &connection_store,
        &session_store,
        &file_store,
        &notification_store,
        &device_store,
    );

    let ice_servers = (!config.ice_servers.is_empty()).then(|| config.ice_servers.clone());
    let orchestrator = Orchestrator::new(
        signaling,
        transport,
        connection_store,
        session_store,
        file_store,
        notification_store,
        device_store,
        ice_servers,
        config.chunk_size,
    );
    orchestrator.initialize();
    orchestrator.connect(room_id).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    orchestrator.destroy().await?;

    Ok(())
}

/// Subscribes a `tracing`-logging handler to every store, for visibility
/// into connection/session/file/device/notification state changes while
/// running headless.
fn log_store_events(
    connection_store: &Arc<ConnectionStore>,
    session_store: &Arc<SessionStore>,
    file_store: &Arc<FileStore>,
    notification_store: &Arc<NotificationStore>,
    device_store: &Arc<DeviceStore>,
) {
    connection_store.subscribe(|event| tracing::debug!(?event, "connection store event"));
    session_store.subscribe(|event| tracing::debug!(?event, "session store event"));
    file_store.subscribe(|event| tracing::debug!(?event, "file store event"));
    notification_store.subscribe(|event| tracing::debug!(?event, "notification store event"));
    device_store.subscribe(|event| tracing::debug!(?event, "device store event"));
}

/// Sets up a `tracing` subscriber: stderr by default, or a file if
/// `log_file` is given, filtered by `RUST_LOG` falling back to `log_level`.
fn init_logging(log_level: &str, log_file: Option<&std::path::Path>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if let Some(path) = log_file {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let file_name = path
            .file_name()
            .map(std::ffi::OsStr::to_owned)
            .unwrap_or_else(|| std::ffi::OsString::from("shellcore.log"));
        let appender = tracing_appender::rolling::never(
            dir.unwrap_or_else(|| std::path::Path::new(".")),
            file_name,
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        // Leaked intentionally: the guard must outlive the subscriber, and
        // this process only ever sets up logging once, at startup.
        Box::leak(Box::new(guard));
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .with(filter)
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .try_init();
    }
}
