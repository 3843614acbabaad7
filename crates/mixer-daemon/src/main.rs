mod core;
mod http;
mod mpv;
mod socket;

use std::sync::Arc;
use std::time::Duration;

use mixer_core::{Clock, CrossfadeEngine, EngineSettings, SystemClock};
use mixer_proto::config::Config;
use mixer_proto::protocol::DisplayUpdate;
use mixer_proto::sources::resolve_sources;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    /// Bars that moved this frame.
    Display(Vec<DisplayUpdate>),
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR reach clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let now = chrono::Local::now();
        let mut message = format!("{} [{}] ", now.format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(256);

    let data_dir = mixer_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("mixer.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,mixer_daemon=debug,mixer_core=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let sources = resolve_sources(&config.channels)?;
    if sources.is_empty() {
        anyhow::bail!(
            "no audio sources: put *.mp3 files in {:?} or list them under [channels]",
            config.channels.audio_dir
        );
    }

    // One mpv process per channel
    let mut pool = Vec::with_capacity(sources.len());
    let mut drivers = Vec::with_capacity(sources.len());
    for (index, source) in sources.into_iter().enumerate() {
        let channel = mpv::MpvChannel::spawn(index).await?;
        drivers.push(channel.driver());
        info!("channel {}: {} ({})", index, source.name, source.source);
        pool.push((source, channel));
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut engine = CrossfadeEngine::new(
        pool,
        EngineSettings::from(&config.mixer),
        Arc::clone(&clock),
    )?;
    engine.load().await;

    let mixer_core = core::MixerCore::new(
        engine,
        &config.render,
        Duration::from_millis(config.mixer.frame_interval_ms),
        clock,
        broadcast_tx.clone(),
    );
    let state_manager = mixer_core.state_manager();

    // All external inputs funnel into MixerCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::MixerEvent>(256);

    if config.socket.enabled {
        let _socket_handle = socket::start_server(
            config.socket.bind_address.clone(),
            config.socket.port,
            state_manager.clone(),
            event_tx.clone(),
            broadcast_tx.clone(),
        );
    }

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(core::MixerEvent::Shutdown).await;
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    info!("Mixer initialised, running event loop");
    mixer_core.run(event_rx).await?;

    for driver in drivers {
        driver.lock().await.kill().await;
    }
    info!("Mixer stopped");

    Ok(())
}
