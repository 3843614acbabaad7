/// MixerCore: single-owner event loop around the crossfade engine.
///
/// Socket and HTTP tasks send `MixerEvent`s here; no other task touches the
/// engine or the channels.  A frame interval drives `CrossfadeEngine::tick`
/// and the intensity renderer.  After each change the snapshot is published
/// to the `StateManager` and a `BroadcastMessage::StateUpdated` goes out;
/// moving bars go out as `BroadcastMessage::Display`.
use std::sync::Arc;
use std::time::Duration;

use mixer_core::intensity::display_targets;
use mixer_core::{AudioChannel, Clock, CrossfadeEngine, IntensityRenderer, TransitionOutcome};
use mixer_proto::config::RenderConfig;
use mixer_proto::protocol::Command;
use mixer_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::BroadcastMessage;

/// Positions drift while nothing else changes; republish at this rate.
const POSITION_REFRESH: Duration = Duration::from_secs(1);

// ── MixerEvent ────────────────────────────────────────────────────────────────

/// All inputs into the MixerCore loop.
#[derive(Debug)]
pub enum MixerEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// Shutdown requested.
    Shutdown,
}

// ── MixerCore ─────────────────────────────────────────────────────────────────

pub struct MixerCore<C> {
    engine: CrossfadeEngine<C>,
    renderer: IntensityRenderer,
    clock: Arc<dyn Clock>,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    frame_interval: Duration,
}

impl<C: AudioChannel> MixerCore<C> {
    /// `clock` must be the one the engine was built with.
    pub fn new(
        engine: CrossfadeEngine<C>,
        render: &RenderConfig,
        frame_interval: Duration,
        clock: Arc<dyn Clock>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        let renderer = IntensityRenderer::new(engine.registry().len(), render);
        let state_manager = Arc::new(StateManager::new(engine.snapshot(renderer.displayed())));
        Self {
            engine,
            renderer,
            clock,
            state_manager,
            broadcast_tx,
            frame_interval: frame_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run until a `Shutdown` event arrives or every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<MixerEvent>) -> anyhow::Result<()> {
        info!(
            "MixerCore: starting event loop ({} channels, frame {:?})",
            self.engine.registry().len(),
            self.frame_interval
        );

        let mut frames = tokio::time::interval(self.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut positions = tokio::time::interval(POSITION_REFRESH);
        positions.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("MixerCore: event channel closed, shutting down");
                        break;
                    }
                    Some(MixerEvent::Shutdown) => {
                        info!("MixerCore: shutdown requested");
                        break;
                    }
                    Some(MixerEvent::ClientCommand(cmd)) => {
                        self.handle_command(cmd).await;
                        self.publish().await;
                    }
                },
                _ = frames.tick() => self.frame().await,
                _ = positions.tick() => self.publish().await,
            }
        }

        Ok(())
    }

    pub async fn handle_command(&mut self, cmd: Command) -> Option<TransitionOutcome> {
        debug!("MixerCore: command {:?}", cmd);
        let outcome = match cmd {
            Command::Select { channel_idx, level } => {
                Some(self.engine.request_transition(channel_idx, level).await)
            }
            Command::Tap { channel_idx } => Some(self.engine.tap(channel_idx).await),
            Command::DragStart { channel_idx } => {
                debug!("MixerCore: drag started on channel {}", channel_idx);
                self.engine.begin_drag();
                None
            }
            Command::DragEnd { channel_idx, level } => {
                self.engine.end_drag();
                Some(self.engine.request_transition(channel_idx, level).await)
            }
            // Answered by the socket layer from the published snapshot.
            Command::GetState => None,
        };
        if let Some(outcome) = outcome {
            debug!("MixerCore: outcome {:?}", outcome);
        }
        outcome
    }

    /// One frame: step the engine, then move the bars toward their targets.
    pub async fn frame(&mut self) {
        let changed = self.engine.tick().await;

        let targets = display_targets(self.engine.state(), &self.engine.registry().gains());
        let updates = self.renderer.update(&targets, self.clock.now());
        if !updates.is_empty() {
            let _ = self.broadcast_tx.send(BroadcastMessage::Display(updates));
        }

        if changed {
            self.publish().await;
        }
    }

    async fn publish(&mut self) {
        let snapshot = self.engine.snapshot(self.renderer.displayed());
        if self.state_manager.publish(snapshot).await.is_some() {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }
}
