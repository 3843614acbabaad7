//! Crossfade engine: the single owner of mixer state.
//!
//! ```text
//!            request_transition(i != active)
//!   Idle ───────────────────────────────────────▶ Fading
//!    ▲   (metadata + readiness waits, bounded)       │
//!    │                                               │ tick(): t = elapsed / duration
//!    └──────────────── t == 1: complete ◀────────────┘
//! ```
//!
//! At most one fade exists at a time.  Requests that arrive while fading are
//! dropped (or, with `BusyPolicy::Latest`, the last one is replayed after
//! completion).  A fade is never cancelled; the ramp is driven by elapsed
//! clock time, so dropped frames only make it coarser, never longer.
//!
//! The Silence Guard's recovery ramps run through the same fade record with
//! `from = None`, so they too block concurrent requests.

use crate::channel::{AudioChannel, ChannelRegistry};
use crate::clock::{Clock, RadioClock};
use crate::error::MixerError;
use crate::guard::SilenceGuard;
use mixer_proto::config::{BusyPolicy, ClockAnchor, MixerConfig};
use mixer_proto::protocol::{ChannelSnapshot, FadeInfo, FadeKind, MixerSnapshot};
use mixer_proto::sources::ChannelSource;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub fade_duration: Duration,
    pub ramp_duration: Duration,
    pub quiet_delay: Duration,
    pub metadata_timeout: Duration,
    pub readiness_timeout: Duration,
    pub default_gain: f32,
    pub silence_epsilon: f32,
    pub gain_steps: u32,
    pub tap_levels: Vec<f32>,
    pub busy_policy: BusyPolicy,
    pub clock_anchor: ClockAnchor,
}

impl From<&MixerConfig> for EngineSettings {
    fn from(c: &MixerConfig) -> Self {
        Self {
            fade_duration: Duration::from_millis(c.fade_duration_ms),
            ramp_duration: Duration::from_millis(c.ramp_duration_ms),
            quiet_delay: Duration::from_millis(c.quiet_delay_ms),
            metadata_timeout: Duration::from_millis(c.metadata_timeout_ms),
            readiness_timeout: Duration::from_millis(c.readiness_timeout_ms),
            default_gain: c.default_gain,
            silence_epsilon: c.silence_epsilon,
            gain_steps: c.gain_steps,
            tap_levels: c.tap_levels.clone(),
            busy_policy: c.busy_policy,
            clock_anchor: c.clock_anchor,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&MixerConfig::default())
    }
}

/// An in-flight gain ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fade {
    /// Channel ramping down; `None` when nothing audible is being replaced.
    /// Outgoing and incoming gains sum to `target_gain` only when this is
    /// `Some`; otherwise the incoming channel ramps up from silence alone.
    pub from: Option<usize>,
    pub to: usize,
    pub started_at: Instant,
    pub target_gain: f32,
    pub duration: Duration,
    pub kind: FadeKind,
}

impl Fade {
    /// Fraction of the ramp done at `now`, clamped to 0..=1.
    pub fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        (elapsed / self.duration.as_secs_f64()).clamp(0.0, 1.0) as f32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixerState {
    /// Always a valid channel index.
    pub active: usize,
    pub fade: Option<Fade>,
}

impl MixerState {
    pub fn is_fading(&self) -> bool {
        self.fade.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// A fade toward the target is now running.
    Started,
    /// Same channel, no fade: the gain was applied directly.
    Adjusted,
    /// Stored for replay when the running fade completes.
    Queued,
    /// The target could not start playing; state is unchanged.
    Abandoned,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    OutOfRange,
    FadeInProgress,
}

pub struct CrossfadeEngine<C> {
    registry: ChannelRegistry<C>,
    state: MixerState,
    guard: SilenceGuard,
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    queued: Option<(usize, f32)>,
}

impl<C: AudioChannel> CrossfadeEngine<C> {
    /// Build the engine over a fixed channel pool.  The radio clock's epoch
    /// and the silence guard's first deadline are taken from `clock` now.
    pub fn new(
        channels: Vec<(ChannelSource, C)>,
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MixerError> {
        if channels.is_empty() {
            return Err(MixerError::NoChannels);
        }
        let radio = RadioClock::start(clock.as_ref(), settings.clock_anchor);
        let registry = ChannelRegistry::new(channels, radio, settings.metadata_timeout);
        let mut guard = SilenceGuard::new(settings.quiet_delay, settings.silence_epsilon);
        guard.arm(clock.now());

        Ok(Self {
            registry,
            state: MixerState {
                active: 0,
                fade: None,
            },
            guard,
            settings,
            clock,
            queued: None,
        })
    }

    /// Hand every channel its source.  Call once before the first tick.
    pub async fn load(&mut self) {
        self.registry.load_sources().await;
    }

    pub fn state(&self) -> &MixerState {
        &self.state
    }

    pub fn registry(&self) -> &ChannelRegistry<C> {
        &self.registry
    }

    pub fn guard(&self) -> &SilenceGuard {
        &self.guard
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn gain(&self, index: usize) -> f32 {
        self.registry.get(index).map(|c| c.gain()).unwrap_or(0.0)
    }

    /// Clamp to 0..=1 and snap to the configured steps.
    pub fn quantize(&self, level: f32) -> f32 {
        let level = if level.is_nan() {
            0.0
        } else {
            level.clamp(0.0, 1.0)
        };
        match self.settings.gain_steps {
            0 => level,
            steps => (level * steps as f32).round() / steps as f32,
        }
    }

    /// Make `target` the audible channel at `level`.
    pub async fn request_transition(&mut self, target: usize, level: f32) -> TransitionOutcome {
        if let Err(e) = self.registry.check_index(target) {
            warn!("transition rejected: {}", e);
            return TransitionOutcome::Rejected(RejectReason::OutOfRange);
        }
        let gain = self.quantize(level);

        if self.state.is_fading() {
            return match self.settings.busy_policy {
                BusyPolicy::Drop => {
                    debug!("transition to {} dropped: fade in progress", target);
                    TransitionOutcome::Rejected(RejectReason::FadeInProgress)
                }
                BusyPolicy::Latest => {
                    debug!("transition to {} queued behind running fade", target);
                    self.queued = Some((target, gain));
                    TransitionOutcome::Queued
                }
            };
        }

        if target == self.state.active {
            return self.adjust_active(gain).await;
        }

        let from = self.state.active;
        self.begin_fade(
            Some(from),
            target,
            gain,
            self.settings.fade_duration,
            FadeKind::Crossfade,
        )
        .await
    }

    /// Discrete tap: on the active channel, step through the tap levels;
    /// on any other channel, select it at the loudest tap level.
    pub async fn tap(&mut self, index: usize) -> TransitionOutcome {
        let levels = &self.settings.tap_levels;
        let loudest = levels.iter().copied().fold(0.0_f32, f32::max);
        let level = if index == self.state.active && !self.state.is_fading() {
            let current = self.gain(index);
            levels
                .iter()
                .position(|l| (l - current).abs() < 1e-3)
                .map(|i| levels[(i + 1) % levels.len()])
                .unwrap_or_else(|| levels.first().copied().unwrap_or(loudest))
        } else {
            loudest
        };
        self.request_transition(index, level).await
    }

    pub fn begin_drag(&mut self) {
        self.guard.begin_drag();
    }

    pub fn end_drag(&mut self) {
        self.guard.end_drag(self.clock.now());
    }

    /// Per-frame update: advance positions, step the running fade, and let
    /// the silence guard start a recovery ramp.  Returns `true` if any gain
    /// or fade state changed.
    pub async fn tick(&mut self) -> bool {
        let now = self.clock.now();
        self.registry.advance_positions(now);

        if let Some(fade) = self.state.fade {
            self.step_fade(fade, now).await;
            return true;
        }

        let gains = self.registry.gains();
        match self.guard.poll(now, &gains, false) {
            Some(fallback) => {
                self.recover(fallback).await;
                true
            }
            None => false,
        }
    }

    async fn recover(&mut self, fallback: usize) -> TransitionOutcome {
        info!(
            "silence guard: all channels silent, restoring channel {}",
            fallback
        );
        self.begin_fade(
            None,
            fallback,
            self.settings.default_gain,
            self.settings.ramp_duration,
            FadeKind::Recovery,
        )
        .await
    }

    async fn step_fade(&mut self, fade: Fade, now: Instant) {
        let t = fade.progress(now);
        let g = fade.target_gain;

        // Both gains land in the model before any handle call, so a snapshot
        // taken between frames never sees a half-applied step.
        if let Some(from) = fade.from {
            self.registry.set_gain_local(from, g * (1.0 - t));
        }
        self.registry.set_gain_local(fade.to, g * t);

        if let Some(from) = fade.from {
            self.registry.push_gain(from).await;
        }
        self.registry.push_gain(fade.to).await;

        if t >= 1.0 {
            self.complete(fade, now).await;
        }
    }

    async fn complete(&mut self, fade: Fade, now: Instant) {
        if let Some(from) = fade.from {
            self.registry.stop(from).await;
            self.registry.snap_position(from, fade.to);
            self.guard.note_silenced(from);
        }
        if fade.target_gain <= self.settings.silence_epsilon {
            self.guard.note_silenced(fade.to);
        }
        self.state.active = fade.to;
        self.state.fade = None;
        self.guard.arm(now);
        info!(
            "{:?} complete: channel {} active at {:.2}",
            fade.kind, fade.to, fade.target_gain
        );

        if let Some((target, gain)) = self.queued.take() {
            debug!("replaying queued transition to {}", target);
            self.request_transition(target, gain).await;
        }

        // A fade that ended in silence is recovered now, not a quiet period later.
        let gains = self.registry.gains();
        if !self.state.is_fading() && !self.guard.is_dragging() && self.guard.is_silent(&gains) {
            let fallback = self.guard.fallback(gains.len());
            self.recover(fallback).await;
        }
    }

    /// Same channel, no fade: apply the gain at once.
    async fn adjust_active(&mut self, gain: f32) -> TransitionOutcome {
        let index = self.state.active;
        let now = self.clock.now();

        if !self.registry.get(index).is_some_and(|c| c.is_playing()) {
            self.registry.resolve_duration(index).await;
            let now = self.clock.now();
            if let Err(e) = self
                .registry
                .start(index, now, self.settings.readiness_timeout)
                .await
            {
                warn!("volume change abandoned: {}", e);
                return TransitionOutcome::Abandoned;
            }
        }

        self.registry.set_gain_local(index, gain);
        self.registry.push_gain(index).await;
        if gain <= self.settings.silence_epsilon {
            self.guard.note_silenced(index);
        }
        self.guard.arm(now);
        debug!("channel {} gain → {:.2}", index, gain);
        TransitionOutcome::Adjusted
    }

    async fn begin_fade(
        &mut self,
        from: Option<usize>,
        to: usize,
        gain: f32,
        duration: Duration,
        kind: FadeKind,
    ) -> TransitionOutcome {
        // Only an audible channel is faded out; anything else playing is
        // silent by invariant and can simply stop.
        let from = from.filter(|&i| {
            i != to
                && self
                    .registry
                    .get(i)
                    .is_some_and(|c| c.is_playing() && c.gain() > self.settings.silence_epsilon)
        });

        if !self.registry.get(to).is_some_and(|c| c.is_playing()) {
            self.registry.resolve_duration(to).await;
            let now = self.clock.now();
            if let Err(e) = self
                .registry
                .start(to, now, self.settings.readiness_timeout)
                .await
            {
                warn!("{:?} to channel {} abandoned: {}", kind, to, e);
                if kind == FadeKind::Recovery {
                    // Try the next channel on the following quiet period.
                    self.guard.note_silenced(to);
                }
                self.guard.arm(self.clock.now());
                return TransitionOutcome::Abandoned;
            }
        }

        // Stopped only once the target is known to play.
        for i in self.registry.playing_indices() {
            if i != to && Some(i) != from {
                self.registry.stop(i).await;
            }
        }

        let started_at = self.clock.now();
        self.state.fade = Some(Fade {
            from,
            to,
            started_at,
            target_gain: gain,
            duration,
            kind,
        });
        info!(
            "{:?} started: {:?} → {} at {:.2} over {:?}",
            kind, from, to, gain, duration
        );
        TransitionOutcome::Started
    }

    /// Serializable view of the current state.
    pub fn snapshot(&self, display: &[f32]) -> MixerSnapshot {
        let now = self.clock.now();
        let channels = self
            .registry
            .iter()
            .map(|c| ChannelSnapshot {
                index: c.index,
                name: c.name.clone(),
                source: c.source.clone(),
                duration_secs: c.duration(),
                gain: c.gain(),
                playing: c.is_playing(),
                position_secs: c.position(),
                display_percent: display.get(c.index).copied().unwrap_or(0.0),
            })
            .collect();
        MixerSnapshot {
            rev: 0,
            channels,
            active: self.state.active,
            fading: self.state.fade.map(|f| FadeInfo {
                from: f.from,
                to: f.to,
                target_gain: f.target_gain,
                kind: f.kind,
                progress: f.progress(now),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fade(duration_ms: u64) -> Fade {
        Fade {
            from: Some(0),
            to: 1,
            started_at: Instant::now(),
            target_gain: 1.0,
            duration: Duration::from_millis(duration_ms),
            kind: FadeKind::Crossfade,
        }
    }

    #[test]
    fn test_progress_is_clamped() {
        let f = fade(2000);
        assert_eq!(f.progress(f.started_at), 0.0);
        assert_eq!(f.progress(f.started_at + Duration::from_millis(1000)), 0.5);
        assert_eq!(f.progress(f.started_at + Duration::from_secs(60)), 1.0);
    }

    #[test]
    fn test_zero_duration_completes_at_once() {
        let f = fade(0);
        assert_eq!(f.progress(f.started_at), 1.0);
    }

    #[test]
    fn test_settings_from_config() {
        let config = MixerConfig {
            fade_duration_ms: 750,
            gain_steps: 4,
            ..MixerConfig::default()
        };
        let settings = EngineSettings::from(&config);
        assert_eq!(settings.fade_duration, Duration::from_millis(750));
        assert_eq!(settings.gain_steps, 4);
        assert_eq!(settings.default_gain, 0.75);
    }
}
