//! Channel pool: the audio handles plus what the mixer knows about each one.

use crate::clock::RadioClock;
use crate::error::MixerError;
use async_trait::async_trait;
use mixer_proto::sources::ChannelSource;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Playback control for one looping track.
///
/// Implementations talk to a real player; the mixer only ever calls these six
/// operations.  Gains are linear, 0.0..=1.0.
#[async_trait]
pub trait AudioChannel: Send + Sync {
    async fn set_source(&self, source: &str) -> anyhow::Result<()>;

    /// Wait for the track length.  `Ok(None)` means the source has none
    /// (e.g. a live stream).  The caller bounds the wait.
    async fn duration(&self) -> anyhow::Result<Option<f64>>;

    async fn seek(&self, secs: f64) -> anyhow::Result<()>;

    /// Start playback.  Resolves once audio is actually advancing.
    async fn play(&self) -> anyhow::Result<()>;

    async fn pause(&self) -> anyhow::Result<()>;

    async fn set_gain(&self, gain: f32) -> anyhow::Result<()>;
}

pub struct Channel<C> {
    pub index: usize,
    pub name: String,
    pub source: String,
    duration: Option<f64>,
    /// First metadata wait timed out; later lookups only peek.
    metadata_missed: bool,
    gain: f32,
    playing: bool,
    position: f64,
    position_at: Option<Instant>,
    handle: C,
}

impl<C> Channel<C> {
    fn new(index: usize, source: ChannelSource, handle: C) -> Self {
        Self {
            index,
            name: source.name,
            source: source.source,
            duration: None,
            metadata_missed: false,
            gain: 0.0,
            playing: false,
            position: 0.0,
            position_at: None,
            handle,
        }
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    fn advance(&mut self, now: Instant) {
        if self.playing {
            if let Some(at) = self.position_at {
                self.position += now.saturating_duration_since(at).as_secs_f64();
                if let Some(d) = self.duration {
                    self.position = self.position.rem_euclid(d);
                }
            }
        }
        self.position_at = Some(now);
    }
}

/// Fixed pool of channels.  Channels are created once and never removed.
pub struct ChannelRegistry<C> {
    channels: Vec<Channel<C>>,
    clock: RadioClock,
    metadata_timeout: Duration,
}

impl<C: AudioChannel> ChannelRegistry<C> {
    pub fn new(
        channels: Vec<(ChannelSource, C)>,
        clock: RadioClock,
        metadata_timeout: Duration,
    ) -> Self {
        let channels = channels
            .into_iter()
            .enumerate()
            .map(|(i, (source, handle))| Channel::new(i, source, handle))
            .collect();
        Self {
            channels,
            clock,
            metadata_timeout,
        }
    }

    /// Hand every channel its source, paused and silent.  A channel whose
    /// source fails stays in the pool; it will fail again when started.
    pub async fn load_sources(&mut self) {
        for ch in &self.channels {
            match ch.handle.set_source(&ch.source).await {
                Ok(()) => debug!("channel {}: source {}", ch.index, ch.source),
                Err(e) => warn!("channel {}: failed to load {}: {}", ch.index, ch.source, e),
            }
            if let Err(e) = ch.handle.set_gain(0.0).await {
                warn!("channel {}: set_gain failed: {}", ch.index, e);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Channel<C>> {
        self.channels.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel<C>> {
        self.channels.iter()
    }

    pub fn gains(&self) -> Vec<f32> {
        self.channels.iter().map(|c| c.gain).collect()
    }

    pub fn check_index(&self, index: usize) -> Result<(), MixerError> {
        if index < self.channels.len() {
            Ok(())
        } else {
            Err(MixerError::ChannelOutOfRange {
                index,
                count: self.channels.len(),
            })
        }
    }

    /// Track length of channel `index`, waiting for metadata the first time.
    ///
    /// Never fails: an unknown duration just means offset 0 later on.  After
    /// one timed-out wait, later calls only check whether it arrived since.
    pub async fn resolve_duration(&mut self, index: usize) -> Option<f64> {
        let timeout = self.metadata_timeout;
        let ch = self.channels.get_mut(index)?;
        if ch.duration.is_some() {
            return ch.duration;
        }

        let wait = if ch.metadata_missed {
            Duration::ZERO
        } else {
            timeout
        };
        match tokio::time::timeout(wait, ch.handle.duration()).await {
            Ok(Ok(Some(d))) if d.is_finite() && d > 0.0 => {
                info!("channel {}: duration {:.2}s", index, d);
                ch.duration = Some(d);
            }
            Ok(Ok(other)) => {
                warn!("channel {}: unusable duration {:?}, using offset 0", index, other);
                ch.metadata_missed = true;
            }
            Ok(Err(e)) => {
                warn!("channel {}: metadata error: {}, using offset 0", index, e);
                ch.metadata_missed = true;
            }
            Err(_) => {
                if !ch.metadata_missed {
                    warn!("{}", MixerError::MetadataTimeout { index, timeout });
                }
                ch.metadata_missed = true;
            }
        }
        ch.duration
    }

    /// Radio-clock position for channel `index` at `now`.  Pure.
    pub fn compute_offset(&self, index: usize, now: Instant) -> f64 {
        let duration = self.channels.get(index).and_then(|c| c.duration);
        self.clock.offset_for(duration, now)
    }

    pub fn advance_positions(&mut self, now: Instant) {
        for ch in &mut self.channels {
            ch.advance(now);
        }
    }

    /// Seek to the radio-clock offset and start playing at gain 0, waiting
    /// at most `ready_timeout` for audio to flow.  On failure the channel is
    /// paused again.
    pub(crate) async fn start(
        &mut self,
        index: usize,
        now: Instant,
        ready_timeout: Duration,
    ) -> Result<(), MixerError> {
        self.check_index(index)?;
        let offset = self.compute_offset(index, now);
        let ch = &mut self.channels[index];

        ch.gain = 0.0;
        if let Err(e) = ch.handle.set_gain(0.0).await {
            warn!("channel {}: set_gain failed: {}", index, e);
        }
        if let Err(e) = ch.handle.seek(offset).await {
            // A failed seek only costs phase alignment.
            warn!("channel {}: seek to {:.2}s failed: {}", index, offset, e);
        }

        let started = match tokio::time::timeout(ready_timeout, ch.handle.play()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MixerError::Playback {
                index,
                source: e.into(),
            }),
            Err(_) => Err(MixerError::PlaybackTimeout {
                index,
                timeout: ready_timeout,
            }),
        };

        match started {
            Ok(()) => {
                debug!("channel {}: playing from {:.2}s", index, offset);
                ch.playing = true;
                ch.position = offset;
                ch.position_at = Some(now);
                Ok(())
            }
            Err(e) => {
                let _ = ch.handle.pause().await;
                ch.playing = false;
                Err(e)
            }
        }
    }

    pub(crate) async fn stop(&mut self, index: usize) {
        if let Some(ch) = self.channels.get_mut(index) {
            if let Err(e) = ch.handle.pause().await {
                warn!("channel {}: pause failed: {}", index, e);
            }
            ch.playing = false;
        }
    }

    /// Set the model gain without touching the handle.
    pub(crate) fn set_gain_local(&mut self, index: usize, gain: f32) {
        if let Some(ch) = self.channels.get_mut(index) {
            ch.gain = gain.clamp(0.0, 1.0);
        }
    }

    /// Push the model gain of `index` to its handle.
    pub(crate) async fn push_gain(&self, index: usize) {
        if let Some(ch) = self.channels.get(index) {
            if let Err(e) = ch.handle.set_gain(ch.gain).await {
                warn!("channel {}: set_gain failed: {}", index, e);
            }
        }
    }

    /// Bookkeeping only: a reactivated channel still seeks by radio clock.
    pub(crate) fn snap_position(&mut self, index: usize, to: usize) {
        let Some(position) = self.channels.get(to).map(|c| c.position) else {
            return;
        };
        if let Some(ch) = self.channels.get_mut(index) {
            ch.position = match ch.duration {
                Some(d) => position.rem_euclid(d),
                None => position,
            };
        }
    }

    pub(crate) fn playing_indices(&self) -> Vec<usize> {
        self.channels
            .iter()
            .filter(|c| c.playing)
            .map(|c| c.index)
            .collect()
    }
}
