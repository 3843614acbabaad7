#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use mixer_core::{AudioChannel, CrossfadeEngine, EngineSettings, ManualClock};
use mixer_proto::config::{BusyPolicy, ClockAnchor};
use mixer_proto::sources::ChannelSource;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded control call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetSource(String),
    Seek(f64),
    Play,
    Pause,
    SetGain(f32),
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

#[derive(Debug, Clone, Copy)]
pub enum Metadata {
    Known(f64),
    Missing,
    Hang,
}

#[derive(Debug, Clone, Copy)]
pub enum Start {
    Ok,
    Fail,
    Hang,
}

/// In-memory `AudioChannel` that records every call.
pub struct MockChannel {
    log: CallLog,
    metadata: Metadata,
    start: Start,
}

impl MockChannel {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            metadata: Metadata::Known(duration_secs),
            start: Start::Ok,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_start(mut self, start: Start) -> Self {
        self.start = start;
        self
    }

    pub fn log(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    fn record(&self, call: Call) {
        self.log.lock().unwrap().push(call);
    }
}

#[async_trait]
impl AudioChannel for MockChannel {
    async fn set_source(&self, source: &str) -> anyhow::Result<()> {
        self.record(Call::SetSource(source.to_string()));
        Ok(())
    }

    async fn duration(&self) -> anyhow::Result<Option<f64>> {
        match self.metadata {
            Metadata::Known(d) => Ok(Some(d)),
            Metadata::Missing => Ok(None),
            Metadata::Hang => std::future::pending().await,
        }
    }

    async fn seek(&self, secs: f64) -> anyhow::Result<()> {
        self.record(Call::Seek(secs));
        Ok(())
    }

    async fn play(&self) -> anyhow::Result<()> {
        match self.start {
            Start::Ok => {
                self.record(Call::Play);
                Ok(())
            }
            Start::Fail => Err(anyhow!("autoplay blocked until user gesture")),
            Start::Hang => std::future::pending().await,
        }
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.record(Call::Pause);
        Ok(())
    }

    async fn set_gain(&self, gain: f32) -> anyhow::Result<()> {
        self.record(Call::SetGain(gain));
        Ok(())
    }
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        fade_duration: Duration::from_millis(2000),
        ramp_duration: Duration::from_millis(1000),
        quiet_delay: Duration::from_millis(3000),
        metadata_timeout: Duration::from_millis(50),
        readiness_timeout: Duration::from_millis(50),
        default_gain: 0.75,
        silence_epsilon: 1e-4,
        gain_steps: 0,
        tap_levels: vec![0.25, 0.5, 0.75, 1.0, 0.0],
        busy_policy: BusyPolicy::Drop,
        clock_anchor: ClockAnchor::Startup,
    }
}

pub struct Rig {
    pub engine: CrossfadeEngine<MockChannel>,
    pub clock: ManualClock,
    pub logs: Vec<CallLog>,
}

impl Rig {
    pub async fn new(channels: Vec<MockChannel>, settings: EngineSettings) -> Self {
        super::init_tracing();
        let clock = ManualClock::new();
        let logs = channels.iter().map(|c| c.log()).collect();
        let pool = channels
            .into_iter()
            .enumerate()
            .map(|(i, c)| (ChannelSource::from_source(format!("/loops/{i}.mp3")), c))
            .collect();
        let mut engine = CrossfadeEngine::new(pool, settings, Arc::new(clock.clone()))
            .expect("non-empty pool");
        engine.load().await;
        Self {
            engine,
            clock,
            logs,
        }
    }

    /// `n` well-behaved channels, all 40 s long.
    pub async fn with_channels(n: usize) -> Self {
        Self::new((0..n).map(|_| MockChannel::new(40.0)).collect(), settings()).await
    }

    pub async fn advance_and_tick(&mut self, ms: u64) -> bool {
        self.clock.advance_ms(ms);
        self.engine.tick().await
    }

    pub fn calls(&self, channel: usize) -> Vec<Call> {
        self.logs[channel].lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        for log in &self.logs {
            log.lock().unwrap().clear();
        }
    }

    pub fn seeks(&self, channel: usize) -> Vec<f64> {
        self.calls(channel)
            .into_iter()
            .filter_map(|c| match c {
                Call::Seek(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn gains(&self) -> Vec<f32> {
        self.engine.registry().gains()
    }
}

pub fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}
