use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mixer: MixerConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub socket: SocketConfig,
}

/// What to do with a transition request that arrives while a fade is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Ignore it; the caller retries after completion.
    #[default]
    Drop,
    /// Remember the most recent one and apply it when the fade completes.
    Latest,
}

/// Base the radio clock counts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockAnchor {
    /// Seconds since the mixer started.
    #[default]
    Startup,
    /// Seconds since the Unix epoch, so separate processes share phase.
    WallClock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixerConfig {
    /// Crossfade length between two channels.
    #[serde(default = "default_fade_duration_ms")]
    pub fade_duration_ms: u64,
    /// Length of the Silence Guard's recovery ramp.
    #[serde(default = "default_ramp_duration_ms")]
    pub ramp_duration_ms: u64,
    /// Quiet period before the Silence Guard checks for total silence.
    #[serde(default = "default_quiet_delay_ms")]
    pub quiet_delay_ms: u64,
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
    /// Gain the Silence Guard restores.
    #[serde(default = "default_gain")]
    pub default_gain: f32,
    /// Gains at or below this count as silent.
    #[serde(default = "default_silence_epsilon")]
    pub silence_epsilon: f32,
    /// Quantize requested levels to this many steps above zero; 0 keeps them continuous.
    #[serde(default)]
    pub gain_steps: u32,
    /// Levels a tap on the active channel cycles through.
    #[serde(default = "default_tap_levels")]
    pub tap_levels: Vec<f32>,
    #[serde(default)]
    pub busy_policy: BusyPolicy,
    #[serde(default)]
    pub clock_anchor: ClockAnchor,
    /// Period of the per-frame update loop.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

/// Display bar animation speeds, in percent per second. 0 jumps straight to target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_rise_per_sec")]
    pub rise_per_sec: f32,
    #[serde(default = "default_fall_per_sec")]
    pub fall_per_sec: f32,
}

/// Where channel sources come from.
///
/// Priority: `sources` (explicit list), then `channels_toml`, then every
/// `*.mp3` in `audio_dir` sorted by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_channel_count")]
    pub count: usize,
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default = "default_channels_toml")]
    pub channels_toml: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_socket_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_socket_port")]
    pub port: u16,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            fade_duration_ms: default_fade_duration_ms(),
            ramp_duration_ms: default_ramp_duration_ms(),
            quiet_delay_ms: default_quiet_delay_ms(),
            metadata_timeout_ms: default_metadata_timeout_ms(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            default_gain: default_gain(),
            silence_epsilon: default_silence_epsilon(),
            gain_steps: 0,
            tap_levels: default_tap_levels(),
            busy_policy: BusyPolicy::default(),
            clock_anchor: ClockAnchor::default(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            rise_per_sec: default_rise_per_sec(),
            fall_per_sec: default_fall_per_sec(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            count: default_channel_count(),
            audio_dir: default_audio_dir(),
            sources: Vec::new(),
            channels_toml: default_channels_toml(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            enabled: default_socket_enabled(),
            bind_address: default_bind_address(),
            port: default_socket_port(),
        }
    }
}

fn default_fade_duration_ms() -> u64 {
    2000
}

fn default_ramp_duration_ms() -> u64 {
    1000
}

fn default_quiet_delay_ms() -> u64 {
    3000
}

fn default_metadata_timeout_ms() -> u64 {
    5000
}

fn default_readiness_timeout_ms() -> u64 {
    5000
}

const MAX_SILENCE_EPSILON: f32 = 0.1;
const MIN_RECOVERY_GAIN: f32 = 0.05;

fn default_gain() -> f32 {
    0.75
}

fn default_silence_epsilon() -> f32 {
    1e-4
}

fn default_tap_levels() -> Vec<f32> {
    vec![0.25, 0.5, 0.75, 1.0, 0.0]
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_rise_per_sec() -> f32 {
    400.0
}

fn default_fall_per_sec() -> f32 {
    150.0
}

fn default_channel_count() -> usize {
    4
}

fn default_audio_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Some(dir) = platform::portable_dir("audio") {
            return dir;
        }
    }

    platform::data_dir().join("audio")
}

fn default_channels_toml() -> PathBuf {
    platform::config_dir().join("channels.toml")
}

fn default_http_enabled() -> bool {
    true
}

fn default_socket_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    5000
}

fn default_socket_port() -> u16 {
    platform::CONTROL_TCP_PORT
}

impl Config {
    /// Load from the default location, writing defaults there on first run.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config.sanitized())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// `PORT` overrides the HTTP port, as hosting platforms expect.
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.http.port = port;
        }
    }

    /// Clamp values that would break the mixer's invariants.
    fn sanitized(mut self) -> Self {
        let m = &mut self.mixer;
        if !m.silence_epsilon.is_finite() {
            m.silence_epsilon = default_silence_epsilon();
        }
        m.silence_epsilon = m.silence_epsilon.clamp(0.0, MAX_SILENCE_EPSILON);
        // Recovery must land clearly above the silence threshold.
        let min_gain = (m.silence_epsilon * 4.0).max(MIN_RECOVERY_GAIN);
        if m.default_gain.is_nan() {
            m.default_gain = default_gain();
        }
        m.default_gain = m.default_gain.clamp(min_gain, 1.0);
        m.frame_interval_ms = m.frame_interval_ms.max(1);
        m.tap_levels.retain(|l| l.is_finite());
        for level in &mut m.tap_levels {
            *level = level.clamp(0.0, 1.0);
        }
        if m.tap_levels.is_empty() {
            m.tap_levels = default_tap_levels();
        }
        self.render.rise_per_sec = self.render.rise_per_sec.max(0.0);
        self.render.fall_per_sec = self.render.fall_per_sec.max(0.0);
        self.channels.count = self.channels.count.max(1);
        self
    }
}
