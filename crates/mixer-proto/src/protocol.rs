use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this in `Hello` and can refuse to talk to an
/// incompatible mixer.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a UI client to the mixer.
///
/// UI code normalizes taps and drags into these; the mixer never sees raw
/// pointer input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Make `channel_idx` audible at `level` (0.0..=1.0).
    Select { channel_idx: usize, level: f32 },
    /// Discrete tap: cycles the active channel's level, or selects another channel.
    Tap { channel_idx: usize },
    /// A continuous drag started; the silence watchdog holds off until it ends.
    DragStart { channel_idx: usize },
    /// The drag ended at `level`.
    DragEnd { channel_idx: usize, level: f32 },
    GetState,
}

/// Messages sent from the mixer to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full snapshot.
    Hello {
        protocol_version: u32,
        rev: u64,
        state: MixerSnapshot,
    },
    State {
        data: MixerSnapshot,
    },
    /// Per-frame bar levels for channels whose displayed value moved.
    Display {
        updates: Vec<DisplayUpdate>,
    },
    Log {
        message: String,
    },
}

/// One displayed intensity value for an external renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayUpdate {
    pub channel_index: usize,
    /// 0.0..=100.0
    pub display_percent: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FadeKind {
    /// User-requested switch from one channel to another.
    Crossfade,
    /// Silence watchdog bringing a channel back up; nothing fades out.
    Recovery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FadeInfo {
    pub from: Option<usize>,
    pub to: usize,
    pub target_gain: f32,
    pub kind: FadeKind,
    /// 0.0..=1.0
    pub progress: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChannelSnapshot {
    pub index: usize,
    pub name: String,
    pub source: String,
    pub duration_secs: Option<f64>,
    pub gain: f32,
    pub playing: bool,
    pub position_secs: f64,
    #[serde(default)]
    pub display_percent: f32,
}

/// Read model of the whole mixer.  `rev` increases on every publish so
/// clients can detect missed updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MixerSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub channels: Vec<ChannelSnapshot>,
    pub active: usize,
    pub fading: Option<FadeInfo>,
}

impl MixerSnapshot {
    pub fn is_silent(&self, epsilon: f32) -> bool {
        self.channels.iter().all(|c| c.gain <= epsilon)
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    /// 4-byte big-endian length prefix followed by the JSON body.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decode one frame from the front of `data`, returning it with the
    /// number of bytes consumed.
    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
