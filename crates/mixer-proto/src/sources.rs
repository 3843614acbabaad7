//! Channel source discovery.
//!
//! A channel pool is built from, in order of priority:
//!   1. `channels.sources` in config.toml (m3u playlists in that list are expanded),
//!   2. a `channels.toml` file with `[[channel]]` tables,
//!   3. every `*.mp3` in `channels.audio_dir`, sorted by file name and dealt
//!      round-robin onto `channels.count` slots.
//!
//! Options 1 and 2 define the pool exactly; `count` only shapes option 3.

use crate::config::ChannelsConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSource {
    pub name: String,
    /// Path or URL handed to the player.
    pub source: String,
}

impl ChannelSource {
    pub fn from_source(source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            name: display_name(&source),
            source,
        }
    }
}

pub fn resolve_sources(config: &ChannelsConfig) -> anyhow::Result<Vec<ChannelSource>> {
    if !config.sources.is_empty() {
        let mut channels = Vec::new();
        for entry in &config.sources {
            if is_playlist(entry) {
                channels.extend(load_channels_from_m3u(Path::new(entry))?);
            } else {
                channels.push(ChannelSource::from_source(entry.clone()));
            }
        }
        info!("channels: {} from config sources", channels.len());
        return non_empty(channels, "config sources");
    }

    if config.channels_toml.exists() {
        let channels = load_channels_from_toml(&config.channels_toml)?;
        info!(
            "channels: {} from {}",
            channels.len(),
            config.channels_toml.display()
        );
        return non_empty(channels, "channels.toml");
    }

    let files = discover_audio_files(&config.audio_dir)?;
    info!(
        "channels: {} audio files in {}",
        files.len(),
        config.audio_dir.display()
    );
    non_empty(assign_round_robin(&files, config.count), "audio_dir")
}

fn non_empty(channels: Vec<ChannelSource>, origin: &str) -> anyhow::Result<Vec<ChannelSource>> {
    if channels.is_empty() {
        anyhow::bail!("no channel sources found in {}", origin);
    }
    Ok(channels)
}

/// `*.mp3` files directly inside `dir`, sorted by file name.
pub fn discover_audio_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("audio directory {} does not exist", dir.display());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("mp3"))
        })
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!("discovered {:?}", files);
    Ok(files)
}

/// Slot `i` plays `files[i % files.len()]`.
pub fn assign_round_robin(files: &[PathBuf], count: usize) -> Vec<ChannelSource> {
    if files.is_empty() {
        return Vec::new();
    }
    (0..count)
        .map(|i| ChannelSource::from_source(files[i % files.len()].display().to_string()))
        .collect()
}

fn is_playlist(entry: &str) -> bool {
    let lower = entry.to_ascii_lowercase();
    lower.ends_with(".m3u") || lower.ends_with(".m3u8")
}

fn display_name(source: &str) -> String {
    let tail = source.rsplit(['/', '\\']).next().unwrap_or(source);
    let stem = tail.rsplit_once('.').map(|(s, _)| s).unwrap_or(tail);
    if stem.is_empty() {
        source.to_string()
    } else {
        stem.to_string()
    }
}

pub fn parse_m3u_from_str(content: &str) -> Vec<ChannelSource> {
    let mut channels = Vec::new();
    let mut pending_name: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some(comma_idx) = rest.find(',') {
                pending_name = Some(rest[comma_idx + 1..].trim().to_string());
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let mut channel = ChannelSource::from_source(line);
        if let Some(name) = pending_name.take() {
            channel.name = name;
        }
        channels.push(channel);
    }

    channels
}

pub fn load_channels_from_m3u(path: &Path) -> anyhow::Result<Vec<ChannelSource>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_m3u_from_str(&content))
}

// ── TOML channel file ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TomlChannelFile {
    channel: Vec<TomlChannel>,
}

#[derive(Debug, Deserialize)]
struct TomlChannel {
    #[serde(default)]
    name: String,
    source: String,
}

pub fn load_channels_from_toml(path: &Path) -> anyhow::Result<Vec<ChannelSource>> {
    let content = std::fs::read_to_string(path)?;
    parse_channels_from_toml_str(&content)
}

pub fn parse_channels_from_toml_str(content: &str) -> anyhow::Result<Vec<ChannelSource>> {
    let file: TomlChannelFile = toml::from_str(content)?;
    let channels = file
        .channel
        .into_iter()
        .map(|c| {
            if c.name.is_empty() {
                ChannelSource::from_source(c.source)
            } else {
                ChannelSource {
                    name: c.name,
                    source: c.source,
                }
            }
        })
        .collect();
    Ok(channels)
}
