//! Displayed bar levels.
//!
//! The display shows selection, not the instantaneous gain: the moment a
//! crossfade starts the target's bar heads for its final level and every
//! other bar heads for zero, each at its own rise/fall speed.

use crate::engine::MixerState;
use mixer_proto::config::RenderConfig;
use mixer_proto::protocol::DisplayUpdate;
use std::time::Instant;

/// Target display percent per channel for the current state.
pub fn display_targets(state: &MixerState, gains: &[f32]) -> Vec<f32> {
    match &state.fade {
        Some(fade) => (0..gains.len())
            .map(|i| {
                if i == fade.to {
                    fade.target_gain * 100.0
                } else {
                    0.0
                }
            })
            .collect(),
        None => gains.iter().map(|g| g * 100.0).collect(),
    }
}

#[derive(Debug, Clone)]
pub struct IntensityRenderer {
    displayed: Vec<f32>,
    rise_per_sec: f32,
    fall_per_sec: f32,
    last_frame: Option<Instant>,
}

impl IntensityRenderer {
    pub fn new(channel_count: usize, config: &RenderConfig) -> Self {
        Self {
            displayed: vec![0.0; channel_count],
            rise_per_sec: config.rise_per_sec,
            fall_per_sec: config.fall_per_sec,
            last_frame: None,
        }
    }

    pub fn displayed(&self) -> &[f32] {
        &self.displayed
    }

    /// Move every bar toward its target and return the ones that moved.
    pub fn update(&mut self, targets: &[f32], now: Instant) -> Vec<DisplayUpdate> {
        let dt = self
            .last_frame
            .map(|t| now.saturating_duration_since(t).as_secs_f32())
            .unwrap_or(0.0);
        self.last_frame = Some(now);

        let mut updates = Vec::new();
        for (i, (shown, target)) in self.displayed.iter_mut().zip(targets).enumerate() {
            let target = target.clamp(0.0, 100.0);
            if *shown == target {
                continue;
            }
            let speed = if target > *shown {
                self.rise_per_sec
            } else {
                self.fall_per_sec
            };
            let next = if speed <= 0.0 {
                target
            } else if target > *shown {
                (*shown + speed * dt).min(target)
            } else {
                (*shown - speed * dt).max(target)
            };
            if next != *shown {
                *shown = next;
                updates.push(DisplayUpdate {
                    channel_index: i,
                    display_percent: next,
                });
            }
        }
        updates
    }
}
