//! Silence watchdog.
//!
//! Every state-changing event re-arms a deadline `quiet_delay` ahead.  When
//! the deadline passes with no fade running and no drag in progress, and
//! every channel is at or below `epsilon`, the guard names a channel to bring
//! back: the one after the channel that went silent last, wrapping to 0.

use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SilenceGuard {
    quiet_delay: Duration,
    epsilon: f32,
    deadline: Option<Instant>,
    dragging: bool,
    last_silenced: Option<usize>,
}

impl SilenceGuard {
    pub fn new(quiet_delay: Duration, epsilon: f32) -> Self {
        Self {
            quiet_delay,
            epsilon,
            deadline: None,
            dragging: false,
            last_silenced: None,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        if !self.dragging {
            self.deadline = Some(now + self.quiet_delay);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Live input owns the levels until the gesture ends.
    pub fn begin_drag(&mut self) {
        self.dragging = true;
        self.deadline = None;
    }

    /// Debounce: check again `quiet_delay` after the gesture ends.
    pub fn end_drag(&mut self, now: Instant) {
        self.dragging = false;
        self.arm(now);
    }

    pub fn note_silenced(&mut self, index: usize) {
        self.last_silenced = Some(index);
    }

    pub fn is_silent(&self, gains: &[f32]) -> bool {
        gains.iter().all(|g| *g <= self.epsilon)
    }

    pub fn fallback(&self, channel_count: usize) -> usize {
        match self.last_silenced {
            Some(i) if channel_count > 0 => (i + 1) % channel_count,
            _ => 0,
        }
    }

    /// Returns the channel to restore if the deadline has passed and the
    /// mixer is silent.  A fired deadline is consumed either way.
    pub fn poll(&mut self, now: Instant, gains: &[f32], fade_active: bool) -> Option<usize> {
        if self.dragging || fade_active || gains.is_empty() {
            return None;
        }
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.deadline = None;

        if self.is_silent(gains) {
            Some(self.fallback(gains.len()))
        } else {
            debug!("silence guard: audible, nothing to do");
            None
        }
    }
}
