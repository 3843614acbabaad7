//! Time sources and the radio clock.
//!
//! The radio clock makes every channel look like a station that has been on
//! air since the epoch: a channel entered late starts at
//! `elapsed mod duration` instead of at zero.

use mixer_proto::config::ClockAnchor;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic time source used by the engine.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.  Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared time reference for channel offsets.  Fixed once, at engine
/// construction, and never mutated.
#[derive(Debug, Clone, Copy)]
pub struct RadioClock {
    epoch: Instant,
    /// Seconds already "on air" at `epoch`.
    anchor_secs: f64,
}

impl RadioClock {
    pub fn start(clock: &dyn Clock, anchor: ClockAnchor) -> Self {
        let anchor_secs = match anchor {
            ClockAnchor::Startup => 0.0,
            ClockAnchor::WallClock => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        };
        Self {
            epoch: clock.now(),
            anchor_secs,
        }
    }

    /// Seconds on air at `now`.  Instants before the epoch count as zero.
    pub fn elapsed_secs(&self, now: Instant) -> f64 {
        self.anchor_secs + now.saturating_duration_since(self.epoch).as_secs_f64()
    }

    /// Where a track of `duration` seconds is at `now`; 0 when the duration
    /// is unknown or unusable.
    pub fn offset_for(&self, duration: Option<f64>, now: Instant) -> f64 {
        match duration {
            Some(d) if d.is_finite() && d > 0.0 => self.elapsed_secs(now).rem_euclid(d),
            _ => 0.0,
        }
    }
}
