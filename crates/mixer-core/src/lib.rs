//! Playback-continuity core of the radio mixer.
//!
//! The crate owns no processes, sockets or files.  It drives audio through
//! the [`channel::AudioChannel`] trait and reads time through
//! [`clock::Clock`], so the whole state machine runs under a manual clock in
//! tests.

pub mod channel;
pub mod clock;
pub mod engine;
pub mod error;
pub mod guard;
pub mod intensity;

pub use channel::{AudioChannel, Channel, ChannelRegistry};
pub use clock::{Clock, ManualClock, RadioClock, SystemClock};
pub use engine::{CrossfadeEngine, EngineSettings, Fade, MixerState, RejectReason, TransitionOutcome};
pub use error::MixerError;
pub use guard::SilenceGuard;
pub use intensity::IntensityRenderer;
