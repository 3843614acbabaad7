use std::time::Duration;

/// Failures inside the core.  Apart from `NoChannels` at construction none
/// of these reach a caller of the engine: they are logged and turned into a
/// degraded outcome.
#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error("no channels configured")]
    NoChannels,

    #[error("channel {index} out of range (pool has {count})")]
    ChannelOutOfRange { index: usize, count: usize },

    #[error("channel {index}: no metadata after {timeout:?}")]
    MetadataTimeout { index: usize, timeout: Duration },

    #[error("channel {index}: playback did not start within {timeout:?}")]
    PlaybackTimeout { index: usize, timeout: Duration },

    #[error("channel {index}: {source}")]
    Playback {
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
