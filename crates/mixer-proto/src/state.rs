use crate::protocol::MixerSnapshot;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared read model of the mixer.
///
/// Only the mixer loop publishes; socket and HTTP tasks read.  Nothing here
/// is persisted: a restarted mixer starts from a fresh snapshot.
pub struct StateManager {
    state: Arc<RwLock<MixerSnapshot>>,
}

impl StateManager {
    pub fn new(initial: MixerSnapshot) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
        }
    }

    pub async fn get_state(&self) -> MixerSnapshot {
        self.state.read().await.clone()
    }

    /// Replace the snapshot if it differs from the current one.  Returns the
    /// new revision when something changed.
    pub async fn publish(&self, mut snapshot: MixerSnapshot) -> Option<u64> {
        let mut state = self.state.write().await;
        snapshot.rev = state.rev;
        if *state == snapshot {
            return None;
        }
        snapshot.rev = state.rev + 1;
        *state = snapshot;
        Some(state.rev)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(MixerSnapshot::default())
    }
}
