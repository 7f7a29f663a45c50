//! Immutable state snapshots

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;
use xshard_core::{Hash, XShardResult};

use crate::account::ShardState;

/// Immutable snapshot of a shard's state
///
/// The state can only enter by being captured (copied) and only leave as a
/// fresh owned copy, so a snapshot never aliases live shard state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    state: Arc<ShardState>,
    digest: Hash,
}

impl StateSnapshot {
    /// Capture a copy of live state
    pub fn capture(state: &ShardState) -> XShardResult<Self> {
        Self::from_owned(state.clone())
    }

    /// Take ownership of a state nobody else can reach
    pub fn from_owned(state: ShardState) -> XShardResult<Self> {
        let digest = state.digest()?;
        Ok(Self {
            state: Arc::new(state),
            digest,
        })
    }

    /// Read-only view of the snapshotted state
    pub fn state(&self) -> &ShardState {
        &self.state
    }

    /// Fresh, independently owned copy of the snapshotted state
    pub fn to_state(&self) -> ShardState {
        (*self.state).clone()
    }

    pub fn digest(&self) -> Hash {
        self.digest
    }

    /// Verify snapshot integrity
    pub fn verify(&self) -> bool {
        self.state.digest().map(|d| d == self.digest).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

impl Serialize for StateSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.state.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StateSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let state = ShardState::deserialize(deserializer)?;
        StateSnapshot::from_owned(state).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountRecord;

    fn sample() -> ShardState {
        ShardState::new()
            .with_account("a", AccountRecord::new(1000))
            .with_account("b", AccountRecord::new(2000))
    }

    #[test]
    fn test_capture_is_isolated_from_live_state() {
        let mut live = sample();
        let snapshot = StateSnapshot::capture(&live).unwrap();

        live.get_mut("a").unwrap().balance.0 = 1;
        assert_eq!(snapshot.state().get("a").unwrap().balance.0, 1000);
        assert!(snapshot.verify());
    }

    #[test]
    fn test_to_state_returns_independent_copy() {
        let snapshot = StateSnapshot::capture(&sample()).unwrap();
        let mut copy = snapshot.to_state();
        copy.get_mut("b").unwrap().balance.0 = 0;

        assert_eq!(snapshot.state(), &sample());
        assert_ne!(&copy, snapshot.state());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let snapshot = StateSnapshot::capture(&sample()).unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: StateSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, snapshot);
        assert_eq!(restored.digest(), snapshot.digest());
    }
}
