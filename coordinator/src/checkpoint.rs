//! Content-addressed shard state checkpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use xshard_core::{Hash, ShardId, TxId, XShardResult};
use xshard_crypto::hashing::hash_canonical;
use xshard_state::{ShardState, StateSnapshot};

#[derive(Serialize)]
struct CheckpointContent<'a> {
    shard_id: ShardId,
    state: &'a ShardState,
    timestamp: &'a DateTime<Utc>,
    transaction_id: &'a str,
    validator_did: Option<&'a str>,
}

/// Shard state captured before a cross-shard operation
///
/// The snapshot and the fields covered by `hash` are fixed at creation;
/// only the verification bookkeeping changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCheckpoint {
    shard_id: ShardId,
    state: StateSnapshot,
    timestamp: DateTime<Utc>,
    transaction_id: TxId,
    validator_did: Option<String>,
    #[serde(default)]
    pub verification_signatures: BTreeSet<String>,
    #[serde(default)]
    pub verified_by_governance: bool,
    hash: Hash,
}

impl StateCheckpoint {
    pub fn new(
        transaction_id: impl Into<TxId>,
        shard_id: ShardId,
        state: StateSnapshot,
        validator_did: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> XShardResult<Self> {
        let transaction_id = transaction_id.into();
        let hash = compute_hash(
            shard_id,
            &state,
            &timestamp,
            &transaction_id,
            validator_did.as_deref(),
        )?;

        Ok(Self {
            shard_id,
            state,
            timestamp,
            transaction_id,
            validator_did,
            verification_signatures: BTreeSet::new(),
            verified_by_governance: false,
            hash,
        })
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn snapshot(&self) -> &StateSnapshot {
        &self.state
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn validator_did(&self) -> Option<&str> {
        self.validator_did.as_deref()
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn signature_count(&self) -> usize {
        self.verification_signatures.len()
    }

    /// Recompute the content hash and compare it with the stored one
    pub fn verify_integrity(&self) -> bool {
        compute_hash(
            self.shard_id,
            &self.state,
            &self.timestamp,
            &self.transaction_id,
            self.validator_did.as_deref(),
        )
        .map(|h| h == self.hash)
        .unwrap_or(false)
    }
}

fn compute_hash(
    shard_id: ShardId,
    state: &StateSnapshot,
    timestamp: &DateTime<Utc>,
    transaction_id: &str,
    validator_did: Option<&str>,
) -> XShardResult<Hash> {
    hash_canonical(&CheckpointContent {
        shard_id,
        state: state.state(),
        timestamp,
        transaction_id,
        validator_did,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use xshard_core::now;
    use xshard_state::AccountRecord;

    fn snapshot() -> StateSnapshot {
        let state = ShardState::new()
            .with_account("a", AccountRecord::new(1000))
            .with_account("b", AccountRecord::new(2000));
        StateSnapshot::capture(&state).unwrap()
    }

    #[test]
    fn test_hash_is_deterministic() {
        let at = now();
        let a = StateCheckpoint::new("tx", ShardId(1), snapshot(), None, at).unwrap();
        let b = StateCheckpoint::new("tx", ShardId(1), snapshot(), None, at).unwrap();
        assert_eq!(a.hash(), b.hash());

        let signed =
            StateCheckpoint::new("tx", ShardId(1), snapshot(), Some("did:icn:v".into()), at)
                .unwrap();
        assert_ne!(a.hash(), signed.hash());
    }

    #[test]
    fn test_signatures_do_not_affect_hash() {
        let mut checkpoint = StateCheckpoint::new("tx", ShardId(1), snapshot(), None, now()).unwrap();
        checkpoint.verification_signatures.insert("did:icn:v".into());
        checkpoint.verified_by_governance = true;
        assert!(checkpoint.verify_integrity());
    }

    #[test]
    fn test_tampered_record_fails_integrity() {
        let checkpoint = StateCheckpoint::new("tx", ShardId(1), snapshot(), None, now()).unwrap();
        let mut value = serde_json::to_value(&checkpoint).unwrap();
        value["state"]["a"]["balance"] = serde_json::json!(1);

        let tampered: StateCheckpoint = serde_json::from_value(value).unwrap();
        assert!(!tampered.verify_integrity());
    }
}
