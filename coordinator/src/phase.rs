//! Per-shard phases of a cross-shard transaction

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use xshard_core::{Hash, ShardId, XShardResult};
use xshard_crypto::hashing::hash_canonical;

/// Status of a shard's phase
///
/// `Pending -> Prepared -> Committed`, with `Aborted` reachable from any
/// status and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Prepared,
    Committed,
    Aborted,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Prepared => "prepared",
            PhaseStatus::Committed => "committed",
            PhaseStatus::Aborted => "aborted",
        }
    }

    /// Whether `self -> next` is an edge of the phase state machine
    pub fn can_transition_to(&self, next: PhaseStatus) -> bool {
        matches!(
            (self, next),
            (PhaseStatus::Pending, PhaseStatus::Prepared)
                | (PhaseStatus::Prepared, PhaseStatus::Committed)
                | (PhaseStatus::Pending, PhaseStatus::Aborted)
                | (PhaseStatus::Prepared, PhaseStatus::Aborted)
                | (PhaseStatus::Committed, PhaseStatus::Aborted)
        )
    }
}

#[derive(Serialize)]
struct PhaseIdContent<'a> {
    transaction_id: &'a str,
    shard_id: ShardId,
    created_at: &'a DateTime<Utc>,
}

/// One shard's progress through the commit protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub phase_id: Hash,
    pub shard_id: ShardId,
    pub status: PhaseStatus,
    /// Time of the last accepted signature or status change
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub validation_signatures: BTreeSet<String>,
    #[serde(default)]
    pub did_attestations: BTreeSet<String>,
}

impl Phase {
    pub fn new(transaction_id: &str, shard_id: ShardId, created_at: DateTime<Utc>) -> XShardResult<Self> {
        let phase_id = hash_canonical(&PhaseIdContent {
            transaction_id,
            shard_id,
            created_at: &created_at,
        })?;

        Ok(Self {
            phase_id,
            shard_id,
            status: PhaseStatus::Pending,
            timestamp: created_at,
            validation_signatures: BTreeSet::new(),
            did_attestations: BTreeSet::new(),
        })
    }

    /// Record a validator signature and its attesting identity
    pub fn attest(&mut self, validator_id: &str, did: String, at: DateTime<Utc>) {
        self.validation_signatures.insert(validator_id.to_string());
        self.did_attestations.insert(did);
        self.timestamp = at;
    }

    pub fn has_quorum(&self, required: usize) -> bool {
        self.validation_signatures.len() >= required
    }

    /// Move to `next` if the state machine allows it
    pub fn transition(&mut self, next: PhaseStatus, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.timestamp = at;
        true
    }

    /// Seconds since the last event, if that exceeds `timeout`
    pub fn stale_for(&self, now: DateTime<Utc>, timeout: Duration) -> Option<i64> {
        let age = now - self.timestamp;
        (age > timeout).then(|| age.num_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xshard_core::now;

    #[test]
    fn test_state_machine_edges() {
        use PhaseStatus::*;
        assert!(Pending.can_transition_to(Prepared));
        assert!(Prepared.can_transition_to(Committed));
        assert!(!Pending.can_transition_to(Committed));
        assert!(!Committed.can_transition_to(Prepared));
        for next in [Pending, Prepared, Committed, Aborted] {
            assert!(!Aborted.can_transition_to(next));
        }
    }

    #[test]
    fn test_duplicate_signatures_collapse() {
        let mut phase = Phase::new("tx", ShardId(1), now()).unwrap();
        phase.attest("v1", "did:icn:1".into(), now());
        phase.attest("v1", "did:icn:1".into(), now());
        assert_eq!(phase.validation_signatures.len(), 1);
        assert!(!phase.has_quorum(2));

        phase.attest("v2", "did:icn:2".into(), now());
        assert!(phase.has_quorum(2));
    }

    #[test]
    fn test_phase_id_depends_on_shard() {
        let at = now();
        let a = Phase::new("tx", ShardId(1), at).unwrap();
        let b = Phase::new("tx", ShardId(2), at).unwrap();
        assert_ne!(a.phase_id, b.phase_id);
        assert_eq!(a.phase_id, Phase::new("tx", ShardId(1), at).unwrap().phase_id);
    }

    #[test]
    fn test_staleness() {
        let created = now() - Duration::hours(2);
        let phase = Phase::new("tx", ShardId(0), created).unwrap();
        assert!(phase.stale_for(now(), Duration::hours(1)).unwrap() >= 7200);
        assert!(phase.stale_for(now(), Duration::hours(3)).is_none());
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&PhaseStatus::Prepared).unwrap(),
            "\"prepared\""
        );
    }
}
