//! Atomic, content-addressed state transitions
//!
//! A `StateTransition` records one old → new state change with its own
//! validate/apply/rollback lifecycle and a signature quorum. It is independent
//! of sharding; shard-level invariants are layered on top by callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info};
use xshard_core::{now, Hash, ShardId, TransitionViolation, XShardError, XShardResult};
use xshard_crypto::hashing::hash_canonical;

/// Generic state mapping a transition moves between
pub type StateMap = BTreeMap<String, Value>;

#[derive(Serialize)]
struct TransitionContent<'a> {
    old_state: &'a StateMap,
    new_state: &'a StateMap,
    shard_id: Option<ShardId>,
    timestamp: &'a DateTime<Utc>,
}

/// Persisted shape of a transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransitionRecord {
    pub transition_id: Hash,
    pub old_state: StateMap,
    pub new_state: StateMap,
    pub shard_id: Option<ShardId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub verified: bool,
    pub applied: bool,
    #[serde(default)]
    pub verification_signatures: BTreeSet<String>,
}

/// Atomic state change between two immutable state values
///
/// `apply` replaces `old_state` with `new_state`, and `rollback` copies
/// `old_state` back over `new_state`. After an `apply`, `old_state` no longer
/// holds the pre-transition value, so `rollback` cannot restore it.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    transition_id: Hash,
    old_state: Arc<StateMap>,
    new_state: Arc<StateMap>,
    shard_id: Option<ShardId>,
    timestamp: DateTime<Utc>,
    metadata: Map<String, Value>,
    verified: bool,
    applied: bool,
    verification_signatures: BTreeSet<String>,
}

impl StateTransition {
    pub fn new(
        old_state: StateMap,
        new_state: StateMap,
        shard_id: Option<ShardId>,
    ) -> XShardResult<Self> {
        Self::at(old_state, new_state, shard_id, now())
    }

    /// Create a transition stamped with an explicit time
    pub fn at(
        old_state: StateMap,
        new_state: StateMap,
        shard_id: Option<ShardId>,
        timestamp: DateTime<Utc>,
    ) -> XShardResult<Self> {
        let transition_id = compute_id(&old_state, &new_state, shard_id, &timestamp)?;
        let mut metadata = Map::new();
        metadata.insert("created_at".into(), Value::String(timestamp.to_rfc3339()));

        Ok(Self {
            transition_id,
            old_state: Arc::new(old_state),
            new_state: Arc::new(new_state),
            shard_id,
            timestamp,
            metadata,
            verified: false,
            applied: false,
            verification_signatures: BTreeSet::new(),
        })
    }

    pub fn transition_id(&self) -> Hash {
        self.transition_id
    }

    pub fn old_state(&self) -> &StateMap {
        &self.old_state
    }

    pub fn new_state(&self) -> &StateMap {
        &self.new_state
    }

    pub fn shard_id(&self) -> Option<ShardId> {
        self.shard_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn is_applied(&self) -> bool {
        self.applied
    }

    pub fn signatures(&self) -> &BTreeSet<String> {
        &self.verification_signatures
    }

    /// Mark the transition as verified so it may be applied
    pub fn mark_verified(&mut self) {
        self.verified = true;
    }

    /// Check key consistency, content id and the non-negativity invariant
    ///
    /// Non-negativity applies to every number in the new state, including
    /// numbers nested inside account records and arrays, not only top-level
    /// values. A record with a negative field of any kind is rejected.
    pub fn validate(&self) -> XShardResult<()> {
        if !self.old_state.keys().eq(self.new_state.keys()) {
            error!("Key mismatch between old and new states");
            return Err(TransitionViolation::AccountSetMismatch.into());
        }

        let computed = compute_id(
            &self.old_state,
            &self.new_state,
            self.shard_id,
            &self.timestamp,
        )?;
        if computed != self.transition_id {
            error!("Transition ID mismatch for {}", self.transition_id);
            return Err(TransitionViolation::IdMismatch {
                stored: self.transition_id.to_hex(),
                computed: computed.to_hex(),
            }
            .into());
        }

        for (key, value) in self.new_state.iter() {
            if let Some(path) = find_negative(key, value) {
                error!("Negative value for '{}' in new state", path);
                return Err(TransitionViolation::NegativeValue { key: path }.into());
            }
        }

        Ok(())
    }

    /// Apply the transition; requires a prior verification
    pub fn apply(&mut self) -> XShardResult<()> {
        if !self.verified {
            error!("Cannot apply unverified transition {}", self.transition_id);
            return Err(XShardError::TransitionNotVerified(self.transition_id.to_hex()));
        }

        self.old_state = Arc::clone(&self.new_state);
        self.applied = true;
        info!("Transition {} applied", self.transition_id);
        Ok(())
    }

    /// Roll back an applied transition by copying `old_state` over `new_state`
    pub fn rollback(&mut self) -> XShardResult<()> {
        if !self.applied {
            error!("Cannot roll back unapplied transition {}", self.transition_id);
            return Err(XShardError::TransitionNotApplied(self.transition_id.to_hex()));
        }

        self.new_state = Arc::clone(&self.old_state);
        self.applied = false;
        info!("Transition {} rolled back", self.transition_id);
        Ok(())
    }

    /// Record a validator signature; duplicates collapse
    pub fn add_signature(&mut self, validator: impl Into<String>) -> bool {
        let added = self.verification_signatures.insert(validator.into());
        if added {
            debug!("Signature added to transition {}", self.transition_id);
        }
        added
    }

    pub fn is_fully_verified(&self, required_signatures: usize) -> bool {
        self.verification_signatures.len() >= required_signatures
    }

    pub fn to_record(&self) -> StateTransitionRecord {
        StateTransitionRecord {
            transition_id: self.transition_id,
            old_state: (*self.old_state).clone(),
            new_state: (*self.new_state).clone(),
            shard_id: self.shard_id,
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
            verified: self.verified,
            applied: self.applied,
            verification_signatures: self.verification_signatures.clone(),
        }
    }

    /// Restore a transition, keeping the stored id so tampering stays detectable
    pub fn from_record(record: StateTransitionRecord) -> Self {
        Self {
            transition_id: record.transition_id,
            old_state: Arc::new(record.old_state),
            new_state: Arc::new(record.new_state),
            shard_id: record.shard_id,
            timestamp: record.timestamp,
            metadata: record.metadata,
            verified: record.verified,
            applied: record.applied,
            verification_signatures: record.verification_signatures,
        }
    }

    pub fn to_json(&self) -> XShardResult<String> {
        Ok(serde_json::to_string(&self.to_record())?)
    }

    pub fn from_json(json: &str) -> XShardResult<Self> {
        let record: StateTransitionRecord = serde_json::from_str(json)?;
        Ok(Self::from_record(record))
    }
}

fn compute_id(
    old_state: &StateMap,
    new_state: &StateMap,
    shard_id: Option<ShardId>,
    timestamp: &DateTime<Utc>,
) -> XShardResult<Hash> {
    hash_canonical(&TransitionContent {
        old_state,
        new_state,
        shard_id,
        timestamp,
    })
}

/// Path of the first negative number inside `value`, if any
fn find_negative(path: &str, value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            let negative = n.as_i64().map(|v| v < 0).unwrap_or(false)
                || n.as_f64().map(|v| v < 0.0).unwrap_or(false);
            negative.then(|| path.to_string())
        }
        Value::Object(map) => map
            .iter()
            .find_map(|(k, v)| find_negative(&format!("{}.{}", path, k), v)),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, v)| find_negative(&format!("{}[{}]", path, i), v)),
        _ => None,
    }
}
