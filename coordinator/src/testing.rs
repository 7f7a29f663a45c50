//! Test doubles for the identity and governance collaborators

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Map;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use xshard_core::{
    AttestationMap, Governance, Hash, LedgerTransaction, ShardId, ValidatorIdentity,
    XShardError, XShardResult,
};

pub struct StaticIdentity {
    did: String,
    valid: bool,
}

impl StaticIdentity {
    pub fn new(did: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            valid: true,
        }
    }

    pub fn invalid(did: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            valid: false,
        }
    }
}

impl ValidatorIdentity for StaticIdentity {
    fn did(&self) -> String {
        self.did.clone()
    }

    fn verify(&self) -> bool {
        self.valid
    }
}

/// Governance that answers with fixed decisions and records every call
#[derive(Default)]
pub struct RecordingGovernance {
    pub reject_actions: AtomicBool,
    pub reject_transitions: AtomicBool,
    pub unavailable: AtomicBool,
    /// Park `validate_cross_shard_action` until `release` is notified
    pub hold_actions: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
    pub calls: Mutex<Vec<String>>,
    pub completions: Mutex<Vec<(String, AttestationMap)>>,
}

impl RecordingGovernance {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn call(&self, name: &str) -> XShardResult<()> {
        self.calls.lock().push(name.to_string());
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(XShardError::GovernanceUnavailable("offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Governance for RecordingGovernance {
    async fn validate_cross_shard_action(
        &self,
        _identity: &str,
        _transaction: &LedgerTransaction,
    ) -> XShardResult<bool> {
        self.call("validate_cross_shard_action")?;
        if self.hold_actions.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(!self.reject_actions.load(Ordering::SeqCst))
    }

    async fn record_cross_shard_abort(
        &self,
        _tx_id: &str,
        _shard_id: ShardId,
        _reason: &str,
        _identity: Option<&str>,
    ) -> XShardResult<()> {
        self.call("record_cross_shard_abort")
    }

    async fn record_cross_shard_completion(
        &self,
        tx_id: &str,
        _shard_ids: &[ShardId],
        attestations: &AttestationMap,
    ) -> XShardResult<()> {
        self.call("record_cross_shard_completion")?;
        self.completions
            .lock()
            .push((tx_id.to_string(), attestations.clone()));
        Ok(())
    }

    async fn verify_state_checkpoint(
        &self,
        _tx_id: &str,
        _shard_id: ShardId,
        _checkpoint_hash: &Hash,
        _identity: &str,
    ) -> XShardResult<bool> {
        self.call("verify_state_checkpoint")?;
        Ok(true)
    }

    async fn verify_state_transition(
        &self,
        _tx_id: &str,
        _shard_id: ShardId,
        _checkpoint_hash: &Hash,
        _identity: &str,
    ) -> XShardResult<bool> {
        self.call("verify_state_transition")?;
        Ok(!self.reject_transitions.load(Ordering::SeqCst))
    }

    async fn record_state_rollback(
        &self,
        _tx_id: &str,
        _shard_id: ShardId,
        _checkpoint_hash: &Hash,
        _identity: &str,
    ) -> XShardResult<()> {
        self.call("record_state_rollback")
    }
}

pub fn payload() -> LedgerTransaction {
    LedgerTransaction::new("alice", "bob", "transfer", Map::new()).unwrap()
}
