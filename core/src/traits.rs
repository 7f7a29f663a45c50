//! Collaborator interfaces consumed by the coordinator
//!
//! Identity and governance live outside this engine; components receive them
//! as injected capabilities rather than optional fields.

use crate::error::XShardResult;
use crate::types::{Hash, LedgerTransaction, ShardId};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Decentralized identity of a validator
pub trait ValidatorIdentity: Send + Sync {
    /// Stable identifier, e.g. `did:icn:...`
    fn did(&self) -> String;

    /// Self-contained cryptographic validity check
    fn verify(&self) -> bool;
}

/// Attestations recorded per shard on completion
pub type AttestationMap = BTreeMap<ShardId, BTreeSet<String>>;

/// External policy engine that approves, rejects or audits cross-shard actions
///
/// `Err` means governance could not be reached; `Ok(false)` means it answered
/// and rejected.
#[async_trait]
pub trait Governance: Send + Sync {
    /// Whether a real governance system is configured
    fn is_active(&self) -> bool {
        true
    }

    async fn validate_cross_shard_action(
        &self,
        identity: &str,
        transaction: &LedgerTransaction,
    ) -> XShardResult<bool>;

    async fn record_cross_shard_abort(
        &self,
        tx_id: &str,
        shard_id: ShardId,
        reason: &str,
        identity: Option<&str>,
    ) -> XShardResult<()>;

    async fn record_cross_shard_completion(
        &self,
        tx_id: &str,
        shard_ids: &[ShardId],
        attestations: &AttestationMap,
    ) -> XShardResult<()>;

    async fn verify_state_checkpoint(
        &self,
        tx_id: &str,
        shard_id: ShardId,
        checkpoint_hash: &Hash,
        identity: &str,
    ) -> XShardResult<bool>;

    async fn verify_state_transition(
        &self,
        tx_id: &str,
        shard_id: ShardId,
        checkpoint_hash: &Hash,
        identity: &str,
    ) -> XShardResult<bool>;

    async fn record_state_rollback(
        &self,
        tx_id: &str,
        shard_id: ShardId,
        checkpoint_hash: &Hash,
        identity: &str,
    ) -> XShardResult<()>;
}

/// Governance stand-in used when no policy engine is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGovernance;

#[async_trait]
impl Governance for NoGovernance {
    fn is_active(&self) -> bool {
        false
    }

    async fn validate_cross_shard_action(
        &self,
        _identity: &str,
        _transaction: &LedgerTransaction,
    ) -> XShardResult<bool> {
        Ok(true)
    }

    async fn record_cross_shard_abort(
        &self,
        _tx_id: &str,
        _shard_id: ShardId,
        _reason: &str,
        _identity: Option<&str>,
    ) -> XShardResult<()> {
        Ok(())
    }

    async fn record_cross_shard_completion(
        &self,
        _tx_id: &str,
        _shard_ids: &[ShardId],
        _attestations: &AttestationMap,
    ) -> XShardResult<()> {
        Ok(())
    }

    async fn verify_state_checkpoint(
        &self,
        _tx_id: &str,
        _shard_id: ShardId,
        _checkpoint_hash: &Hash,
        _identity: &str,
    ) -> XShardResult<bool> {
        Ok(true)
    }

    async fn verify_state_transition(
        &self,
        _tx_id: &str,
        _shard_id: ShardId,
        _checkpoint_hash: &Hash,
        _identity: &str,
    ) -> XShardResult<bool> {
        Ok(true)
    }

    async fn record_state_rollback(
        &self,
        _tx_id: &str,
        _shard_id: ShardId,
        _checkpoint_hash: &Hash,
        _identity: &str,
    ) -> XShardResult<()> {
        Ok(())
    }
}

/// Shared governance handle
pub type SharedGovernance = Arc<dyn Governance>;

/// Governance handle for components built without a policy engine
pub fn no_governance() -> SharedGovernance {
    Arc::new(NoGovernance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn test_no_governance_is_inactive_and_permissive() {
        let governance = no_governance();
        assert!(!governance.is_active());

        let tx = LedgerTransaction::new("a", "b", "transfer", Map::new()).unwrap();
        assert!(governance
            .validate_cross_shard_action("did:icn:x", &tx)
            .await
            .unwrap());
        assert!(governance
            .verify_state_transition("tx", ShardId(0), &Hash::ZERO, "did:icn:x")
            .await
            .unwrap());
    }
}
