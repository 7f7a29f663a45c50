//! Checkpoint, verification and rollback of shard state
//!
//! Before a cross-shard operation each involved shard is checkpointed. Validators
//! then submit the observed post-operation state; a shard counts as verified once
//! the transition from its checkpoint passes [`TransitionRules`] and enough
//! validators have signed it. On failure the checkpointed state is handed back
//! for the shard owner to reinstall.

use chrono::Duration;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use xshard_core::{
    now, no_governance, CoordinatorConfig, Hash, SharedGovernance, ShardId, TransitionViolation,
    TxId, ValidatorIdentity, XShardError, XShardResult,
};
use xshard_state::{ShardState, StateSnapshot, TransitionRules};

use crate::checkpoint::StateCheckpoint;
use crate::telemetry::{tracing_telemetry, CoordinationEvent, SharedTelemetry};
use crate::transaction::{CrossShardTransaction, TransactionState};

type CheckpointCell = Arc<Mutex<StateCheckpoint>>;

/// Validation outcomes keyed by (checkpoint hash, observed state digest)
type VerificationCache = HashMap<(Hash, Hash), Result<(), TransitionViolation>>;

/// Checkpoint statistics for one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCheckpointMetrics {
    pub shards: Vec<ShardId>,
    pub verifications: BTreeMap<ShardId, usize>,
    pub governance_verified: bool,
}

/// Verifier-wide checkpoint statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CheckpointMetrics {
    pub active_checkpoints: usize,
    pub pending_verifications: usize,
    pub transactions: BTreeMap<TxId, TransactionCheckpointMetrics>,
}

/// Persisted shape of the verifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VerifierRecord {
    pub checkpoints: BTreeMap<TxId, BTreeMap<ShardId, StateCheckpoint>>,
    #[serde(default)]
    pub pending_verifications: BTreeSet<TxId>,
}

/// Checkpoint store and invariant engine
pub struct StateVerifier {
    checkpoints: DashMap<TxId, BTreeMap<ShardId, CheckpointCell>>,
    pending: DashSet<TxId>,
    verification_cache: DashMap<TxId, VerificationCache>,
    failures: DashMap<TxId, Vec<String>>,
    rules: TransitionRules,
    required_verifications: usize,
    governance: SharedGovernance,
    telemetry: SharedTelemetry,
}

impl StateVerifier {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            checkpoints: DashMap::new(),
            pending: DashSet::new(),
            verification_cache: DashMap::new(),
            failures: DashMap::new(),
            rules: TransitionRules::from(config),
            required_verifications: config.required_verifications,
            governance: no_governance(),
            telemetry: tracing_telemetry(),
        }
    }

    pub fn with_governance(mut self, governance: SharedGovernance) -> Self {
        self.governance = governance;
        self
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn required_verifications(&self) -> usize {
        self.required_verifications
    }

    /// Copy of the checkpoint for a transaction's shard
    pub fn checkpoint(&self, tx_id: &str, shard_id: ShardId) -> Option<StateCheckpoint> {
        self.cell(tx_id, shard_id).map(|c| c.lock().clone())
    }

    pub fn is_pending(&self, tx_id: &str) -> bool {
        self.pending.contains(tx_id)
    }

    /// Failures recorded against a transaction, oldest first
    pub fn failures(&self, tx_id: &str) -> Vec<String> {
        self.failures
            .get(tx_id)
            .map(|f| f.value().clone())
            .unwrap_or_default()
    }

    /// Snapshot `state` as the baseline for a transaction's shard
    ///
    /// Replaces any earlier checkpoint for the same pair. When an identity is
    /// supplied and governance is configured, governance is asked to attest
    /// the checkpoint; an unreachable governance leaves it unattested.
    pub async fn create_checkpoint(
        &self,
        tx_id: &str,
        shard_id: ShardId,
        state: &ShardState,
        identity: Option<&dyn ValidatorIdentity>,
    ) -> XShardResult<Hash> {
        let result = self.checkpoint_shard(tx_id, shard_id, state, identity).await;
        self.report(tx_id, "create_checkpoint", &result);
        result
    }

    async fn checkpoint_shard(
        &self,
        tx_id: &str,
        shard_id: ShardId,
        state: &ShardState,
        identity: Option<&dyn ValidatorIdentity>,
    ) -> XShardResult<Hash> {
        let did = identity.map(|i| i.did());
        let snapshot = StateSnapshot::capture(state)?;
        let checkpoint = StateCheckpoint::new(tx_id, shard_id, snapshot, did.clone(), now())?;
        let hash = checkpoint.hash();
        let cell = Arc::new(Mutex::new(checkpoint));

        self.checkpoints
            .entry(tx_id.to_string())
            .or_default()
            .insert(shard_id, Arc::clone(&cell));
        self.pending.insert(tx_id.to_string());

        self.telemetry.record(CoordinationEvent::CheckpointCreated {
            tx_id: tx_id.to_string(),
            shard: shard_id,
            hash,
        });

        if let Some(did) = did.filter(|_| self.governance.is_active()) {
            match self
                .governance
                .verify_state_checkpoint(tx_id, shard_id, &hash, &did)
                .await
            {
                Ok(verified) => {
                    cell.lock().verified_by_governance = verified;
                }
                Err(e) => {
                    self.record_failure(tx_id, "create_checkpoint", &e);
                    self.telemetry.record(CoordinationEvent::GovernanceUnavailable {
                        tx_id: tx_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(hash)
    }

    /// Verify every involved shard of `transaction` against its checkpoint
    ///
    /// A shard missing from `current_states` is treated as empty. Every shard
    /// is checked even after one comes back short of its quorum, so a single
    /// call adds this validator's signature to every checkpoint rather than
    /// stopping at the first unverified shard. `Ok(true)` means all of them
    /// have reached their quorum. The first error still ends the call.
    pub async fn verify_state(
        &self,
        transaction: &CrossShardTransaction,
        current_states: &BTreeMap<ShardId, ShardState>,
        identity: Option<&dyn ValidatorIdentity>,
    ) -> XShardResult<bool> {
        let tx_id = transaction.transaction_id();
        if transaction.state() == TransactionState::Aborted {
            let result = Err(XShardError::TransactionAborted(tx_id.to_string()));
            self.report(tx_id, "verify_state", &result);
            return result;
        }

        let empty = ShardState::new();
        let mut verified = true;
        for shard_id in transaction.shard_ids() {
            let current = current_states.get(&shard_id).unwrap_or(&empty);
            verified &= self
                .verify_shard_state(tx_id, shard_id, current, identity)
                .await?;
        }
        Ok(verified)
    }

    /// Verify one shard's observed state against its checkpoint
    pub async fn verify_shard_state(
        &self,
        tx_id: &str,
        shard_id: ShardId,
        current: &ShardState,
        identity: Option<&dyn ValidatorIdentity>,
    ) -> XShardResult<bool> {
        let result = self.verify_shard(tx_id, shard_id, current, identity).await;
        self.report(tx_id, "verify_shard_state", &result);
        result
    }

    async fn verify_shard(
        &self,
        tx_id: &str,
        shard_id: ShardId,
        current: &ShardState,
        identity: Option<&dyn ValidatorIdentity>,
    ) -> XShardResult<bool> {
        let cell = self.require_cell(tx_id, shard_id)?;
        let (hash, snapshot) = {
            let checkpoint = cell.lock();
            (checkpoint.hash(), checkpoint.snapshot().clone())
        };

        if let Err(violation) = self.validate_transition(tx_id, hash, &snapshot, current)? {
            self.telemetry.record(CoordinationEvent::TransitionRejected {
                tx_id: tx_id.to_string(),
                shard: shard_id,
                violation: violation.clone(),
            });
            return Err(violation.into());
        }

        if let Some(identity) = identity {
            let did = identity.did();
            cell.lock().verification_signatures.insert(did.clone());

            if self.governance.is_active() {
                match self
                    .governance
                    .verify_state_transition(tx_id, shard_id, &hash, &did)
                    .await
                {
                    Ok(confirmed) => {
                        cell.lock().verified_by_governance = confirmed;
                    }
                    Err(e) => {
                        self.telemetry.record(CoordinationEvent::GovernanceUnavailable {
                            tx_id: tx_id.to_string(),
                            error: e.to_string(),
                        });
                        return Err(XShardError::GovernanceUnavailable(e.to_string()));
                    }
                }
            }
        }

        let quorate = {
            let checkpoint = cell.lock();
            let governance_ok = !self.governance.is_active() || checkpoint.verified_by_governance;
            (checkpoint.signature_count() >= self.required_verifications && governance_ok)
                .then(|| checkpoint.signature_count())
        };

        match quorate {
            Some(signatures) => {
                self.pending.remove(tx_id);
                self.telemetry.record(CoordinationEvent::ShardVerified {
                    tx_id: tx_id.to_string(),
                    shard: shard_id,
                    signatures,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn validate_transition(
        &self,
        tx_id: &str,
        checkpoint_hash: Hash,
        snapshot: &StateSnapshot,
        current: &ShardState,
    ) -> XShardResult<Result<(), TransitionViolation>> {
        let key = (checkpoint_hash, current.digest()?);
        if let Some(cached) = self
            .verification_cache
            .get(tx_id)
            .and_then(|cache| cache.get(&key).cloned())
        {
            return Ok(cached);
        }

        let outcome = self.rules.validate(snapshot.state(), current);
        self.verification_cache
            .entry(tx_id.to_string())
            .or_default()
            .insert(key, outcome.clone());
        Ok(outcome)
    }

    /// Fresh copy of the checkpointed state for the shard owner to reinstall
    pub async fn rollback_state(
        &self,
        tx_id: &str,
        shard_id: ShardId,
        identity: Option<&dyn ValidatorIdentity>,
    ) -> XShardResult<ShardState> {
        let result = self.rollback_shard(tx_id, shard_id, identity).await;
        self.report(tx_id, "rollback_state", &result);
        result
    }

    async fn rollback_shard(
        &self,
        tx_id: &str,
        shard_id: ShardId,
        identity: Option<&dyn ValidatorIdentity>,
    ) -> XShardResult<ShardState> {
        let cell = self.require_cell(tx_id, shard_id)?;
        let (hash, snapshot) = {
            let checkpoint = cell.lock();
            (checkpoint.hash(), checkpoint.snapshot().clone())
        };

        if let Some(identity) = identity.filter(|_| self.governance.is_active()) {
            if let Err(e) = self
                .governance
                .record_state_rollback(tx_id, shard_id, &hash, &identity.did())
                .await
            {
                self.telemetry.record(CoordinationEvent::GovernanceUnavailable {
                    tx_id: tx_id.to_string(),
                    error: e.to_string(),
                });
            }
        }

        self.telemetry.record(CoordinationEvent::StateRolledBack {
            tx_id: tx_id.to_string(),
            shard: shard_id,
            hash,
        });
        Ok(snapshot.to_state())
    }

    /// Evict every transaction with any checkpoint at least `max_age` old
    ///
    /// Returns the number of transactions evicted.
    pub fn cleanup_old_checkpoints(&self, max_age: Duration) -> usize {
        let at = now();
        let expired: Vec<TxId> = self
            .checkpoints
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .values()
                    .any(|c| at - c.lock().timestamp() >= max_age)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for tx_id in &expired {
            self.checkpoints.remove(tx_id);
            self.verification_cache.remove(tx_id);
            self.pending.remove(tx_id);
            self.failures.remove(tx_id);
        }

        self.telemetry.record(CoordinationEvent::CheckpointsEvicted {
            count: expired.len(),
        });
        expired.len()
    }

    pub fn get_checkpoint_metrics(&self) -> CheckpointMetrics {
        let transactions = self
            .checkpoints
            .iter()
            .map(|entry| {
                let shards = entry.value();
                let metrics = TransactionCheckpointMetrics {
                    shards: shards.keys().copied().collect(),
                    verifications: shards
                        .iter()
                        .map(|(shard, c)| (*shard, c.lock().signature_count()))
                        .collect(),
                    governance_verified: shards.values().all(|c| c.lock().verified_by_governance),
                };
                (entry.key().clone(), metrics)
            })
            .collect::<BTreeMap<_, _>>();

        CheckpointMetrics {
            active_checkpoints: transactions.len(),
            pending_verifications: self.pending.len(),
            transactions,
        }
    }

    pub fn to_record(&self) -> VerifierRecord {
        VerifierRecord {
            checkpoints: self
                .checkpoints
                .iter()
                .map(|entry| {
                    let shards = entry
                        .value()
                        .iter()
                        .map(|(shard, c)| (*shard, c.lock().clone()))
                        .collect();
                    (entry.key().clone(), shards)
                })
                .collect(),
            pending_verifications: self.pending.iter().map(|tx| tx.key().clone()).collect(),
        }
    }

    /// Rebuild a verifier, rejecting checkpoints whose content hash no longer matches
    pub fn from_record(record: VerifierRecord, config: &CoordinatorConfig) -> XShardResult<Self> {
        let verifier = Self::new(config);

        for (tx_id, shards) in record.checkpoints {
            let mut cells = BTreeMap::new();
            for (shard_id, checkpoint) in shards {
                if checkpoint.shard_id() != shard_id || checkpoint.transaction_id() != tx_id {
                    return Err(XShardError::InvalidPayload(format!(
                        "checkpoint stored under {}/{} belongs elsewhere",
                        tx_id, shard_id
                    )));
                }
                if !checkpoint.verify_integrity() {
                    return Err(XShardError::InvalidPayload(format!(
                        "checkpoint {} for {}/{} failed its integrity check",
                        checkpoint.hash(),
                        tx_id,
                        shard_id
                    )));
                }
                cells.insert(shard_id, Arc::new(Mutex::new(checkpoint)));
            }
            verifier.checkpoints.insert(tx_id, cells);
        }
        for tx_id in record.pending_verifications {
            verifier.pending.insert(tx_id);
        }

        Ok(verifier)
    }

    pub fn to_json(&self) -> XShardResult<String> {
        Ok(serde_json::to_string(&self.to_record())?)
    }

    pub fn from_json(json: &str, config: &CoordinatorConfig) -> XShardResult<Self> {
        let record: VerifierRecord = serde_json::from_str(json)?;
        Self::from_record(record, config)
    }

    fn cell(&self, tx_id: &str, shard_id: ShardId) -> Option<CheckpointCell> {
        self.checkpoints
            .get(tx_id)
            .and_then(|shards| shards.get(&shard_id).cloned())
    }

    fn require_cell(&self, tx_id: &str, shard_id: ShardId) -> XShardResult<CheckpointCell> {
        self.cell(tx_id, shard_id)
            .ok_or_else(|| XShardError::MissingCheckpoint {
                tx_id: tx_id.to_string(),
                shard: shard_id,
            })
    }

    fn record_failure(&self, tx_id: &str, operation: &'static str, error: &XShardError) {
        self.failures
            .entry(tx_id.to_string())
            .or_default()
            .push(format!("{}: {}", operation, error));
        self.telemetry.record(CoordinationEvent::OperationFailed {
            tx_id: tx_id.to_string(),
            operation,
            error: error.to_string(),
        });
    }

    fn report<T>(&self, tx_id: &str, operation: &'static str, result: &XShardResult<T>) {
        if let Err(e) = result {
            self.record_failure(tx_id, operation, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{payload, RecordingGovernance, StaticIdentity};
    use std::sync::atomic::Ordering;
    use xshard_core::ErrorKind;
    use xshard_state::AccountRecord;

    fn accounts(a: u64, b: u64) -> ShardState {
        ShardState::new()
            .with_account("a", AccountRecord::new(a))
            .with_account("b", AccountRecord::new(b))
    }

    fn identity(i: usize) -> StaticIdentity {
        StaticIdentity::new(format!("did:icn:v{}", i))
    }

    fn transaction() -> CrossShardTransaction {
        CrossShardTransaction::new(
            "tx-1",
            ShardId(0),
            [ShardId(1)],
            payload(),
            &CoordinatorConfig::default(),
        )
        .unwrap()
    }

    async fn checkpointed(verifier: &StateVerifier, tx: &CrossShardTransaction) {
        for shard in tx.shard_ids() {
            verifier
                .create_checkpoint(tx.transaction_id(), shard, &accounts(1000, 2000), None)
                .await
                .unwrap();
        }
    }

    fn observed(shard0: ShardState) -> BTreeMap<ShardId, ShardState> {
        BTreeMap::from([(ShardId(0), shard0), (ShardId(1), accounts(1000, 2000))])
    }

    #[tokio::test]
    async fn test_conserving_transition_verifies_at_quorum() {
        let verifier = StateVerifier::new(&CoordinatorConfig::default());
        let tx = transaction();
        checkpointed(&verifier, &tx).await;
        assert!(verifier.is_pending("tx-1"));

        let states = observed(accounts(900, 2100));
        assert!(!verifier.verify_state(&tx, &states, Some(&identity(0))).await.unwrap());
        // a short quorum on shard 0 does not stop shard 1 from being signed
        for shard in [ShardId(0), ShardId(1)] {
            assert_eq!(verifier.checkpoint("tx-1", shard).unwrap().signature_count(), 1);
        }
        assert!(!verifier.verify_state(&tx, &states, Some(&identity(1))).await.unwrap());
        assert!(verifier.verify_state(&tx, &states, Some(&identity(2))).await.unwrap());

        assert!(!verifier.is_pending("tx-1"));
        let checkpoint = verifier.checkpoint("tx-1", ShardId(0)).unwrap();
        assert_eq!(checkpoint.signature_count(), 3);
        // the same post-state was validated once
        assert_eq!(verifier.verification_cache.get("tx-1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_conserving_transition_never_verifies() {
        let verifier = StateVerifier::new(&CoordinatorConfig::default());
        let tx = transaction();
        checkpointed(&verifier, &tx).await;

        let states = observed(accounts(900, 2200));
        for i in 0..5 {
            let err = verifier
                .verify_state(&tx, &states, Some(&identity(i)))
                .await
                .unwrap_err();
            assert_eq!(
                err.violation(),
                Some(&TransitionViolation::ConservationViolated {
                    before: 3000,
                    after: 3100
                })
            );
        }

        assert_eq!(verifier.checkpoint("tx-1", ShardId(0)).unwrap().signature_count(), 0);
        assert!(verifier.is_pending("tx-1"));
        assert_eq!(verifier.failures("tx-1").len(), 5);
    }

    #[tokio::test]
    async fn test_delta_cap_is_enforced() {
        let verifier = StateVerifier::new(&CoordinatorConfig::default());
        let tx = transaction();
        checkpointed(&verifier, &tx).await;

        let err = verifier
            .verify_state(&tx, &observed(accounts(400, 2600)), Some(&identity(0)))
            .await
            .unwrap_err();
        assert!(matches!(
            err.violation(),
            Some(TransitionViolation::DeltaCapExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_shard_state_fails_account_check() {
        let verifier = StateVerifier::new(&CoordinatorConfig::default());
        let tx = transaction();
        checkpointed(&verifier, &tx).await;

        let only_source = BTreeMap::from([(ShardId(0), accounts(1000, 2000))]);
        let err = verifier
            .verify_state(&tx, &only_source, Some(&identity(0)))
            .await
            .unwrap_err();
        assert_eq!(err.violation(), Some(&TransitionViolation::AccountSetMismatch));
    }

    #[tokio::test]
    async fn test_missing_checkpoint() {
        let verifier = StateVerifier::new(&CoordinatorConfig::default());
        let err = verifier
            .verify_shard_state("tx-9", ShardId(0), &accounts(1, 1), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingState);
        assert_eq!(verifier.failures("tx-9").len(), 1);

        assert!(verifier.rollback_state("tx-9", ShardId(0), None).await.is_err());
    }

    #[tokio::test]
    async fn test_aborted_transaction_is_rejected() {
        let verifier = StateVerifier::new(&CoordinatorConfig::default());
        let tx = transaction();
        checkpointed(&verifier, &tx).await;
        tx.abort_phase(ShardId(1), "test", None).await;

        assert!(matches!(
            verifier
                .verify_state(&tx, &observed(accounts(900, 2100)), Some(&identity(0)))
                .await,
            Err(XShardError::TransactionAborted(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_returns_independent_copy() {
        let verifier = StateVerifier::new(&CoordinatorConfig::default());
        let mut live = accounts(1000, 2000);
        verifier
            .create_checkpoint("tx-1", ShardId(0), &live, None)
            .await
            .unwrap();

        live.get_mut("a").unwrap().balance.0 = 1;

        let mut restored = verifier.rollback_state("tx-1", ShardId(0), None).await.unwrap();
        assert_eq!(restored, accounts(1000, 2000));

        restored.get_mut("b").unwrap().balance.0 = 0;
        let again = verifier.rollback_state("tx-1", ShardId(0), None).await.unwrap();
        assert_eq!(again, accounts(1000, 2000));
    }

    #[tokio::test]
    async fn test_cleanup_evicts_whole_transactions() {
        let verifier = StateVerifier::new(&CoordinatorConfig::default());
        let tx = transaction();
        checkpointed(&verifier, &tx).await;
        verifier
            .create_checkpoint("tx-2", ShardId(4), &accounts(5, 5), None)
            .await
            .unwrap();

        assert_eq!(verifier.cleanup_old_checkpoints(Duration::hours(24)), 0);
        assert_eq!(verifier.get_checkpoint_metrics().active_checkpoints, 2);

        assert_eq!(verifier.cleanup_old_checkpoints(Duration::zero()), 2);
        let metrics = verifier.get_checkpoint_metrics();
        assert_eq!(metrics.active_checkpoints, 0);
        assert_eq!(metrics.pending_verifications, 0);
        assert!(verifier.checkpoint("tx-1", ShardId(0)).is_none());
    }

    #[tokio::test]
    async fn test_metrics() {
        let verifier = StateVerifier::new(&CoordinatorConfig::default());
        let tx = transaction();
        checkpointed(&verifier, &tx).await;
        verifier
            .verify_state(&tx, &observed(accounts(900, 2100)), Some(&identity(0)))
            .await
            .unwrap();

        let metrics = verifier.get_checkpoint_metrics();
        assert_eq!(metrics.active_checkpoints, 1);
        assert_eq!(metrics.pending_verifications, 1);
        let tx_metrics = &metrics.transactions["tx-1"];
        assert_eq!(tx_metrics.shards, vec![ShardId(0), ShardId(1)]);
        assert_eq!(tx_metrics.verifications[&ShardId(0)], 1);
        assert!(!tx_metrics.governance_verified);
    }

    #[tokio::test]
    async fn test_record_roundtrip() {
        let verifier = StateVerifier::new(&CoordinatorConfig::default());
        let tx = transaction();
        checkpointed(&verifier, &tx).await;
        verifier
            .verify_state(&tx, &observed(accounts(900, 2100)), Some(&identity(0)))
            .await
            .unwrap();

        let json = verifier.to_json().unwrap();
        let restored = StateVerifier::from_json(&json, &CoordinatorConfig::default()).unwrap();
        assert_eq!(restored.to_record(), verifier.to_record());
        assert!(restored.is_pending("tx-1"));

        // signatures keep accumulating after recovery
        let states = observed(accounts(900, 2100));
        assert!(!restored.verify_state(&tx, &states, Some(&identity(1))).await.unwrap());
        assert!(restored.verify_state(&tx, &states, Some(&identity(2))).await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_record_is_rejected() {
        let verifier = StateVerifier::new(&CoordinatorConfig::default());
        checkpointed(&verifier, &transaction()).await;

        let mut value = serde_json::to_value(verifier.to_record()).unwrap();
        value["checkpoints"]["tx-1"]["0"]["state"]["a"]["balance"] = serde_json::json!(5);
        assert!(matches!(
            StateVerifier::from_json(&value.to_string(), &CoordinatorConfig::default()),
            Err(XShardError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_governance_gates_quorum() {
        let governance = RecordingGovernance::shared();
        governance.reject_transitions.store(true, Ordering::SeqCst);
        let verifier =
            StateVerifier::new(&CoordinatorConfig::default()).with_governance(governance.clone());
        let tx = transaction();

        verifier
            .create_checkpoint("tx-1", ShardId(0), &accounts(1000, 2000), Some(&identity(0)))
            .await
            .unwrap();
        verifier
            .create_checkpoint("tx-1", ShardId(1), &accounts(1000, 2000), Some(&identity(0)))
            .await
            .unwrap();
        assert!(verifier.checkpoint("tx-1", ShardId(0)).unwrap().verified_by_governance);

        let states = observed(accounts(900, 2100));
        for i in 0..4 {
            assert!(!verifier.verify_state(&tx, &states, Some(&identity(i))).await.unwrap());
        }
        assert!(verifier.is_pending("tx-1"));

        governance.reject_transitions.store(false, Ordering::SeqCst);
        assert!(verifier.verify_state(&tx, &states, Some(&identity(4))).await.unwrap());

        verifier
            .rollback_state("tx-1", ShardId(0), Some(&identity(0)))
            .await
            .unwrap();
        assert!(governance
            .calls()
            .contains(&"record_state_rollback".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_governance_leaves_checkpoint_unattested() {
        let governance = RecordingGovernance::shared();
        governance.unavailable.store(true, Ordering::SeqCst);
        let verifier =
            StateVerifier::new(&CoordinatorConfig::default()).with_governance(governance.clone());

        let hash = verifier
            .create_checkpoint("tx-1", ShardId(0), &accounts(1, 1), Some(&identity(0)))
            .await
            .unwrap();
        let checkpoint = verifier.checkpoint("tx-1", ShardId(0)).unwrap();
        assert_eq!(checkpoint.hash(), hash);
        assert!(!checkpoint.verified_by_governance);
        assert_eq!(verifier.failures("tx-1").len(), 1);

        // a rollback still returns the state
        assert!(verifier
            .rollback_state("tx-1", ShardId(0), Some(&identity(0)))
            .await
            .is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_verifications_keep_every_signature() {
        let verifier = Arc::new(StateVerifier::new(&CoordinatorConfig::default()));
        verifier
            .create_checkpoint("tx-1", ShardId(0), &accounts(1000, 2000), None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..12 {
            let verifier = Arc::clone(&verifier);
            handles.push(tokio::spawn(async move {
                verifier
                    .verify_shard_state("tx-1", ShardId(0), &accounts(900, 2100), Some(&identity(i)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(verifier.checkpoint("tx-1", ShardId(0)).unwrap().signature_count(), 12);
        assert!(!verifier.is_pending("tx-1"));
    }
}
