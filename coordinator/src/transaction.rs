//! Two-phase commit across a source shard and its target shards
//!
//! Every involved shard gets a [`Phase`] that collects validator signatures.
//! A phase moves to `prepared` and then `committed` once its signature set
//! reaches the quorum; the transaction completes when every phase has
//! committed and aborts as soon as any phase aborts.
//!
//! Each phase sits behind its own mutex so the read-count/compare/transition
//! step is atomic per shard. A transaction-level mutex guards the lifecycle
//! state, and lock order is always lifecycle before phase. No lock is held
//! while awaiting governance.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use xshard_core::{
    now, no_governance, AttestationMap, CoordinatorConfig, LedgerTransaction, SharedGovernance,
    ShardId, TxId, ValidatorIdentity, XShardError, XShardResult,
};

use crate::phase::{Phase, PhaseStatus};
use crate::telemetry::{tracing_telemetry, CoordinationEvent, SharedTelemetry};

/// Lifecycle of the whole transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Pending,
    Aborted,
    Completed,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Pending)
    }
}

#[derive(Debug, Clone, Copy)]
struct Lifecycle {
    state: TransactionState,
    completed_at: Option<DateTime<Utc>>,
}

/// Persisted shape of a cross-shard transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: TxId,
    pub source_shard: ShardId,
    pub target_shards: BTreeSet<ShardId>,
    pub primary_transaction: LedgerTransaction,
    pub state: TransactionState,
    pub required_validations: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub phases: BTreeMap<ShardId, Phase>,
}

/// Atomic transaction spanning several shards
pub struct CrossShardTransaction {
    transaction_id: TxId,
    source_shard: ShardId,
    target_shards: BTreeSet<ShardId>,
    primary_transaction: LedgerTransaction,
    phases: BTreeMap<ShardId, Mutex<Phase>>,
    lifecycle: Mutex<Lifecycle>,
    created_at: DateTime<Utc>,
    required_validations: usize,
    phase_timeout: Option<Duration>,
    governance: SharedGovernance,
    telemetry: SharedTelemetry,
}

impl CrossShardTransaction {
    /// Create a transaction with one pending phase per involved shard
    pub fn new(
        transaction_id: impl Into<TxId>,
        source_shard: ShardId,
        target_shards: impl IntoIterator<Item = ShardId>,
        primary_transaction: LedgerTransaction,
        config: &CoordinatorConfig,
    ) -> XShardResult<Self> {
        let transaction_id = transaction_id.into();
        let target_shards: BTreeSet<ShardId> = target_shards.into_iter().collect();
        let created_at = now();

        let mut phases = BTreeMap::new();
        for shard in std::iter::once(source_shard).chain(target_shards.iter().copied()) {
            if !phases.contains_key(&shard) {
                let phase = Phase::new(&transaction_id, shard, created_at)?;
                phases.insert(shard, Mutex::new(phase));
            }
        }

        debug!(
            "Created transaction {} across {} shards",
            transaction_id,
            phases.len()
        );

        Ok(Self {
            transaction_id,
            source_shard,
            target_shards,
            primary_transaction,
            phases,
            lifecycle: Mutex::new(Lifecycle {
                state: TransactionState::Pending,
                completed_at: None,
            }),
            created_at,
            required_validations: config.required_validations,
            phase_timeout: config.phase_timeout()?,
            governance: no_governance(),
            telemetry: tracing_telemetry(),
        })
    }

    pub fn with_governance(mut self, governance: SharedGovernance) -> Self {
        self.governance = governance;
        self
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn source_shard(&self) -> ShardId {
        self.source_shard
    }

    pub fn target_shards(&self) -> &BTreeSet<ShardId> {
        &self.target_shards
    }

    /// Every involved shard, sorted
    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.phases.keys().copied().collect()
    }

    pub fn primary_transaction(&self) -> &LedgerTransaction {
        &self.primary_transaction
    }

    pub fn required_validations(&self) -> usize {
        self.required_validations
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> TransactionState {
        self.lifecycle.lock().state
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.lock().completed_at
    }

    /// Copy of a shard's phase
    pub fn phase(&self, shard_id: ShardId) -> Option<Phase> {
        self.phases.get(&shard_id).map(|p| p.lock().clone())
    }

    pub fn phase_status(&self, shard_id: ShardId) -> Option<PhaseStatus> {
        self.phases.get(&shard_id).map(|p| p.lock().status)
    }

    /// Attesting identities per shard
    pub fn attestations(&self) -> AttestationMap {
        self.phases
            .iter()
            .map(|(shard, phase)| (*shard, phase.lock().did_attestations.clone()))
            .collect()
    }

    /// Add a prepare vote for `shard_id`
    ///
    /// Returns `Ok(true)` only for the call that moves the phase to
    /// `prepared`, and `Ok(false)` while the quorum is still short. A
    /// governance rejection fails the call but keeps the recorded signature.
    pub async fn prepare_phase(
        &self,
        shard_id: ShardId,
        validator_id: &str,
        identity: &dyn ValidatorIdentity,
    ) -> XShardResult<bool> {
        let result = self.prepare(shard_id, validator_id, identity).await;
        self.report("prepare_phase", &result);
        result
    }

    async fn prepare(
        &self,
        shard_id: ShardId,
        validator_id: &str,
        identity: &dyn ValidatorIdentity,
    ) -> XShardResult<bool> {
        let phase = self.phase_lock(shard_id)?;
        let did = identity.did();

        {
            let lifecycle = self.lifecycle.lock();
            self.ensure_open(lifecycle.state)?;
            let mut phase = phase.lock();
            if phase.status != PhaseStatus::Pending {
                return Err(XShardError::InvalidPhaseStatus {
                    shard: shard_id,
                    expected: PhaseStatus::Pending.as_str(),
                    found: phase.status.as_str(),
                });
            }
            phase.attest(validator_id, did.clone(), now());
        }

        if self.governance.is_active() {
            match self
                .governance
                .validate_cross_shard_action(&did, &self.primary_transaction)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    self.telemetry.record(CoordinationEvent::GovernanceRejected {
                        tx_id: self.transaction_id.clone(),
                        shard: shard_id,
                        action: "prepare",
                    });
                    return Err(XShardError::GovernanceRejected {
                        tx_id: self.transaction_id.clone(),
                        action: "prepare",
                    });
                }
                Err(e) => {
                    self.telemetry.record(CoordinationEvent::GovernanceUnavailable {
                        tx_id: self.transaction_id.clone(),
                        error: e.to_string(),
                    });
                    return Err(XShardError::GovernanceUnavailable(e.to_string()));
                }
            }
        }

        // an abort may have landed while governance was deciding
        let prepared = {
            let lifecycle = self.lifecycle.lock();
            self.ensure_open(lifecycle.state)?;
            let mut phase = phase.lock();
            phase.status == PhaseStatus::Pending
                && phase.has_quorum(self.required_validations)
                && phase.transition(PhaseStatus::Prepared, now())
        };

        if prepared {
            self.telemetry.record(CoordinationEvent::PhasePrepared {
                tx_id: self.transaction_id.clone(),
                shard: shard_id,
            });
        }
        Ok(prepared)
    }

    /// Add a commit vote for `shard_id`
    ///
    /// The phase must be `prepared`, not stale, and the identity must pass its
    /// own verification. The signature set is shared with the prepare step.
    pub async fn commit_phase(
        &self,
        shard_id: ShardId,
        validator_id: &str,
        identity: &dyn ValidatorIdentity,
    ) -> XShardResult<bool> {
        let result = self.commit(shard_id, validator_id, identity).await;
        self.report("commit_phase", &result);
        result
    }

    async fn commit(
        &self,
        shard_id: ShardId,
        validator_id: &str,
        identity: &dyn ValidatorIdentity,
    ) -> XShardResult<bool> {
        let phase = self.phase_lock(shard_id)?;

        let committed = {
            let lifecycle = self.lifecycle.lock();
            self.ensure_open(lifecycle.state)?;
            let mut phase = phase.lock();
            if phase.status != PhaseStatus::Prepared {
                return Err(XShardError::InvalidPhaseStatus {
                    shard: shard_id,
                    expected: PhaseStatus::Prepared.as_str(),
                    found: phase.status.as_str(),
                });
            }

            let at = now();
            if let Some(age_secs) = self
                .phase_timeout
                .and_then(|timeout| phase.stale_for(at, timeout))
            {
                return Err(XShardError::PhaseExpired {
                    shard: shard_id,
                    age_secs,
                });
            }

            if !identity.verify() {
                return Err(XShardError::IdentityVerificationFailed(
                    validator_id.to_string(),
                ));
            }

            phase.attest(validator_id, identity.did(), at);
            phase.has_quorum(self.required_validations)
                && phase.transition(PhaseStatus::Committed, at)
        };

        if committed {
            self.telemetry.record(CoordinationEvent::PhaseCommitted {
                tx_id: self.transaction_id.clone(),
                shard: shard_id,
            });
            self.check_completion().await;
        }
        Ok(committed)
    }

    /// Abort a shard's phase and with it the whole transaction
    ///
    /// Never fails. An unknown shard or an already completed transaction is
    /// logged and ignored.
    pub async fn abort_phase(
        &self,
        shard_id: ShardId,
        reason: &str,
        identity: Option<&dyn ValidatorIdentity>,
    ) {
        let Some(phase) = self.phases.get(&shard_id) else {
            warn!(
                "Ignoring abort of unknown shard {} for transaction {}",
                shard_id, self.transaction_id
            );
            return;
        };
        let did = identity.map(|i| i.did());

        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == TransactionState::Completed {
                warn!(
                    "Ignoring abort of completed transaction {}",
                    self.transaction_id
                );
                return;
            }

            let mut phase = phase.lock();
            phase.transition(PhaseStatus::Aborted, now());
            if let Some(did) = &did {
                phase.did_attestations.insert(did.clone());
            }
            lifecycle.state = TransactionState::Aborted;
        }

        self.telemetry.record(CoordinationEvent::PhaseAborted {
            tx_id: self.transaction_id.clone(),
            shard: shard_id,
            reason: reason.to_string(),
        });

        if self.governance.is_active() {
            if let Err(e) = self
                .governance
                .record_cross_shard_abort(&self.transaction_id, shard_id, reason, did.as_deref())
                .await
            {
                self.telemetry.record(CoordinationEvent::GovernanceUnavailable {
                    tx_id: self.transaction_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    async fn check_completion(&self) {
        let attestations = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != TransactionState::Pending {
                return;
            }
            if !self
                .phases
                .values()
                .all(|p| p.lock().status == PhaseStatus::Committed)
            {
                return;
            }
            lifecycle.state = TransactionState::Completed;
            lifecycle.completed_at = Some(now());
            self.attestations()
        };

        self.telemetry.record(CoordinationEvent::TransactionCompleted {
            tx_id: self.transaction_id.clone(),
        });

        if self.governance.is_active() {
            let shard_ids = self.shard_ids();
            if let Err(e) = self
                .governance
                .record_cross_shard_completion(&self.transaction_id, &shard_ids, &attestations)
                .await
            {
                self.telemetry.record(CoordinationEvent::GovernanceUnavailable {
                    tx_id: self.transaction_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn ensure_open(&self, state: TransactionState) -> XShardResult<()> {
        match state {
            TransactionState::Pending => Ok(()),
            TransactionState::Aborted => {
                Err(XShardError::TransactionAborted(self.transaction_id.clone()))
            }
            TransactionState::Completed => {
                Err(XShardError::TransactionCompleted(self.transaction_id.clone()))
            }
        }
    }

    fn phase_lock(&self, shard_id: ShardId) -> XShardResult<&Mutex<Phase>> {
        self.phases
            .get(&shard_id)
            .ok_or_else(|| XShardError::UnknownShard {
                tx_id: self.transaction_id.clone(),
                shard: shard_id,
            })
    }

    fn report<T>(&self, operation: &'static str, result: &XShardResult<T>) {
        if let Err(e) = result {
            self.telemetry.record(CoordinationEvent::OperationFailed {
                tx_id: self.transaction_id.clone(),
                operation,
                error: e.to_string(),
            });
        }
    }

    pub fn to_record(&self) -> TransactionRecord {
        let lifecycle = *self.lifecycle.lock();
        TransactionRecord {
            transaction_id: self.transaction_id.clone(),
            source_shard: self.source_shard,
            target_shards: self.target_shards.clone(),
            primary_transaction: self.primary_transaction.clone(),
            state: lifecycle.state,
            required_validations: self.required_validations,
            created_at: self.created_at,
            completed_at: lifecycle.completed_at,
            phases: self
                .phases
                .iter()
                .map(|(shard, phase)| (*shard, phase.lock().clone()))
                .collect(),
        }
    }

    /// Rebuild a transaction from its record
    ///
    /// The record must carry exactly one phase per involved shard, and a
    /// completed record must have every phase committed.
    pub fn from_record(record: TransactionRecord, config: &CoordinatorConfig) -> XShardResult<Self> {
        let expected: BTreeSet<ShardId> = std::iter::once(record.source_shard)
            .chain(record.target_shards.iter().copied())
            .collect();
        if !record.phases.keys().copied().eq(expected.iter().copied()) {
            return Err(XShardError::InvalidPayload(format!(
                "phases of transaction {} do not match its shards",
                record.transaction_id
            )));
        }
        if let Some((shard, _)) = record.phases.iter().find(|(k, p)| **k != p.shard_id) {
            return Err(XShardError::InvalidPayload(format!(
                "phase stored under {} belongs to another shard",
                shard
            )));
        }
        if record.state == TransactionState::Completed
            && record
                .phases
                .values()
                .any(|p| p.status != PhaseStatus::Committed)
        {
            return Err(XShardError::InvalidPayload(format!(
                "transaction {} is completed with uncommitted phases",
                record.transaction_id
            )));
        }

        Ok(Self {
            transaction_id: record.transaction_id,
            source_shard: record.source_shard,
            target_shards: record.target_shards,
            primary_transaction: record.primary_transaction,
            phases: record
                .phases
                .into_iter()
                .map(|(shard, phase)| (shard, Mutex::new(phase)))
                .collect(),
            lifecycle: Mutex::new(Lifecycle {
                state: record.state,
                completed_at: record.completed_at,
            }),
            created_at: record.created_at,
            required_validations: record.required_validations,
            phase_timeout: config.phase_timeout()?,
            governance: no_governance(),
            telemetry: tracing_telemetry(),
        })
    }

    pub fn to_json(&self) -> XShardResult<String> {
        Ok(serde_json::to_string(&self.to_record())?)
    }

    pub fn from_json(json: &str, config: &CoordinatorConfig) -> XShardResult<Self> {
        let record: TransactionRecord = serde_json::from_str(json)?;
        Self::from_record(record, config)
    }
}

impl std::fmt::Debug for CrossShardTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossShardTransaction")
            .field("transaction_id", &self.transaction_id)
            .field("source_shard", &self.source_shard)
            .field("target_shards", &self.target_shards)
            .field("state", &self.state())
            .finish()
    }
}
