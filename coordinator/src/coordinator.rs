//! Registry of in-flight cross-shard transactions
//!
//! Owns the transactions and the shared [`StateVerifier`], and wires both to
//! the same governance and telemetry. Also persists them to a
//! `RecoveryStore` and restores them after a restart.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use xshard_core::{
    now, CoordinatorConfig, Hash, LedgerTransaction, SharedGovernance, ShardId, TxId,
    ValidatorIdentity, XShardError, XShardResult,
};
use xshard_state::{SharedRecoveryStore, ShardLedger};

use crate::phase::PhaseStatus;
use crate::telemetry::SharedTelemetry;
use crate::transaction::{CrossShardTransaction, TransactionRecord, TransactionState};
use crate::verifier::{CheckpointMetrics, StateVerifier, VerifierRecord};

/// Point-in-time view of one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub transaction_id: TxId,
    pub state: TransactionState,
    pub phases: BTreeMap<ShardId, PhaseStatus>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pending_verification: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CoordinatorMetrics {
    pub total_transactions: usize,
    pub pending: usize,
    pub completed: usize,
    pub aborted: usize,
    pub checkpoints: CheckpointMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupReport {
    pub checkpoints_evicted: usize,
    pub transactions_removed: usize,
}

pub struct CrossShardCoordinator {
    config: CoordinatorConfig,
    transactions: DashMap<TxId, Arc<CrossShardTransaction>>,
    verifier: Arc<StateVerifier>,
    governance: SharedGovernance,
    telemetry: SharedTelemetry,
    store: Option<SharedRecoveryStore>,
}

impl CrossShardCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        governance: SharedGovernance,
        telemetry: SharedTelemetry,
    ) -> XShardResult<Self> {
        config.validate()?;
        let verifier = StateVerifier::new(&config)
            .with_governance(Arc::clone(&governance))
            .with_telemetry(Arc::clone(&telemetry));

        Ok(Self {
            config,
            transactions: DashMap::new(),
            verifier: Arc::new(verifier),
            governance,
            telemetry,
            store: None,
        })
    }

    /// Restore every persisted transaction and the verifier from `store`
    pub fn recover(
        config: CoordinatorConfig,
        governance: SharedGovernance,
        telemetry: SharedTelemetry,
        store: SharedRecoveryStore,
    ) -> XShardResult<Self> {
        config.validate()?;

        let verifier = match store.get_verifier::<VerifierRecord>()? {
            Some(record) => StateVerifier::from_record(record, &config)?,
            None => StateVerifier::new(&config),
        }
        .with_governance(Arc::clone(&governance))
        .with_telemetry(Arc::clone(&telemetry));

        let transactions = DashMap::new();
        for tx_id in store.transaction_ids()? {
            let Some(record) = store.get_transaction::<TransactionRecord>(&tx_id)? else {
                continue;
            };
            let tx = CrossShardTransaction::from_record(record, &config)?
                .with_governance(Arc::clone(&governance))
                .with_telemetry(Arc::clone(&telemetry));
            transactions.insert(tx_id, Arc::new(tx));
        }

        info!("Recovered {} cross-shard transactions", transactions.len());

        Ok(Self {
            config,
            transactions,
            verifier: Arc::new(verifier),
            governance,
            telemetry,
            store: Some(store),
        })
    }

    pub fn with_store(mut self, store: SharedRecoveryStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn verifier(&self) -> &Arc<StateVerifier> {
        &self.verifier
    }

    /// Register a new transaction moving `primary` from `source` to `targets`
    pub fn begin(
        &self,
        primary: LedgerTransaction,
        source: ShardId,
        targets: impl IntoIterator<Item = ShardId>,
    ) -> XShardResult<Arc<CrossShardTransaction>> {
        primary.validate()?;
        let tx_id = Uuid::new_v4().to_string();
        let tx = CrossShardTransaction::new(tx_id.clone(), source, targets, primary, &self.config)?
            .with_governance(Arc::clone(&self.governance))
            .with_telemetry(Arc::clone(&self.telemetry));
        let tx = Arc::new(tx);

        self.transactions.insert(tx_id.clone(), Arc::clone(&tx));
        info!(
            "Started cross-shard transaction {} across {} shards",
            tx_id,
            tx.shard_ids().len()
        );
        Ok(tx)
    }

    pub fn get(&self, tx_id: &str) -> Option<Arc<CrossShardTransaction>> {
        self.transactions.get(tx_id).map(|tx| Arc::clone(tx.value()))
    }

    pub fn transaction_ids(&self) -> Vec<TxId> {
        self.transactions.iter().map(|entry| entry.key().clone()).collect()
    }

    fn require(&self, tx_id: &str) -> XShardResult<Arc<CrossShardTransaction>> {
        self.get(tx_id)
            .ok_or_else(|| XShardError::TransactionNotFound(tx_id.to_string()))
    }

    /// Checkpoint the live state of every shard the transaction touches
    pub async fn checkpoint_all(
        &self,
        tx_id: &str,
        ledger: &ShardLedger,
        identity: Option<&dyn ValidatorIdentity>,
    ) -> XShardResult<BTreeMap<ShardId, Hash>> {
        let tx = self.require(tx_id)?;
        let mut hashes = BTreeMap::new();
        for shard in tx.shard_ids() {
            let state = ledger
                .state(shard)
                .ok_or_else(|| XShardError::InvalidPayload(format!("ledger has no {}", shard)))?;
            let hash = self
                .verifier
                .create_checkpoint(tx_id, shard, &state, identity)
                .await?;
            hashes.insert(shard, hash);
        }
        Ok(hashes)
    }

    /// Abort every phase and reinstall each shard's checkpointed state
    ///
    /// Returns the shards that were restored. Shards without a checkpoint are
    /// skipped.
    pub async fn abort_and_rollback(
        &self,
        tx_id: &str,
        reason: &str,
        ledger: &ShardLedger,
        identity: Option<&dyn ValidatorIdentity>,
    ) -> XShardResult<Vec<ShardId>> {
        let tx = self.require(tx_id)?;
        if tx.state() == TransactionState::Completed {
            return Err(XShardError::TransactionCompleted(tx_id.to_string()));
        }

        for shard in tx.shard_ids() {
            if tx.phase_status(shard) != Some(PhaseStatus::Aborted) {
                tx.abort_phase(shard, reason, identity).await;
            }
        }

        let mut restored = Vec::new();
        for shard in tx.shard_ids() {
            match self.verifier.rollback_state(tx_id, shard, identity).await {
                Ok(state) => {
                    ledger.install(shard, state);
                    restored.push(shard);
                }
                Err(e) => warn!("Skipping rollback of shard {} for {}: {}", shard, tx_id, e),
            }
        }
        Ok(restored)
    }

    pub fn transaction_status(&self, tx_id: &str) -> Option<TransactionStatus> {
        let tx = self.get(tx_id)?;
        Some(TransactionStatus {
            transaction_id: tx.transaction_id().to_string(),
            state: tx.state(),
            phases: tx
                .shard_ids()
                .into_iter()
                .filter_map(|shard| tx.phase_status(shard).map(|s| (shard, s)))
                .collect(),
            created_at: tx.created_at(),
            completed_at: tx.completed_at(),
            pending_verification: self.verifier.is_pending(tx_id),
        })
    }

    pub fn metrics(&self) -> CoordinatorMetrics {
        let mut metrics = CoordinatorMetrics {
            checkpoints: self.verifier.get_checkpoint_metrics(),
            ..Default::default()
        };
        for entry in self.transactions.iter() {
            metrics.total_transactions += 1;
            match entry.value().state() {
                TransactionState::Pending => metrics.pending += 1,
                TransactionState::Completed => metrics.completed += 1,
                TransactionState::Aborted => metrics.aborted += 1,
            }
        }
        metrics
    }

    /// Write every transaction and the verifier to the recovery store
    pub fn persist(&self) -> XShardResult<usize> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| XShardError::ConfigError("no recovery store configured".into()))?;

        let mut count = 0;
        for entry in self.transactions.iter() {
            store.put_transaction(entry.key(), &entry.value().to_record())?;
            count += 1;
        }
        store.put_verifier(&self.verifier.to_record())?;
        store.flush()?;
        Ok(count)
    }

    /// Evict aged checkpoints and forget finished transactions older than
    /// the checkpoint retention window
    pub fn cleanup(&self) -> XShardResult<CleanupReport> {
        let max_age = self.config.checkpoint_max_age()?;
        let checkpoints_evicted = self.verifier.cleanup_old_checkpoints(max_age);

        let cutoff = now() - max_age;
        let finished: Vec<TxId> = self
            .transactions
            .iter()
            .filter(|entry| entry.value().state().is_terminal() && entry.value().created_at() <= cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        for tx_id in &finished {
            self.transactions.remove(tx_id);
            if let Some(store) = &self.store {
                store.remove_transaction(tx_id)?;
            }
        }

        Ok(CleanupReport {
            checkpoints_evicted,
            transactions_removed: finished.len(),
        })
    }
}
