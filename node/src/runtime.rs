//! Simulation runtime combining the ledger, validators and coordinator

use serde::Serialize;
use serde_json::{json, Map};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use xshard_coordinator::{
    tracing_telemetry, CrossShardCoordinator, CrossShardTransaction, StateVerifier,
    TransactionState,
};
use xshard_core::{
    no_governance, LedgerTransaction, NodeConfig, ShardId, ValidatorIdentity, XShardError,
    XShardResult,
};
use xshard_crypto::{KeyIdentity, MasterKey};
use xshard_state::{SharedRecoveryStore, ShardLedger, ShardState};

/// Outcome of one simulated cross-shard transfer
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub transaction_id: String,
    pub state: TransactionState,
    pub verified: bool,
    pub restored_shards: Vec<ShardId>,
    pub total_before: u128,
    pub total_after: u128,
    pub failures: Vec<String>,
}

/// Validator outcome of one protocol round
type RoundResult = (usize, XShardResult<bool>);

/// Simulated shards driven through the commit protocol by local validators
pub struct SimulationRuntime {
    config: NodeConfig,
    ledger: Arc<ShardLedger>,
    coordinator: Arc<CrossShardCoordinator>,
    validators: Vec<Arc<KeyIdentity>>,
}

impl SimulationRuntime {
    pub fn new(config: NodeConfig, store: Option<SharedRecoveryStore>) -> XShardResult<Self> {
        let sim = &config.simulation;
        if sim.shards == 0 {
            return Err(XShardError::ConfigError("at least one shard is required".into()));
        }
        if sim.accounts_per_shard < 2 {
            return Err(XShardError::ConfigError(
                "each shard needs two accounts to move funds between".into(),
            ));
        }

        let master = if sim.validator_seed.is_empty() {
            MasterKey::generate()
        } else {
            MasterKey::from_hex(&sim.validator_seed)?
        };
        let validators = (0..sim.validators as u32)
            .map(|i| Ok(Arc::new(KeyIdentity::new(master.validator_keypair(i)?))))
            .collect::<XShardResult<Vec<_>>>()?;

        let ledger = Arc::new(ShardLedger::with_shards(
            sim.shards,
            sim.accounts_per_shard as u32,
            sim.initial_balance,
        ));

        let mut coordinator = CrossShardCoordinator::new(
            config.coordinator.clone(),
            no_governance(),
            tracing_telemetry(),
        )?;
        if let Some(store) = store {
            coordinator = coordinator.with_store(store);
        }

        info!(
            "Simulation ready: {} shards, {} validators",
            sim.shards,
            validators.len()
        );

        Ok(Self {
            config,
            ledger,
            coordinator: Arc::new(coordinator),
            validators,
        })
    }

    pub fn ledger(&self) -> &Arc<ShardLedger> {
        &self.ledger
    }

    pub fn coordinator(&self) -> &Arc<CrossShardCoordinator> {
        &self.coordinator
    }

    pub fn validator_dids(&self) -> Vec<String> {
        self.validators.iter().map(|v| v.did()).collect()
    }

    /// Run one cross-shard transfer from shard 0 to every other shard
    ///
    /// Each shard moves `transfer_amount` between its first two accounts.
    /// With `faulty`, the last shard also mints funds, which breaks
    /// conservation and must end in abort and rollback.
    pub async fn run_transfer(&self, faulty: bool) -> XShardResult<SimulationReport> {
        let sim = &self.config.simulation;
        let source = ShardId(0);
        let targets: Vec<ShardId> = (1..sim.shards).map(ShardId).collect();
        let total_before = self.ledger.total_balance();

        let mut data = Map::new();
        data.insert("amount".into(), json!(sim.transfer_amount));
        let primary = LedgerTransaction::new(
            "acct-0-0",
            format!("acct-{}-0", sim.shards - 1),
            "cross_shard_transfer",
            data,
        )?
        .with_shard(source)?;

        let tx = self.coordinator.begin(primary, source, targets)?;
        let tx_id = tx.transaction_id().to_string();
        let coordinator_identity = self
            .validators
            .first()
            .map(|v| v.as_ref() as &dyn ValidatorIdentity);
        self.coordinator
            .checkpoint_all(&tx_id, &self.ledger, coordinator_identity)
            .await?;

        self.apply_local_changes(&tx, faulty)?;
        let observed = Arc::new(self.observe(&tx));

        let verified = self.verify_and_prepare(&tx, &observed).await;
        let verified = match verified {
            Ok(true) => self.commit(&tx).await,
            Ok(false) => Err(XShardError::Internal(
                "verification quorum not reached".into(),
            )),
            Err(e) => Err(e),
        };

        let mut restored_shards = Vec::new();
        let verified = match verified {
            Ok(()) => true,
            Err(e) => {
                warn!("Transaction {} failed: {}", tx_id, e);
                restored_shards = self
                    .coordinator
                    .abort_and_rollback(&tx_id, &e.to_string(), &self.ledger, coordinator_identity)
                    .await?;
                false
            }
        };

        if let Err(e) = self.coordinator.persist() {
            warn!("Not persisting simulation state: {}", e);
        }

        Ok(SimulationReport {
            transaction_id: tx_id.clone(),
            state: tx.state(),
            verified,
            restored_shards,
            total_before,
            total_after: self.ledger.total_balance(),
            failures: self.coordinator.verifier().failures(&tx_id),
        })
    }

    fn apply_local_changes(&self, tx: &CrossShardTransaction, faulty: bool) -> XShardResult<()> {
        let amount = self.config.simulation.transfer_amount;
        for shard in tx.shard_ids() {
            let from = format!("acct-{}-0", shard.0);
            let to = format!("acct-{}-1", shard.0);
            self.ledger.transfer(shard, &from, &to, amount)?;
        }

        if faulty {
            let last = tx.shard_ids().last().copied().unwrap_or(ShardId(0));
            let account = format!("acct-{}-1", last.0);
            let balance = self
                .ledger
                .state(last)
                .and_then(|s| s.get(&account).map(|a| a.balance.0))
                .unwrap_or_default();
            self.ledger.set_balance(last, &account, balance + amount)?;
        }
        Ok(())
    }

    fn observe(&self, tx: &CrossShardTransaction) -> BTreeMap<ShardId, ShardState> {
        tx.shard_ids()
            .into_iter()
            .filter_map(|shard| self.ledger.state(shard).map(|s| (shard, s)))
            .collect()
    }

    /// Every validator verifies the observed states, then prepares every shard
    async fn verify_and_prepare(
        &self,
        tx: &Arc<CrossShardTransaction>,
        observed: &Arc<BTreeMap<ShardId, ShardState>>,
    ) -> XShardResult<bool> {
        let mut tasks: JoinSet<RoundResult> = JoinSet::new();
        for (index, validator) in self.validators.iter().enumerate() {
            let tx = Arc::clone(tx);
            let verifier = Arc::clone(self.coordinator.verifier());
            let observed = Arc::clone(observed);
            let validator = Arc::clone(validator);
            tasks.spawn(async move {
                let identity: &dyn ValidatorIdentity = validator.as_ref();
                let result = verify_then_prepare(index, &tx, &verifier, &observed, identity).await;
                (index, result)
            });
        }

        let mut any_verified = false;
        while let Some(joined) = tasks.join_next().await {
            let (index, result) =
                joined.map_err(|e| XShardError::Internal(format!("validator task failed: {}", e)))?;
            match result {
                Ok(verified) => any_verified |= verified,
                Err(e) => {
                    warn!("Validator {} rejected the transaction: {}", index, e);
                    return Err(e);
                }
            }
        }
        Ok(any_verified)
    }

    /// Every validator commits every prepared shard
    async fn commit(&self, tx: &Arc<CrossShardTransaction>) -> XShardResult<()> {
        let mut tasks: JoinSet<RoundResult> = JoinSet::new();
        for (index, validator) in self.validators.iter().enumerate() {
            let tx = Arc::clone(tx);
            let validator = Arc::clone(validator);
            tasks.spawn(async move {
                let identity: &dyn ValidatorIdentity = validator.as_ref();
                let mut committed = false;
                for shard in tx.shard_ids() {
                    match tx
                        .commit_phase(shard, &format!("validator-{}", index), identity)
                        .await
                    {
                        Ok(done) => committed |= done,
                        // later validators find the phase already committed
                        Err(XShardError::InvalidPhaseStatus { found: "committed", .. }) => {}
                        Err(XShardError::TransactionCompleted(_)) => {}
                        Err(e) => return (index, Err(e)),
                    }
                }
                (index, Ok(committed))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, result) =
                joined.map_err(|e| XShardError::Internal(format!("validator task failed: {}", e)))?;
            if let Err(e) = result {
                warn!("Validator {} failed to commit: {}", index, e);
            }
        }

        match tx.state() {
            TransactionState::Completed => Ok(()),
            other => Err(XShardError::Internal(format!(
                "transaction ended {:?} after commit round",
                other
            ))),
        }
    }
}

async fn verify_then_prepare(
    index: usize,
    tx: &CrossShardTransaction,
    verifier: &StateVerifier,
    observed: &BTreeMap<ShardId, ShardState>,
    identity: &dyn ValidatorIdentity,
) -> XShardResult<bool> {
    let verified = verifier.verify_state(tx, observed, Some(identity)).await?;
    let validator_id = format!("validator-{}", index);
    for shard in tx.shard_ids() {
        match tx.prepare_phase(shard, &validator_id, identity).await {
            Ok(_) => {}
            // quorum was reached before this vote arrived
            Err(XShardError::InvalidPhaseStatus { found: "prepared", .. }) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(verified)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.simulation.validator_seed = "00".repeat(32);
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_conserving_transfer_completes() {
        let runtime = SimulationRuntime::new(config(), None).unwrap();
        let report = runtime.run_transfer(false).await.unwrap();

        assert!(report.verified);
        assert_eq!(report.state, TransactionState::Completed);
        assert!(report.restored_shards.is_empty());
        assert_eq!(report.total_before, report.total_after);
        assert_eq!(
            runtime.ledger().state(ShardId(1)).unwrap().get("acct-1-1").unwrap().balance.0,
            1_100
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_faulty_transfer_rolls_back() {
        let runtime = SimulationRuntime::new(config(), None).unwrap();
        let before = runtime.ledger().state(ShardId(2)).unwrap();
        let report = runtime.run_transfer(true).await.unwrap();

        assert!(!report.verified);
        assert_eq!(report.state, TransactionState::Aborted);
        assert_eq!(report.restored_shards, vec![ShardId(0), ShardId(1), ShardId(2)]);
        assert_eq!(report.total_after, report.total_before);
        assert_eq!(runtime.ledger().state(ShardId(2)).unwrap(), before);
        assert!(!report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_too_few_validators_aborts() {
        let mut config = config();
        config.simulation.validators = 2;
        let runtime = SimulationRuntime::new(config, None).unwrap();
        let report = runtime.run_transfer(false).await.unwrap();

        assert_eq!(report.state, TransactionState::Aborted);
        assert_eq!(report.total_after, report.total_before);
    }

    #[test]
    fn test_deterministic_validators() {
        let a = SimulationRuntime::new(config(), None).unwrap();
        let b = SimulationRuntime::new(config(), None).unwrap();
        assert_eq!(a.validator_dids(), b.validator_dids());
        assert_eq!(a.validator_dids().len(), 4);
    }

    #[test]
    fn test_rejects_single_account_shards() {
        let mut config = config();
        config.simulation.accounts_per_shard = 1;
        assert!(SimulationRuntime::new(config, None).is_err());
    }
}
