//! Node assembling configuration, recovery store and simulation runtime

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use xshard_coordinator::{
    tracing_telemetry, CleanupReport, CoordinatorMetrics, CrossShardCoordinator, TransactionStatus,
};
use xshard_core::{no_governance, NodeConfig, XShardResult};
use xshard_state::{create_recovery_store, RecoveryStore, SharedRecoveryStore};

use crate::runtime::{SimulationReport, SimulationRuntime};

/// Everything recovered from a data directory
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub metrics: CoordinatorMetrics,
    pub transactions: Vec<TransactionStatus>,
}

/// Cross-shard engine node
pub struct XShardNode {
    config: NodeConfig,
    store: Option<SharedRecoveryStore>,
}

impl XShardNode {
    pub fn new(config: NodeConfig, store: Option<SharedRecoveryStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Run `rounds` cross-shard transfers on a fresh simulated network
    pub async fn simulate(&self, rounds: usize, faulty: bool) -> XShardResult<Vec<SimulationReport>> {
        info!("Starting {} ({} rounds, faulty: {})", self.config.name, rounds, faulty);
        let runtime = SimulationRuntime::new(self.config.clone(), self.store.clone())?;

        let mut reports = Vec::with_capacity(rounds);
        for _ in 0..rounds {
            reports.push(runtime.run_transfer(faulty).await?);
        }

        let metrics = runtime.coordinator().metrics();
        info!(
            "Simulation finished: {} completed, {} aborted",
            metrics.completed, metrics.aborted
        );
        Ok(reports)
    }

    /// Recover the coordinator from the store and describe its contents
    pub fn inspect(&self) -> XShardResult<InspectReport> {
        let coordinator = self.recover()?;
        Ok(describe(&coordinator))
    }

    /// Recover, evict aged state, and write the result back
    pub fn cleanup(&self) -> XShardResult<CleanupReport> {
        let coordinator = self.recover()?;
        let report = coordinator.cleanup()?;
        coordinator.persist()?;
        info!(
            "Evicted {} checkpoints and {} transactions",
            report.checkpoints_evicted, report.transactions_removed
        );
        Ok(report)
    }

    fn recover(&self) -> XShardResult<CrossShardCoordinator> {
        let store = match &self.store {
            Some(store) => Arc::clone(store),
            None => create_recovery_store(&self.config.data_dir)?,
        };
        CrossShardCoordinator::recover(
            self.config.coordinator.clone(),
            no_governance(),
            tracing_telemetry(),
            store,
        )
    }
}

fn describe(coordinator: &CrossShardCoordinator) -> InspectReport {
    let mut transactions: Vec<TransactionStatus> = coordinator
        .transaction_ids()
        .iter()
        .filter_map(|tx_id| coordinator.transaction_status(tx_id))
        .collect();
    transactions.sort_by_key(|status| status.created_at);

    InspectReport {
        metrics: coordinator.metrics(),
        transactions,
    }
}

/// Node builder for easier configuration
pub struct NodeBuilder {
    config: NodeConfig,
    persist: bool,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            persist: false,
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn shards(mut self, shards: u32) -> Self {
        self.config.simulation.shards = shards;
        self
    }

    pub fn validators(mut self, validators: usize) -> Self {
        self.config.simulation.validators = validators;
        self
    }

    pub fn seed(mut self, seed: impl Into<String>) -> Self {
        self.config.simulation.validator_seed = seed.into();
        self
    }

    /// Write transactions and checkpoints to `data_dir` after each round
    pub fn persist(mut self) -> Self {
        self.persist = true;
        self
    }

    pub fn build(self) -> XShardResult<XShardNode> {
        self.config.coordinator.validate()?;
        let store = if self.persist {
            Some(Arc::new(RecoveryStore::open(&self.config.data_dir)?))
        } else {
            None
        };
        Ok(XShardNode::new(self.config, store))
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use xshard_coordinator::TransactionState;

    const SEED: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simulation_persists_and_recovers() {
        let dir = TempDir::new().unwrap();
        let node = NodeBuilder::new()
            .data_dir(dir.path())
            .seed(SEED)
            .persist()
            .build()
            .unwrap();

        let reports = node.simulate(2, false).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.state == TransactionState::Completed));

        let inspected = node.inspect().unwrap();
        assert_eq!(inspected.metrics.total_transactions, 2);
        assert_eq!(inspected.metrics.completed, 2);
        assert_eq!(inspected.transactions.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_faulty_simulation_recorded_as_aborted() {
        let dir = TempDir::new().unwrap();
        let node = NodeBuilder::new()
            .data_dir(dir.path())
            .seed(SEED)
            .persist()
            .build()
            .unwrap();

        let reports = node.simulate(1, true).await.unwrap();
        assert_eq!(reports[0].state, TransactionState::Aborted);

        let inspected = node.inspect().unwrap();
        assert_eq!(inspected.metrics.aborted, 1);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_transactions() {
        let dir = TempDir::new().unwrap();
        let node = NodeBuilder::new()
            .data_dir(dir.path())
            .seed(SEED)
            .persist()
            .build()
            .unwrap();
        node.simulate(1, false).await.unwrap();

        let report = node.cleanup().unwrap();
        assert_eq!(report, CleanupReport::default());
        assert_eq!(node.inspect().unwrap().metrics.total_transactions, 1);
    }

    #[test]
    fn test_builder_rejects_invalid_thresholds() {
        let mut config = NodeConfig::default();
        config.coordinator.required_validations = 0;
        assert!(NodeBuilder::new().config(config).build().is_err());
    }
}
