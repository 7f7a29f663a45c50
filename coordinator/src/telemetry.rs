//! Coordination events and the observers that receive them

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use xshard_core::{Hash, ShardId, TransitionViolation, TxId};

/// Events emitted by the transaction and verifier components
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinationEvent {
    /// Phase reached its prepare quorum
    PhasePrepared { tx_id: TxId, shard: ShardId },
    /// Phase reached its commit quorum
    PhaseCommitted { tx_id: TxId, shard: ShardId },
    /// Phase aborted
    PhaseAborted {
        tx_id: TxId,
        shard: ShardId,
        reason: String,
    },
    /// Every phase committed
    TransactionCompleted { tx_id: TxId },
    /// Governance answered and said no
    GovernanceRejected {
        tx_id: TxId,
        shard: ShardId,
        action: &'static str,
    },
    /// Governance could not be reached
    GovernanceUnavailable { tx_id: TxId, error: String },
    /// Shard state checkpointed
    CheckpointCreated {
        tx_id: TxId,
        shard: ShardId,
        hash: Hash,
    },
    /// Checkpoint transition reached its verification quorum
    ShardVerified {
        tx_id: TxId,
        shard: ShardId,
        signatures: usize,
    },
    /// Observed post-state breaks an invariant
    TransitionRejected {
        tx_id: TxId,
        shard: ShardId,
        violation: TransitionViolation,
    },
    /// Checkpointed state handed back for reinstallation
    StateRolledBack {
        tx_id: TxId,
        shard: ShardId,
        hash: Hash,
    },
    /// Transactions whose checkpoints aged out
    CheckpointsEvicted { count: usize },
    /// A public operation failed
    OperationFailed {
        tx_id: TxId,
        operation: &'static str,
        error: String,
    },
}

/// Observer injected into every coordination component
pub trait Telemetry: Send + Sync {
    fn record(&self, event: CoordinationEvent);
}

/// Shared telemetry handle
pub type SharedTelemetry = Arc<dyn Telemetry>;

/// Renders events as `tracing` log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record(&self, event: CoordinationEvent) {
        match event {
            CoordinationEvent::PhasePrepared { tx_id, shard } => {
                info!("Shard {} prepared for transaction {}", shard, tx_id)
            }
            CoordinationEvent::PhaseCommitted { tx_id, shard } => {
                info!("Shard {} committed for transaction {}", shard, tx_id)
            }
            CoordinationEvent::PhaseAborted {
                tx_id,
                shard,
                reason,
            } => warn!("Aborted shard {} of transaction {}: {}", shard, tx_id, reason),
            CoordinationEvent::TransactionCompleted { tx_id } => {
                info!("Transaction {} completed", tx_id)
            }
            CoordinationEvent::GovernanceRejected {
                tx_id,
                shard,
                action,
            } => warn!(
                "Governance rejected {} on shard {} for transaction {}",
                action, shard, tx_id
            ),
            CoordinationEvent::GovernanceUnavailable { tx_id, error } => {
                error!("Governance unavailable for transaction {}: {}", tx_id, error)
            }
            CoordinationEvent::CheckpointCreated { tx_id, shard, hash } => info!(
                "Created checkpoint {} for transaction {} in shard {}",
                hash, tx_id, shard
            ),
            CoordinationEvent::ShardVerified {
                tx_id,
                shard,
                signatures,
            } => info!(
                "Shard {} verified for transaction {} with {} signatures",
                shard, tx_id, signatures
            ),
            CoordinationEvent::TransitionRejected {
                tx_id,
                shard,
                violation,
            } => warn!(
                "Rejected transition of shard {} for transaction {}: {}",
                shard, tx_id, violation
            ),
            CoordinationEvent::StateRolledBack { tx_id, shard, hash } => info!(
                "Rolled back shard {} for transaction {} to checkpoint {}",
                shard, tx_id, hash
            ),
            CoordinationEvent::CheckpointsEvicted { count } => {
                debug!("Cleaned up {} old checkpoints", count)
            }
            CoordinationEvent::OperationFailed {
                tx_id,
                operation,
                error,
            } => error!("{} failed for transaction {}: {}", operation, tx_id, error),
        }
    }
}

/// Forwards events into a bounded channel; drops them when it is full
#[derive(Debug, Clone)]
pub struct ChannelTelemetry {
    tx: mpsc::Sender<CoordinationEvent>,
}

impl ChannelTelemetry {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<CoordinationEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

impl Telemetry for ChannelTelemetry {
    fn record(&self, event: CoordinationEvent) {
        let _ = self.tx.try_send(event);
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record(&self, _event: CoordinationEvent) {}
}

pub fn tracing_telemetry() -> SharedTelemetry {
    Arc::new(TracingTelemetry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_telemetry_forwards_events() {
        let (telemetry, mut rx) = ChannelTelemetry::new(4);
        telemetry.record(CoordinationEvent::TransactionCompleted {
            tx_id: "tx-1".into(),
        });

        assert_eq!(
            rx.recv().await,
            Some(CoordinationEvent::TransactionCompleted {
                tx_id: "tx-1".into()
            })
        );
    }

    #[test]
    fn test_full_channel_drops_events() {
        let (telemetry, mut rx) = ChannelTelemetry::new(1);
        telemetry.record(CoordinationEvent::CheckpointsEvicted { count: 1 });
        telemetry.record(CoordinationEvent::CheckpointsEvicted { count: 2 });

        assert_eq!(
            rx.try_recv().ok(),
            Some(CoordinationEvent::CheckpointsEvicted { count: 1 })
        );
        assert!(rx.try_recv().is_err());
    }
}
