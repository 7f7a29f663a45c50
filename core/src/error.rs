//! Error types for the cross-shard engine

use crate::types::{Amount, ShardId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad category of a failure
///
/// Every category except `Internal` is an expected protocol outcome that the
/// caller decides how to handle (retry, escalate, abort).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Structural,
    Authentication,
    Policy,
    Consistency,
    MissingState,
    Internal,
}

/// Reason a proposed state change breaks an invariant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionViolation {
    #[error("account set changed")]
    AccountSetMismatch,

    #[error("balance not conserved: before {before}, after {after}")]
    ConservationViolated { before: u128, after: u128 },

    #[error("non-balance fields changed for account {account}")]
    StaticFieldsChanged { account: String },

    #[error("balance delta for account {account} exceeds cap: {previous} -> {current}")]
    DeltaCapExceeded {
        account: String,
        previous: Amount,
        current: Amount,
    },

    #[error("negative value for '{key}' in new state")]
    NegativeValue { key: String },

    #[error("content id mismatch: stored {stored}, computed {computed}")]
    IdMismatch { stored: String, computed: String },
}

/// Main error type for the cross-shard engine
#[derive(Error, Debug)]
pub enum XShardError {
    // ============ Structural Errors ============
    #[error("Shard {shard} is not part of transaction {tx_id}")]
    UnknownShard { tx_id: String, shard: ShardId },

    #[error("Invalid phase status for shard {shard}: expected {expected}, found {found}")]
    InvalidPhaseStatus {
        shard: ShardId,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Phase for shard {shard} expired after {age_secs}s without activity")]
    PhaseExpired { shard: ShardId, age_secs: i64 },

    #[error("Transaction {0} is aborted")]
    TransactionAborted(String),

    #[error("Transaction {0} is already completed")]
    TransactionCompleted(String),

    #[error("Transition {0} is not verified")]
    TransitionNotVerified(String),

    #[error("Transition {0} is not applied")]
    TransitionNotApplied(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    // ============ Authentication Errors ============
    #[error("Identity verification failed for {0}")]
    IdentityVerificationFailed(String),

    // ============ Policy Errors ============
    #[error("Governance rejected {action} for transaction {tx_id}")]
    GovernanceRejected { tx_id: String, action: &'static str },

    #[error("Governance unavailable: {0}")]
    GovernanceUnavailable(String),

    // ============ Consistency Errors ============
    #[error("Invalid state transition: {0}")]
    InvalidTransition(#[from] TransitionViolation),

    // ============ Missing State Errors ============
    #[error("No checkpoint for transaction {tx_id} in shard {shard}")]
    MissingCheckpoint { tx_id: String, shard: ShardId },

    #[error("Transaction {0} not found")]
    TransactionNotFound(String),

    // ============ Internal Errors ============
    #[error("Serialization failed: {0}")]
    SerializationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl XShardError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            XShardError::UnknownShard { .. }
            | XShardError::InvalidPhaseStatus { .. }
            | XShardError::PhaseExpired { .. }
            | XShardError::TransactionAborted(_)
            | XShardError::TransactionCompleted(_)
            | XShardError::TransitionNotVerified(_)
            | XShardError::TransitionNotApplied(_)
            | XShardError::InvalidPayload(_) => ErrorKind::Structural,
            XShardError::IdentityVerificationFailed(_) => ErrorKind::Authentication,
            XShardError::GovernanceRejected { .. } | XShardError::GovernanceUnavailable(_) => {
                ErrorKind::Policy
            }
            XShardError::InvalidTransition(_) => ErrorKind::Consistency,
            XShardError::MissingCheckpoint { .. } | XShardError::TransactionNotFound(_) => {
                ErrorKind::MissingState
            }
            XShardError::SerializationError(_)
            | XShardError::StorageError(_)
            | XShardError::KeyDerivationFailed(_)
            | XShardError::ConfigError(_)
            | XShardError::Internal(_)
            | XShardError::Other(_) => ErrorKind::Internal,
        }
    }

    /// The invariant violation behind a consistency failure, if any
    pub fn violation(&self) -> Option<&TransitionViolation> {
        match self {
            XShardError::InvalidTransition(v) => Some(v),
            _ => None,
        }
    }
}

impl From<std::io::Error> for XShardError {
    fn from(err: std::io::Error) -> Self {
        XShardError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for XShardError {
    fn from(err: serde_json::Error) -> Self {
        XShardError::SerializationError(err.to_string())
    }
}

/// Result type for cross-shard operations
pub type XShardResult<T> = Result<T, XShardError>;
