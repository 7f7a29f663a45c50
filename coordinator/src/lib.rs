//! Cross-shard coordination
//!
//! Two-phase commit across shards ([`CrossShardTransaction`]), checkpoint
//! verification and rollback ([`StateVerifier`]), and a registry tying them
//! together ([`CrossShardCoordinator`]).

pub mod phase;
pub mod transaction;
pub mod checkpoint;
pub mod verifier;
pub mod coordinator;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use phase::*;
pub use transaction::*;
pub use checkpoint::*;
pub use verifier::*;
pub use coordinator::*;
pub use telemetry::*;
