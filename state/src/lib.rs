//! Shard state for the cross-shard engine
//!
//! Account model, immutable snapshots, transition invariants, generic state
//! transitions, an in-memory multi-shard ledger and sled-backed recovery
//! storage.

pub mod account;
pub mod snapshot;
pub mod rules;
pub mod transition;
pub mod memory;
pub mod persistent;

pub use account::*;
pub use snapshot::*;
pub use rules::*;
pub use transition::*;
pub use memory::*;
pub use persistent::*;
