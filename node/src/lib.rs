//! Cross-shard engine node
//!
//! Drives simulated shards and validators through the coordinator and
//! inspects what a previous run left in the recovery store.

mod node;
mod runtime;

pub use node::*;
pub use runtime::*;
