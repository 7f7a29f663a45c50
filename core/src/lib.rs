//! Cross-shard engine core library
//!
//! Core types, errors, collaborator traits and configuration shared by the
//! coordinator, state and node crates.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
