//! Cross-shard engine cryptography
//!
//! Provides the primitives the coordinator hashes and authenticates with:
//! - BLAKE3 content hashing
//! - Ed25519 validator keys and DIDs
//! - HKDF validator key derivation

pub mod keys;
pub mod signing;
pub mod hashing;
pub mod derivation;
pub mod identity;

pub use keys::*;
pub use signing::*;
pub use hashing::*;
pub use derivation::*;
pub use identity::*;
