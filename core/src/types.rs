//! Core types for the cross-shard engine
//!
//! Defines the identifiers and value types shared by every component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{hex::Hex, serde_as};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{XShardError, XShardResult};

/// Identifier of an independently owned ledger partition
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ShardId(pub u32);

impl ShardId {
    pub fn new(id: u32) -> Self {
        ShardId(id)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard:{}", self.0)
    }
}

impl fmt::Debug for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardId({})", self.0)
    }
}

impl From<u32> for ShardId {
    fn from(id: u32) -> Self {
        ShardId(id)
    }
}

/// 32-byte content hash, hex encoded on the wire
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash(#[serde_as(as = "Hex")] pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::ZERO
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", &self.to_hex()[..16])
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(0x{})", self.to_hex())
    }
}

/// Balance amount in minor units
///
/// Integer units keep balance conservation exact; there is no
/// floating-point tolerance anywhere in the engine.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn new(value: u64) -> Self {
        Amount(value)
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Absolute difference between two amounts
    pub fn abs_diff(self, other: Amount) -> u64 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0)
    }
}

/// Identifier of a cross-shard transaction
pub type TxId = String;

/// Current wall-clock time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Primary ledger transaction carried by a cross-shard transaction
///
/// The coordinator treats it as opaque apart from handing it to governance
/// and round-tripping it through persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub sender: String,
    pub receiver: String,
    pub action: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub shard_id: Option<ShardId>,
    pub transaction_id: String,
}

#[derive(Serialize)]
struct LedgerTransactionContent<'a> {
    sender: &'a str,
    receiver: &'a str,
    action: &'a str,
    data: &'a Map<String, Value>,
    timestamp: &'a DateTime<Utc>,
    shard_id: Option<ShardId>,
}

impl LedgerTransaction {
    /// Create a new transaction, deriving its id from the content
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        action: impl Into<String>,
        data: Map<String, Value>,
    ) -> XShardResult<Self> {
        let mut tx = Self {
            sender: sender.into(),
            receiver: receiver.into(),
            action: action.into(),
            data,
            timestamp: now(),
            shard_id: None,
            transaction_id: String::new(),
        };
        tx.validate_fields()?;
        tx.transaction_id = tx.calculate_id()?;
        Ok(tx)
    }

    /// Pin the transaction to a shard, recomputing its id
    pub fn with_shard(mut self, shard_id: ShardId) -> XShardResult<Self> {
        self.shard_id = Some(shard_id);
        self.transaction_id = self.calculate_id()?;
        Ok(self)
    }

    /// SHA-256 over the canonical JSON encoding of the content fields
    pub fn calculate_id(&self) -> XShardResult<String> {
        let content = LedgerTransactionContent {
            sender: &self.sender,
            receiver: &self.receiver,
            action: &self.action,
            data: &self.data,
            timestamp: &self.timestamp,
            shard_id: self.shard_id,
        };
        let bytes = serde_json::to_vec(&content)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    fn validate_fields(&self) -> XShardResult<()> {
        if self.sender.is_empty() {
            return Err(XShardError::InvalidPayload("sender cannot be empty".into()));
        }
        if self.receiver.is_empty() {
            return Err(XShardError::InvalidPayload("receiver cannot be empty".into()));
        }
        if self.action.is_empty() {
            return Err(XShardError::InvalidPayload("action cannot be empty".into()));
        }
        Ok(())
    }

    /// Check required fields and that the stored id matches the content
    pub fn validate(&self) -> XShardResult<()> {
        self.validate_fields()?;
        let computed = self.calculate_id()?;
        if computed != self.transaction_id {
            return Err(XShardError::InvalidPayload(format!(
                "transaction id mismatch: stored {}, computed {}",
                self.transaction_id, computed
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> XShardResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> XShardResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
