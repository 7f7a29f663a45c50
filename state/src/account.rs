//! Shard account model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use xshard_core::{Amount, Hash, XShardResult};
use xshard_crypto::hashing::hash_canonical;

/// Account identifier within a shard
pub type AccountId = String;

/// One account of a shard
///
/// Only `balance` has meaning to the engine; every other field is carried
/// verbatim and must survive a cross-shard operation unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AccountRecord {
    #[serde(default)]
    pub balance: Amount,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl AccountRecord {
    pub fn new(balance: u64) -> Self {
        Self {
            balance: Amount::new(balance),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// Mapping of account id to account record for a single shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ShardState(BTreeMap<AccountId, AccountRecord>);

impl ShardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account: impl Into<AccountId>, record: AccountRecord) {
        self.0.insert(account.into(), record);
    }

    pub fn with_account(mut self, account: impl Into<AccountId>, record: AccountRecord) -> Self {
        self.insert(account, record);
        self
    }

    pub fn get(&self, account: &str) -> Option<&AccountRecord> {
        self.0.get(account)
    }

    pub fn get_mut(&mut self, account: &str) -> Option<&mut AccountRecord> {
        self.0.get_mut(account)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&AccountId, &AccountRecord)> {
        self.0.iter()
    }

    pub fn account_ids(&self) -> impl Iterator<Item = &AccountId> {
        self.0.keys()
    }

    /// Sum of all balances; u128 so the sum cannot overflow
    pub fn total_balance(&self) -> u128 {
        self.0.values().map(|a| a.balance.0 as u128).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Content hash of the whole state
    pub fn digest(&self) -> XShardResult<Hash> {
        hash_canonical(self)
    }
}

impl FromIterator<(AccountId, AccountRecord)> for ShardState {
    fn from_iter<I: IntoIterator<Item = (AccountId, AccountRecord)>>(iter: I) -> Self {
        ShardState(iter.into_iter().collect())
    }
}
