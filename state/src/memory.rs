//! In-memory multi-shard ledger for simulation and tests

use dashmap::DashMap;
use xshard_core::{Amount, ShardId, XShardError, XShardResult};

use crate::account::{AccountRecord, ShardState};
use crate::snapshot::StateSnapshot;

/// Live per-shard account state
///
/// Each shard entry is locked independently, so operations on different
/// shards never contend.
pub struct ShardLedger {
    shards: DashMap<ShardId, ShardState>,
}

impl ShardLedger {
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
        }
    }

    /// Build a ledger where every shard holds the same accounts and balance
    pub fn with_shards(shard_count: u32, accounts_per_shard: u32, balance: u64) -> Self {
        let ledger = Self::new();
        for shard in 0..shard_count {
            let state = (0..accounts_per_shard)
                .map(|i| (format!("acct-{}-{}", shard, i), AccountRecord::new(balance)))
                .collect();
            ledger.insert_shard(ShardId(shard), state);
        }
        ledger
    }

    pub fn insert_shard(&self, shard: ShardId, state: ShardState) {
        self.shards.insert(shard, state);
    }

    /// Sorted shard ids
    pub fn shard_ids(&self) -> Vec<ShardId> {
        let mut ids: Vec<ShardId> = self.shards.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Copy of the current state of a shard
    pub fn state(&self, shard: ShardId) -> Option<ShardState> {
        self.shards.get(&shard).map(|s| s.value().clone())
    }

    pub fn snapshot(&self, shard: ShardId) -> XShardResult<StateSnapshot> {
        let state = self
            .shards
            .get(&shard)
            .ok_or_else(|| XShardError::Internal(format!("unknown shard {}", shard)))?;
        StateSnapshot::capture(state.value())
    }

    /// Replace a shard's state wholesale, e.g. with a rolled-back copy
    pub fn install(&self, shard: ShardId, state: ShardState) {
        self.shards.insert(shard, state);
    }

    /// Move `amount` between two accounts of the same shard
    pub fn transfer(&self, shard: ShardId, from: &str, to: &str, amount: u64) -> XShardResult<()> {
        let mut entry = self
            .shards
            .get_mut(&shard)
            .ok_or_else(|| XShardError::Internal(format!("unknown shard {}", shard)))?;
        let state = entry.value_mut();
        let amount = Amount::new(amount);

        let debited = state
            .get(from)
            .ok_or_else(|| XShardError::InvalidPayload(format!("unknown account {}", from)))?
            .balance
            .checked_sub(amount)
            .ok_or_else(|| XShardError::InvalidPayload(format!("insufficient funds in {}", from)))?;
        let credited = state
            .get(to)
            .ok_or_else(|| XShardError::InvalidPayload(format!("unknown account {}", to)))?
            .balance
            .checked_add(amount)
            .ok_or_else(|| XShardError::InvalidPayload(format!("balance overflow in {}", to)))?;

        if let Some(account) = state.get_mut(from) {
            account.balance = debited;
        }
        if let Some(account) = state.get_mut(to) {
            account.balance = credited;
        }
        Ok(())
    }

    /// Overwrite one balance; bypasses conservation, used to inject faults
    pub fn set_balance(&self, shard: ShardId, account: &str, balance: u64) -> XShardResult<()> {
        let mut entry = self
            .shards
            .get_mut(&shard)
            .ok_or_else(|| XShardError::Internal(format!("unknown shard {}", shard)))?;
        let record = entry
            .value_mut()
            .get_mut(account)
            .ok_or_else(|| XShardError::InvalidPayload(format!("unknown account {}", account)))?;
        record.balance = Amount::new(balance);
        Ok(())
    }

    /// Sum of balances across all shards
    pub fn total_balance(&self) -> u128 {
        self.shards.iter().map(|e| e.value().total_balance()).sum()
    }
}

impl Default for ShardLedger {
    fn default() -> Self {
        Self::new()
    }
}
