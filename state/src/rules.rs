//! Invariants a cross-shard state change must preserve

use xshard_core::{CoordinatorConfig, TransitionViolation};

use crate::account::ShardState;

/// Validity rules for a shard moving from a checkpointed state to a new one
///
/// A legal transition:
/// 1. keeps exactly the same set of accounts,
/// 2. conserves the total balance exactly,
/// 3. leaves every non-balance field untouched,
/// 4. moves no account's balance by more than `max_delta_percent` of its
///    previous balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRules {
    pub max_delta_percent: u64,
}

impl Default for TransitionRules {
    fn default() -> Self {
        Self {
            max_delta_percent: 50,
        }
    }
}

impl From<&CoordinatorConfig> for TransitionRules {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            max_delta_percent: config.max_delta_percent,
        }
    }
}

impl TransitionRules {
    pub fn validate(
        &self,
        previous: &ShardState,
        current: &ShardState,
    ) -> Result<(), TransitionViolation> {
        if !previous.account_ids().eq(current.account_ids()) {
            return Err(TransitionViolation::AccountSetMismatch);
        }

        let before = previous.total_balance();
        let after = current.total_balance();
        if before != after {
            return Err(TransitionViolation::ConservationViolated { before, after });
        }

        for ((account, prev), (_, curr)) in previous.accounts().zip(current.accounts()) {
            if prev.fields != curr.fields {
                return Err(TransitionViolation::StaticFieldsChanged {
                    account: account.clone(),
                });
            }

            // |delta| / previous > pct / 100, kept in integers
            let delta = prev.balance.abs_diff(curr.balance) as u128;
            if delta * 100 > prev.balance.0 as u128 * self.max_delta_percent as u128 {
                return Err(TransitionViolation::DeltaCapExceeded {
                    account: account.clone(),
                    previous: prev.balance,
                    current: curr.balance,
                });
            }
        }

        Ok(())
    }
}
