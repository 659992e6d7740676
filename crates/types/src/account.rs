//! Account state as held by the state db.

use crate::Hash;
use serde::{Deserialize, Serialize};

/// The versioned state of one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// Nonce of the last applied transaction from this account.
    pub nonce: u64,

    /// Spendable balance.
    pub balance: u64,

    /// Hash of the deployed contract code, if this is a contract account.
    pub code_hash: Option<Hash>,

    /// Root of the contract storage, if this is a contract account.
    pub storage_root: Option<Hash>,

    /// Contract-db savepoint written before each block so the contract store
    /// can be rolled forward deterministically after a restart.
    pub sql_recovery_point: u64,
}

impl AccountState {
    /// Fresh account holding `balance`.
    pub fn with_balance(balance: u64) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }

    /// Whether this account has contract code attached.
    pub fn is_contract(&self) -> bool {
        self.code_hash.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_account_is_not_a_contract() {
        let state = AccountState::with_balance(100);
        assert_eq!(state.balance, 100);
        assert_eq!(state.nonce, 0);
        assert!(!state.is_contract());
    }
}
