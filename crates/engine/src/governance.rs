//! Governance transitions against the system account.
//!
//! Governance transactions address the well-known system account and carry a
//! JSON operation in their payload. Unlike contract calls, a failed
//! governance transition fails the transaction: the caller logs and
//! propagates the error.

use meridian_state::Storage;
use meridian_types::{AccountId, AccountState, Address};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the system account governance transactions must address.
pub const SYSTEM_ACCOUNT: &str = "meridian.system";

/// Address of the system account.
pub fn system_address() -> Address {
    Address::from_name(SYSTEM_ACCOUNT)
}

/// Errors raised by a governance transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GovernanceError {
    /// The recipient was not the system account.
    #[error("governance tx must address the system account")]
    InvalidRecipient,

    /// The payload could not be decoded.
    #[error("invalid governance payload: {0}")]
    InvalidPayload(String),

    /// Unstake exceeded the staked amount.
    #[error("insufficient stake: staked {staked}, requested {requested}")]
    InsufficientStake {
        /// Currently staked amount.
        staked: u64,
        /// Requested unstake amount.
        requested: u64,
    },
}

/// A governance operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "op")]
pub enum GovernanceOp {
    /// Lock the transaction amount as stake.
    Stake,
    /// Release the transaction amount back to the sender's balance.
    Unstake,
}

impl GovernanceOp {
    /// Encode for use as a transaction payload.
    pub fn to_bytes(self) -> Vec<u8> {
        serde_json::to_vec(&self).unwrap_or_default()
    }
}

/// Read an account's staked amount from the system account's storage.
pub fn staked_amount(system_storage: &Storage, staker: &AccountId) -> u64 {
    system_storage
        .get(staker.as_bytes().as_slice())
        .and_then(|v| v.as_slice().try_into().ok())
        .map(u64::from_le_bytes)
        .unwrap_or(0)
}

/// Apply a governance transition.
///
/// `sender` is the staker's in-flight account state (amount and fee checks
/// already done by the transaction executor); `system_storage` is the system
/// account's storage. On success the sender's balance reflects the stake
/// movement and the stake record is updated.
pub fn execute_governance(
    sender: &mut AccountState,
    sender_id: &AccountId,
    recipient: &Address,
    amount: u64,
    payload: &[u8],
    system_storage: &mut Storage,
) -> Result<(), GovernanceError> {
    if *recipient != system_address() {
        return Err(GovernanceError::InvalidRecipient);
    }

    let op: GovernanceOp =
        serde_json::from_slice(payload).map_err(|e| GovernanceError::InvalidPayload(e.to_string()))?;

    let staked = staked_amount(system_storage, sender_id);
    match op {
        GovernanceOp::Stake => {
            // Balance coverage of `amount` was validated by the executor.
            sender.balance -= amount;
            let new_stake = staked + amount;
            system_storage.insert(sender_id.as_bytes().to_vec(), new_stake.to_le_bytes().to_vec());

            tracing::info!(staker = ?sender_id, amount, total = new_stake, "stake added");
        }
        GovernanceOp::Unstake => {
            if staked < amount {
                return Err(GovernanceError::InsufficientStake {
                    staked,
                    requested: amount,
                });
            }
            sender.balance += amount;
            let new_stake = staked - amount;
            system_storage.insert(sender_id.as_bytes().to_vec(), new_stake.to_le_bytes().to_vec());

            tracing::info!(staker = ?sender_id, amount, total = new_stake, "stake released");
        }
    }

    Ok(())
}
