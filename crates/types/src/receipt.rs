//! Execution receipts.

use crate::AccountId;
use serde::{Deserialize, Serialize};

/// Receipt status of a successful contract call.
pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Receipt status of a successful contract creation.
pub const STATUS_CREATED: &str = "CREATED";

/// The externally visible outcome of one transaction.
///
/// Receipts are ordered exactly like the transactions in the block body. A
/// VM failure produces a receipt carrying the engine's error text instead of
/// failing the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Account the call or creation was addressed to.
    pub contract_address: AccountId,

    /// `"SUCCESS"`, `"CREATED"`, or the VM error text.
    pub status: String,

    /// Return value of the call, empty on failure.
    pub result: String,
}

impl Receipt {
    /// Build a receipt.
    pub fn new(contract_address: AccountId, status: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            contract_address,
            status: status.into(),
            result: result.into(),
        }
    }

    /// Whether this receipt records a successful call or creation.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS || self.status == STATUS_CREATED
    }
}
