//! Transactions and their chain-index records.

use crate::{Address, Hash};
use serde::{Deserialize, Serialize};

/// Kind of transition a transaction requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    /// Balance transfer and/or contract execution.
    Normal,
    /// System-account operation (staking and the like).
    Governance,
}

/// The signed content of a transaction. The tx hash covers exactly these
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxBody {
    /// Sender nonce; must be exactly one above the sender's current nonce.
    pub nonce: u64,

    /// Sender address.
    pub account: Address,

    /// Recipient address. Empty means "create a contract".
    pub recipient: Address,

    /// Amount transferred from sender to recipient.
    pub amount: u64,

    /// Contract code (creation) or call payload (execution).
    pub payload: Vec<u8>,

    /// Transition kind.
    pub tx_type: TxType,

    /// Sender signature over the body.
    pub sign: Vec<u8>,
}

impl TxBody {
    /// Compute the hash of this body.
    pub fn calculate_hash(&self) -> Hash {
        let mut data = Vec::with_capacity(
            64 + self.account.as_bytes().len() + self.recipient.as_bytes().len() + self.payload.len() + self.sign.len(),
        );
        data.extend_from_slice(&self.nonce.to_be_bytes());
        data.extend_from_slice(self.account.as_bytes());
        data.extend_from_slice(self.recipient.as_bytes());
        data.extend_from_slice(&self.amount.to_be_bytes());
        data.extend_from_slice(&self.payload);
        data.push(match self.tx_type {
            TxType::Normal => 0,
            TxType::Governance => 1,
        });
        data.extend_from_slice(&self.sign);
        Hash::digest(&data)
    }
}

/// A transaction as it travels and is stored: body plus cached hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    /// `H(body)`.
    pub hash: Hash,

    /// The signed content.
    pub body: TxBody,
}

impl SignedTx {
    /// Seal a body into a transaction, computing the hash.
    pub fn new(body: TxBody) -> Self {
        let hash = body.calculate_hash();
        Self { hash, body }
    }

    /// Hash of this transaction.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Check that the cached hash matches the body.
    pub fn is_hash_consistent(&self) -> bool {
        self.hash == self.body.calculate_hash()
    }
}

/// Where a transaction landed on the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIdx {
    /// Hash of the containing block.
    pub block_hash: Hash,

    /// Position within the block body.
    pub idx: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> TxBody {
        TxBody {
            nonce: 1,
            account: Address::from_name("alice"),
            recipient: Address::from_name("bob"),
            amount: 30,
            payload: vec![],
            tx_type: TxType::Normal,
            sign: vec![0xAA; 4],
        }
    }

    #[test]
    fn test_sealed_tx_is_hash_consistent() {
        let tx = SignedTx::new(body());
        assert!(tx.is_hash_consistent());
    }

    #[test]
    fn test_tampered_tx_is_detected() {
        let mut tx = SignedTx::new(body());
        tx.body.amount = 31;
        assert!(!tx.is_hash_consistent());
    }

    #[test]
    fn test_hash_covers_type_and_payload() {
        let normal = body();
        let mut gov = normal.clone();
        gov.tx_type = TxType::Governance;
        assert_ne!(normal.calculate_hash(), gov.calculate_hash());

        let mut with_payload = normal.clone();
        with_payload.payload = b"set x".to_vec();
        assert_ne!(normal.calculate_hash(), with_payload.calculate_hash());
    }
}
