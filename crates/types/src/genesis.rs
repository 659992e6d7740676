//! The genesis bundle.

use crate::{Address, Block, BlockBody, BlockHeader, Hash};
use serde::{Deserialize, Serialize};

/// Everything needed to bootstrap an empty chain: the genesis timestamp and
/// the initial balance allocation.
///
/// The derived genesis block is deterministic, so every node that shares a
/// bundle agrees on block 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    /// Timestamp stamped into the genesis header.
    pub timestamp: i64,

    /// Initial balances, applied to the state before block 1.
    pub balances: Vec<(Address, u64)>,
}

impl Genesis {
    /// A bundle with no pre-funded accounts.
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            balances: Vec::new(),
        }
    }

    /// Add a pre-funded account.
    pub fn with_balance(mut self, address: Address, balance: u64) -> Self {
        self.balances.push((address, balance));
        self
    }

    /// Derive the genesis block. `state_root` is the root of the state after
    /// the balance allocation has been applied.
    pub fn block(&self, state_root: Hash) -> Block {
        let header = BlockHeader {
            block_no: 0,
            prev_hash: Hash::ZERO,
            blocks_root_hash: state_root,
            timestamp: self.timestamp,
            coinbase: Address::default(),
            consensus: Vec::new(),
        };
        Block::new(header, BlockBody::default())
    }

    /// Encode the bundle for the `genesisInfo` index entry.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Decode a bundle read back from the index.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_block_is_deterministic() {
        let g = Genesis::new(1_700_000_000).with_balance(Address::from_name("alice"), 100);
        let root = Hash::digest(b"root");
        assert_eq!(g.block(root).hash(), g.block(root).hash());
        assert_eq!(g.block(root).block_no(), 0);
        assert_eq!(g.block(root).prev_hash(), Hash::ZERO);
    }

    #[test]
    fn test_bundle_round_trips() {
        let g = Genesis::new(42).with_balance(Address::from_name("bob"), 7);
        let decoded = Genesis::from_bytes(&g.to_bytes()).expect("decode");
        assert_eq!(decoded, g);
    }
}
