//! Core types for the meridian chain.
//!
//! This crate provides the foundational ledger types shared by every other
//! crate in the workspace:
//!
//! - [`Hash`], [`Address`], [`AccountId`]: identity and content addressing
//! - [`Block`], [`BlockHeader`], [`BlockInfo`]: the chain's unit of agreement
//! - [`SignedTx`], [`TxBody`], [`TxIdx`]: transactions and their chain index
//! - [`AccountState`], [`Receipt`]: execution inputs and outputs
//! - [`Genesis`]: the genesis bundle installed on first boot
//!
//! All persisted types derive `serde` and are written to the store with
//! `bincode`; the index *key* layouts (big-endian block numbers, the `"r"`
//! receipt prefix) live next to the types they address.

mod account;
mod block;
mod genesis;
mod hash;
mod receipt;
mod transaction;

pub use account::AccountState;
pub use block::{block_no_from_bytes, block_no_to_bytes, Block, BlockBody, BlockHeader, BlockInfo, BlockNo};
pub use genesis::Genesis;
pub use hash::{AccountId, Address, Hash};
pub use receipt::{Receipt, STATUS_CREATED, STATUS_SUCCESS};
pub use transaction::{SignedTx, TxBody, TxIdx, TxType};

/// Identity of a remote peer, as assigned by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, std::hash::Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    /// Create a peer id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
