//! Chain and transaction errors.

use meridian_engine::governance::GovernanceError;
use meridian_state::StateError;
use meridian_store::StoreError;
use meridian_types::Hash;
use thiserror::Error;

/// Rejection of a single transaction.
///
/// These are validation failures: the transaction is dropped and never
/// retried. Contract engine failures are deliberately *not* here; they are
/// absorbed into receipts by the executor.
#[derive(Debug, Error)]
pub enum TxError {
    /// Nonce did not follow the sender's current nonce.
    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce {
        /// The nonce the sender state requires.
        expected: u64,
        /// The nonce the transaction carried.
        got: u64,
    },

    /// Balance cannot cover amount plus fee.
    #[error("insufficient balance: have {balance}, need {needed}")]
    InsufficientBalance {
        /// The sender's balance.
        balance: u64,
        /// Amount plus fee.
        needed: u64,
    },

    /// The cached hash does not match the body.
    #[error("tx hash mismatch")]
    InvalidHash,

    /// Missing sender or an otherwise malformed recipient.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Unknown or inapplicable transaction type.
    #[error("invalid type")]
    InvalidType,

    /// A governance transition failed. Logged and surfaced.
    #[error("governance: {0}")]
    Governance(#[from] GovernanceError),
}

/// Failures inside the chain service.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The block's parent is not known locally.
    #[error("block is orphan, not connected in chain")]
    Orphan,

    /// A block produced locally can never be an orphan.
    #[error("block received from block producer cannot be orphan")]
    OrphanWithState,

    /// No block under the given hash.
    #[error("block not found: hash={0}")]
    NoBlockByHash(Hash),

    /// No canonical block at the given height.
    #[error("block not found: no={0}")]
    NoBlockByNo(u64),

    /// The chain db has not been initialized.
    #[error("chaindb not prepared")]
    NoChainDb,

    /// `swap_chain` was asked to install a chain that does not outgrow the
    /// canonical one.
    #[error("new chain is not longer than old chain")]
    InvalidSwapChain,

    /// No common ancestor could be found.
    #[error("not found ancestor")]
    NoAncestor,

    /// No such transaction on the canonical chain.
    #[error("tx not found: {0}")]
    NoTx(Hash),

    /// The transaction's block left the canonical chain.
    #[error("tx is not in the main chain")]
    TxNotInMainChain,

    /// No receipt under the given location.
    #[error("cannot find a receipt")]
    NoReceipt,

    /// Structural block validation failed.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// Consensus rejected the block or the post-state. Non-fatal during
    /// reorganization.
    #[error("consensus: {0}")]
    Consensus(String),

    /// A stored value failed to decode. Treated as an invariant breach by
    /// callers that expect the value to exist.
    #[error("corrupt store entry: {0}")]
    Codec(String),

    /// A transaction was rejected during block execution.
    #[error(transparent)]
    Tx(#[from] TxError),

    /// The state layer failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// The store backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChainError {
    /// Whether this error originated in the consensus engine. Reorganization
    /// treats these as a stop signal rather than a crash.
    pub fn is_consensus(&self) -> bool {
        matches!(self, ChainError::Consensus(_))
    }
}
