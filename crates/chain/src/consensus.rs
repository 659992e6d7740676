//! The consensus seam.
//!
//! Block production and leader election live outside this crate; the chain
//! service only needs the validation and weight hooks below.

use crate::ChainError;
use meridian_store::KvBatch;
use meridian_types::{Block, BlockNo, Hash, Receipt};

/// What the chain service asks of the consensus engine.
pub trait Consensus: Send {
    /// Validate an incoming block against the current best block before any
    /// other processing. Consensus-header checks belong here.
    fn is_block_valid(&self, block: &Block, best: &Block) -> Result<(), ChainError>;

    /// Structural and consensus validation run just before executing a block
    /// that did not come from the local producer.
    fn validate_block(&self, block: &Block) -> Result<(), ChainError>;

    /// Validate the execution outcome: the computed state root must equal the
    /// root committed to in the header, and receipts must mirror the body.
    fn validate_post(&self, root: Hash, receipts: &[Receipt], block: &Block) -> Result<(), ChainError>;

    /// Whether the branch ending in `branch_tip` outweighs the canonical
    /// chain at height `latest`.
    fn need_reorg(&self, branch_tip: &Block, latest: BlockNo) -> bool;

    /// Stage the consensus checkpoint alongside a canonical-chain write.
    fn save(&self, batch: &mut KvBatch);

    /// Observe a newly connected canonical block.
    fn update_status(&mut self, block: &Block);
}

/// Longest-chain proof-of-stake weighting with structural validation.
///
/// The production engine replaces this; tests and the simulated network run
/// on it directly.
#[derive(Debug, Default)]
pub struct SimplePos;

impl SimplePos {
    /// Create the engine.
    pub fn new() -> Self {
        Self
    }

    fn check_structure(&self, block: &Block) -> Result<(), ChainError> {
        if block.calculate_hash() != block.hash() {
            return Err(ChainError::InvalidBlock("header hash mismatch".into()));
        }
        if block.block_no() > 0 && block.prev_hash().is_zero() {
            return Err(ChainError::InvalidBlock("missing prev hash".into()));
        }
        for tx in &block.body.txs {
            if !tx.is_hash_consistent() {
                return Err(ChainError::InvalidBlock(format!("tx hash mismatch: {}", tx.hash())));
            }
        }
        Ok(())
    }
}

impl Consensus for SimplePos {
    fn is_block_valid(&self, block: &Block, best: &Block) -> Result<(), ChainError> {
        self.check_structure(block)?;
        // A block claiming a height far below the tip carries no weight and
        // is dropped before touching the index.
        if block.block_no() == 0 && block.hash() != best.hash() && best.block_no() == 0 {
            return Err(ChainError::Consensus("conflicting genesis".into()));
        }
        Ok(())
    }

    fn validate_block(&self, block: &Block) -> Result<(), ChainError> {
        self.check_structure(block)
    }

    fn validate_post(&self, root: Hash, receipts: &[Receipt], block: &Block) -> Result<(), ChainError> {
        if root != block.header.blocks_root_hash {
            return Err(ChainError::Consensus(format!(
                "state root mismatch: computed {root}, header {}",
                block.header.blocks_root_hash
            )));
        }
        if receipts.len() != block.body.txs.len() {
            return Err(ChainError::Consensus(format!(
                "receipt count mismatch: {} receipts for {} txs",
                receipts.len(),
                block.body.txs.len()
            )));
        }
        Ok(())
    }

    fn need_reorg(&self, branch_tip: &Block, latest: BlockNo) -> bool {
        branch_tip.block_no() > latest
    }

    fn save(&self, _batch: &mut KvBatch) {}

    fn update_status(&mut self, _block: &Block) {}
}
