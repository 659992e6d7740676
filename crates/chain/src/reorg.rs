//! Canonical-chain replacement.

use crate::{ChainError, ChainService};
use meridian_store::KvBatch;
use meridian_types::Block;
use std::collections::HashSet;

impl ChainService {
    /// Swap the canonical chain suffix for the branch ending in
    /// `branch_tip`.
    ///
    /// Mechanics only; the decision that the branch outweighs the canonical
    /// chain was already made by consensus:
    ///
    /// 1. Walk back from the tip to the fork point on the canonical chain.
    /// 2. Roll the world state back to the fork point's root.
    /// 3. Re-execute the branch in full, block by block, each one passing
    ///    post-validation against its header root.
    /// 4. Atomically rewrite the number index and `latest`, then swap the
    ///    transaction index over.
    ///
    /// A failure at any block aborts: the state returns to the old tip's
    /// root and the index is untouched.
    pub(crate) fn reorg(&mut self, branch_tip: Block) -> Result<(), ChainError> {
        let old_tip = self.cdb().get_best_block().ok_or(ChainError::NoChainDb)?;

        // 1. Collect the branch, tip first, down to the fork point.
        let mut new_chain: Vec<Block> = Vec::new();
        let mut cursor = branch_tip;
        let fork = loop {
            if let Ok(canonical) = self.cdb().get_hash_by_no(cursor.block_no()) {
                if canonical == cursor.hash() {
                    break cursor;
                }
            }
            let parent_hash = cursor.prev_hash();
            new_chain.push(cursor);
            cursor = self.cdb().get_block(parent_hash).map_err(|_| ChainError::NoAncestor)?;
        };
        if new_chain.is_empty() {
            return Ok(());
        }

        tracing::info!(
            fork_no = fork.block_no(),
            old_tip = old_tip.block_no(),
            new_tip = new_chain[0].block_no(),
            "reorganize chain"
        );

        // The suffix being replaced, read out before the index moves.
        let mut old_blocks = Vec::new();
        for no in (fork.block_no() + 1)..=old_tip.block_no() {
            old_blocks.push(self.cdb().get_block_by_no(no)?);
        }

        // 2. Rewind the state to the fork point.
        self.sdb_mut().rollback(fork.header.blocks_root_hash)?;

        // 3. Re-execute the branch oldest-first. Any failure sends the state
        // back to the old tip.
        for block in new_chain.iter().rev() {
            if let Err(e) = self.execute_block(None, block) {
                tracing::error!(hash = %block.hash(), err = %e, "reorg block failed, keeping old chain");
                self.sdb_mut().rollback(old_tip.header.blocks_root_hash)?;
                return Err(e);
            }
        }

        // 4. Swap the number index; the final `latest` write linearizes the
        // reorg for readers.
        self.swap_canonical(&new_chain)?;

        // Re-point the tx index: everything in the new chain gets an entry,
        // entries only reachable from the old suffix are removed.
        let mut batch = KvBatch::new();
        let mut kept = HashSet::new();
        for block in &new_chain {
            self.cdb().add_txs_of_block(&mut batch, &block.body.txs, block.hash())?;
            for tx in &block.body.txs {
                kept.insert(tx.hash());
            }
        }
        for block in &old_blocks {
            for tx in &block.body.txs {
                if !kept.contains(&tx.hash()) {
                    self.cdb().delete_tx(&mut batch, tx.hash());
                }
            }
        }
        self.cdb().commit(batch)?;

        tracing::info!(best = self.cdb().best_block_no(), "reorganization finished");
        Ok(())
    }
}
