//! The per-incoming-block workflow.

use crate::{ChainError, ChainService};
use meridian_core::ChainEvent;
use meridian_state::BlockState;
use meridian_store::KvBatch;
use meridian_types::Block;
use std::collections::VecDeque;

/// Walks one incoming block (and any orphans it unlocks) through
/// persistence, execution and reorganization.
///
/// A main-chain starting block queues every linked block for execution; a
/// branch block is only persisted and indexed, leaving the canonical chain
/// untouched until [`ChainProcessor::reorganize`] decides the branch now
/// outweighs it.
pub(crate) struct ChainProcessor<'a> {
    svc: &'a mut ChainService,
    state: Option<BlockState>,
    block: Block,
    last_block: Option<Block>,
    /// Execution queue; `Some` iff the starting block extends the tip.
    main_chain: Option<VecDeque<Block>>,
}

impl<'a> ChainProcessor<'a> {
    pub(crate) fn new(svc: &'a mut ChainService, block: Block, state: Option<BlockState>) -> Result<Self, ChainError> {
        let is_main = svc.cdb().is_main_chain(&block)?;
        Ok(Self {
            svc,
            state,
            block,
            last_block: None,
            main_chain: is_main.then(VecDeque::new),
        })
    }

    fn is_main(&self) -> bool {
        self.main_chain.is_some()
    }

    /// Persist `block` under its hash in its own committed batch.
    fn add_common(&mut self, block: &Block) -> Result<(), ChainError> {
        let mut batch = KvBatch::new();
        self.svc.cdb().add_block(&mut batch, block)?;
        self.svc.cdb().commit(batch)?;

        tracing::debug!(
            is_main_chain = self.is_main(),
            latest = self.svc.cdb().best_block_no(),
            block_no = block.block_no(),
            hash = %block.hash(),
            prev_hash = %block.prev_hash(),
            "block added to the block indices"
        );
        self.last_block = Some(block.clone());
        Ok(())
    }

    /// Persist the implicit chain starting at the incoming block: the block
    /// itself, then every cached orphan it reconnects, in order.
    pub(crate) fn prepare(&mut self) -> Result<(), ChainError> {
        let mut next = Some(self.block.clone());
        while let Some(block) = next {
            self.add_common(&block)?;
            if let Some(queue) = &mut self.main_chain {
                queue.push_back(block.clone());
            }

            next = self.svc.resolve_orphan(&block)?;
        }
        Ok(())
    }

    /// Execute and connect the queued main-chain blocks in order.
    pub(crate) fn execute(&mut self) -> Result<(), ChainError> {
        let Some(queue) = self.main_chain.take() else {
            return Ok(());
        };
        tracing::debug!(blocks = queue.len(), "start to execute");

        for block in queue {
            self.svc.execute_block(self.state.take(), &block)?;

            // Mempool eviction has gone out by now; connecting (and moving
            // `latest`) after it keeps consensus and mempool ordering
            // consistent.
            let mut batch = KvBatch::new();
            self.svc.cdb().connect_to_chain(&mut batch, &block, Some(self.svc.consensus()));
            self.svc.cdb().add_txs_of_block(&mut batch, &block.body.txs, block.hash())?;
            self.svc.cdb().commit(batch)?;
            let old_latest = self.svc.cdb_mut().set_latest(&block);

            self.svc.emit(ChainEvent::BlockNotify { block: block.clone() });
            tracing::debug!(
                old_latest,
                new_latest = block.block_no(),
                hash = %block.hash(),
                "block executed"
            );
        }
        Ok(())
    }

    /// Hand over to the reorganizer when the just-added branch outweighs the
    /// canonical chain. Consensus refusals stop the reorg quietly; any other
    /// failure means the index and state can no longer be trusted.
    pub(crate) fn reorganize(&mut self) {
        let Some(last) = self.last_block.clone() else {
            return;
        };
        if !self.svc.consensus().need_reorg(&last, self.svc.cdb().best_block_no()) {
            return;
        }

        match self.svc.reorg(last) {
            Ok(()) => {}
            Err(e) if e.is_consensus() => {
                tracing::info!(err = %e, "stop reorganization");
            }
            Err(e) => panic!("reorganization failed: {e}"),
        }
    }
}
