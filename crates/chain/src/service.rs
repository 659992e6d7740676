//! The chain service task.

use crate::processor::ChainProcessor;
use crate::{BlockExecutor, ChainConfig, ChainDb, ChainError, Consensus, OrphanPool};
use meridian_core::{ChainEvent, ChainHandle, ChainMsgError, ChainRequest, ChainStats, PeerRequest, SyncerHandle, SyncerMsg, DEFAULT_CHANNEL_CAPACITY};
use meridian_engine::ContractVm;
use meridian_state::{BlockState, StateDb};
use meridian_store::KvStore;
use meridian_types::{Block, BlockInfo, BlockNo, Genesis, Hash, PeerId, Receipt, SignedTx, TxIdx};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The single owner of the chain: block index, world state and orphan pool.
///
/// All mutations are serialized by the service's task; the rest of the
/// system talks to it through [`ChainHandle`]. Outbound effects (gossip
/// notifications, mempool eviction, sync kicks) are fire-and-forget sends so
/// the service can never deadlock against its own callers.
pub struct ChainService {
    cfg: ChainConfig,
    cdb: ChainDb,
    sdb: StateDb,
    orphans: OrphanPool,
    vm: Box<dyn ContractVm>,
    consensus: Box<dyn Consensus>,
    peer_tx: mpsc::Sender<PeerRequest>,
    event_tx: mpsc::Sender<ChainEvent>,
    syncer: Option<SyncerHandle>,
}

impl ChainService {
    /// Build the service: install or load the chain, and rebuild the world
    /// state by replaying the canonical chain when the store already holds
    /// blocks.
    pub fn new(
        cfg: ChainConfig,
        genesis: &Genesis,
        store: Arc<dyn KvStore>,
        vm: Box<dyn ContractVm>,
        consensus: Box<dyn Consensus>,
        peer_tx: mpsc::Sender<PeerRequest>,
        event_tx: mpsc::Sender<ChainEvent>,
    ) -> Result<Self, ChainError> {
        let mut sdb = StateDb::new();
        let genesis_root = sdb.init_genesis(genesis);

        let mut cdb = ChainDb::new(store);
        let best = cdb.init(genesis, genesis_root)?;

        let orphans = OrphanPool::new(cfg.orphan_pool.clone());
        let mut svc = Self {
            cfg,
            cdb,
            sdb,
            orphans,
            vm,
            consensus,
            peer_tx,
            event_tx,
            syncer: None,
        };

        if best.block_no() > 0 {
            svc.replay_chain()?;
        }
        Ok(svc)
    }

    /// Wire the syncer in; orphan blocks start sync sessions through this
    /// handle.
    pub fn set_syncer(&mut self, syncer: SyncerHandle) {
        self.syncer = Some(syncer);
    }

    /// Run the service on its own task. Returns the request handle and the
    /// task's join handle; the service stops when every handle is dropped.
    pub fn spawn(self) -> (ChainHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let handle = ChainHandle::new(tx);
        (handle, self.spawn_on(rx))
    }

    /// Run the service over an externally created request channel. Lets the
    /// node hand out the [`ChainHandle`] (e.g. to the syncer) before the
    /// service task starts.
    pub fn spawn_on(mut self, mut rx: mpsc::Receiver<ChainRequest>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                self.handle_request(req);
            }
            tracing::info!("chain service stopped");
        })
    }

    fn handle_request(&mut self, req: ChainRequest) {
        match req {
            ChainRequest::AddBlock {
                block,
                state,
                peer,
                reply,
            } => {
                let res = self.add_block(*block, state, peer).map_err(to_msg_err);
                let _ = reply.send(res);
            }
            ChainRequest::GetBlock { hash, reply } => {
                let _ = reply.send(self.cdb.get_block(hash).map_err(to_msg_err));
            }
            ChainRequest::GetBlockByNo { no, reply } => {
                let _ = reply.send(self.cdb.get_block_by_no(no).map_err(to_msg_err));
            }
            ChainRequest::GetBestBlock { reply } => {
                let _ = reply.send(self.cdb.get_best_block().ok_or(ChainMsgError::NoBlock));
            }
            ChainRequest::GetTx { hash, reply } => {
                let _ = reply.send(self.get_tx(hash).map_err(to_msg_err));
            }
            ChainRequest::GetReceipt { hash, reply } => {
                let _ = reply.send(self.get_receipt(hash).map_err(to_msg_err));
            }
            ChainRequest::GetAnchors { reply } => {
                let _ = reply.send(self.cdb.get_anchors());
            }
            ChainRequest::FindAncestor { hashes, reply } => {
                let _ = reply.send(self.cdb.find_ancestor(&hashes));
            }
            ChainRequest::GetHashesFrom { prev, count, reply } => {
                let _ = reply.send(self.cdb.get_hashes_from(prev, count).map_err(to_msg_err));
            }
            ChainRequest::GetBlocksByHash { hashes, reply } => {
                let res: Result<Vec<Block>, ChainError> =
                    hashes.into_iter().map(|h| self.cdb.get_block(h)).collect();
                let _ = reply.send(res.map_err(to_msg_err));
            }
            ChainRequest::GetStats { reply } => {
                let best = self.cdb.get_best_block();
                let _ = reply.send(ChainStats {
                    best_no: self.cdb.best_block_no(),
                    best_hash: best.map(|b| b.hash()).unwrap_or_default(),
                    orphans: self.orphans.len(),
                });
            }
        }
    }

    /// The per-incoming-block workflow: validate, classify, persist,
    /// execute, reorganize.
    pub fn add_block(
        &mut self,
        block: Block,
        state: Option<BlockState>,
        peer: Option<PeerId>,
    ) -> Result<BlockInfo, ChainError> {
        tracing::debug!(hash = %block.hash(), block_no = block.block_no(), "add block");
        let info = block.info();

        let best = self.cdb.get_best_block().ok_or(ChainError::NoChainDb)?;
        self.consensus.is_block_valid(&block, &best)?;

        // Duplicate networked blocks are absorbed without touching anything.
        if state.is_none() && self.cdb.has_block(block.hash()) {
            tracing::debug!(hash = %block.hash(), "duplicate block ignored");
            return Ok(info);
        }

        if self.is_orphan(&block) {
            if state.is_some() {
                return Err(ChainError::OrphanWithState);
            }
            self.handle_orphan(block, &best, peer);
            return Err(ChainError::Orphan);
        }

        let mut processor = ChainProcessor::new(self, block, state)?;
        processor.prepare()?;
        processor.execute()?;
        processor.reorganize();

        tracing::info!(best = self.cdb.best_block_no(), "added block successfully");
        Ok(info)
    }

    /// Whether the block's parent is unknown locally.
    fn is_orphan(&self, block: &Block) -> bool {
        !self.cdb.has_block(block.prev_hash())
    }

    fn handle_orphan(&mut self, block: Block, best: &Block, peer: Option<PeerId>) {
        let orphan_no = block.block_no();
        let best_no = best.block_no();
        self.orphans.add(block);

        if orphan_no < best_no + 1 {
            tracing::debug!(orphan_no, best_no, "skip sync with too old block");
            return;
        }
        let Some(peer) = peer else {
            return;
        };

        if self.cfg.use_fast_syncer {
            if let Some(syncer) = &self.syncer {
                syncer.try_send(SyncerMsg::SyncStart {
                    peer,
                    target_no: orphan_no,
                });
            }
        } else {
            let anchors = self.cdb.get_anchors();
            if self.peer_tx.try_send(PeerRequest::GetMissingBlocks { to: peer, anchors }).is_err() {
                tracing::warn!("peer channel full, missing-blocks request dropped");
            }
        }
    }

    /// Pull a waiting child of `parent` out of the orphan pool.
    pub(crate) fn resolve_orphan(&mut self, parent: &Block) -> Result<Option<Block>, ChainError> {
        let Some(orphan) = self.orphans.resolve(parent.hash()) else {
            return Ok(None);
        };

        if parent.block_no() + 1 != orphan.block_no() {
            return Err(ChainError::InvalidBlock(format!(
                "invalid orphan block no (p={}, c={})",
                parent.block_no(),
                orphan.block_no()
            )));
        }

        tracing::debug!(parent = %parent.hash(), orphan = %orphan.hash(), "connect orphan");
        Ok(Some(orphan))
    }

    /// Execute a block and persist its side effects (receipts, mempool
    /// eviction, consensus status).
    pub(crate) fn execute_block(&mut self, bstate: Option<BlockState>, block: &Block) -> Result<(), ChainError> {
        let executor = BlockExecutor::new(&mut self.sdb, self.vm.as_ref(), self.consensus.as_ref(), block, bstate)?;
        let (_root, receipts) = executor.execute(self.consensus.as_ref())?;

        self.cdb.write_receipts(block.hash(), block.block_no(), &receipts)?;
        self.emit(ChainEvent::MempoolDel { block: block.clone() });
        self.consensus.update_status(block);
        Ok(())
    }

    /// Rebuild the in-memory world state from the persisted chain.
    fn replay_chain(&mut self) -> Result<(), ChainError> {
        let latest = self.cdb.best_block_no();
        tracing::info!(latest, "replaying chain to rebuild state");

        for no in 1..=latest {
            let block = self.cdb.get_block_by_no(no)?;
            let executor =
                BlockExecutor::new(&mut self.sdb, self.vm.as_ref(), self.consensus.as_ref(), &block, None)?;
            executor.execute(self.consensus.as_ref())?;
        }
        Ok(())
    }

    /// The canonical tip, from the chain db cache.
    pub fn get_best_block(&self) -> Option<Block> {
        self.cdb.get_best_block()
    }

    /// Height of the canonical tip.
    pub fn best_block_no(&self) -> BlockNo {
        self.cdb.best_block_no()
    }

    /// Fetch a block by hash.
    pub fn get_block(&self, hash: Hash) -> Result<Block, ChainError> {
        self.cdb.get_block(hash)
    }

    /// Fetch the canonical block at a height.
    pub fn get_block_by_no(&self, no: BlockNo) -> Result<Block, ChainError> {
        self.cdb.get_block_by_no(no)
    }

    /// Fetch the canonical hash at a height.
    pub fn get_hash_by_no(&self, no: BlockNo) -> Result<Hash, ChainError> {
        self.cdb.get_hash_by_no(no)
    }

    /// Total transactions on the canonical chain, walking tip to genesis.
    /// Debug helper; returns -1 when the walk hits a missing block.
    pub fn count_txs_in_chain(&self) -> i64 {
        let Some(mut block) = self.cdb.get_best_block() else {
            return -1;
        };

        let mut count: i64 = 0;
        while block.block_no() > 0 {
            count += block.body.txs.len() as i64;
            match self.cdb.get_block(block.prev_hash()) {
                Ok(prev) => block = prev,
                Err(_) => return -1,
            }
        }
        count
    }

    /// Fetch a transaction and its index entry, requiring it to sit on the
    /// canonical chain.
    pub fn get_tx(&self, hash: Hash) -> Result<(SignedTx, TxIdx), ChainError> {
        let (tx, txidx) = self.cdb.get_tx(hash)?;
        let block = self.cdb.get_block(txidx.block_hash)?;
        let main = self.cdb.get_block_by_no(block.block_no())?;
        if block.hash() != main.hash() {
            return Err(ChainError::TxNotInMainChain);
        }
        Ok((tx, txidx))
    }

    /// Fetch the receipt of a transaction on the canonical chain.
    pub fn get_receipt(&self, tx_hash: Hash) -> Result<Receipt, ChainError> {
        let (_, txidx) = self.cdb.get_tx(tx_hash)?;
        let block = self.cdb.get_block(txidx.block_hash)?;
        let main = self.cdb.get_block_by_no(block.block_no())?;
        if block.hash() != main.hash() {
            return Err(ChainError::NoReceipt);
        }
        self.cdb.get_receipt(block.hash(), block.block_no(), txidx.idx)
    }

    /// Rewrite the number index and `latest` to `new_chain` (tip first),
    /// carrying the consensus checkpoint along.
    pub(crate) fn swap_canonical(&mut self, new_chain: &[Block]) -> Result<(), ChainError> {
        self.cdb.swap_chain(new_chain, Some(self.consensus.as_ref()))
    }

    pub(crate) fn emit(&self, event: ChainEvent) {
        if self.event_tx.try_send(event).is_err() {
            tracing::trace!("event channel full, notification dropped");
        }
    }

    pub(crate) fn cdb(&self) -> &ChainDb {
        &self.cdb
    }

    pub(crate) fn cdb_mut(&mut self) -> &mut ChainDb {
        &mut self.cdb
    }

    pub(crate) fn sdb_mut(&mut self) -> &mut StateDb {
        &mut self.sdb
    }

    pub(crate) fn consensus(&self) -> &dyn Consensus {
        self.consensus.as_ref()
    }
}

fn to_msg_err(e: ChainError) -> ChainMsgError {
    match e {
        ChainError::Orphan => ChainMsgError::Orphan,
        ChainError::NoBlockByHash(_) | ChainError::NoBlockByNo(_) => ChainMsgError::NoBlock,
        ChainError::NoTx(_) => ChainMsgError::NoTx,
        ChainError::NoReceipt => ChainMsgError::NoReceipt,
        ChainError::TxNotInMainChain => ChainMsgError::NotInMainChain,
        ChainError::InvalidBlock(s) => ChainMsgError::InvalidBlock(s),
        ChainError::Consensus(s) => ChainMsgError::InvalidBlock(s),
        other => ChainMsgError::Internal(other.to_string()),
    }
}
