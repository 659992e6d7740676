//! The persistent block index.
//!
//! Key layout (shared with every other node implementation, so it is
//! bit-exact):
//!
//! - `"chain.latest"` -> 8-byte big-endian block number
//! - `BE(block_no)` -> 32-byte block hash (canonical chain only)
//! - `block_hash` -> encoded block (every known block, branches included)
//! - `tx_hash` -> encoded [`TxIdx`] (canonical chain only)
//! - `"r" || block_hash || LE(block_no)` -> encoded receipt list
//! - `"chain.genesisInfo"` -> encoded genesis bundle

use crate::{ChainError, Consensus, TX_BATCH_MAX};
use meridian_types::{
    block_no_from_bytes, block_no_to_bytes, Block, BlockInfo, BlockNo, Genesis, Hash, Receipt, SignedTx, TxIdx,
};
use meridian_store::{KvBatch, KvStore};
use parking_lot::RwLock;
use std::sync::Arc;

const LATEST_KEY: &[u8] = b"chain.latest";
const GENESIS_KEY: &[u8] = b"chain.genesisInfo";
const RECEIPTS_PREFIX: &[u8] = b"r";

/// Anchor sampling: dense for this many recent blocks, then doubling steps.
const ANCHOR_DENSE_COUNT: usize = 10;

fn receipts_key(block_hash: &Hash, block_no: BlockNo) -> Vec<u8> {
    let mut key = Vec::with_capacity(RECEIPTS_PREFIX.len() + 32 + 8);
    key.extend_from_slice(RECEIPTS_PREFIX);
    key.extend_from_slice(block_hash.as_bytes());
    key.extend_from_slice(&block_no.to_le_bytes());
    key
}

/// The block index over the key-value store.
///
/// All mutating operations stage into a caller-supplied [`KvBatch`]; the
/// caller commits. The `latest` pointer and the cached best block are only
/// moved by [`ChainDb::set_latest`], after the batch that wrote the
/// corresponding index entries has been committed.
pub struct ChainDb {
    store: Arc<dyn KvStore>,
    latest: BlockNo,
    best_block: RwLock<Option<Block>>,
}

impl ChainDb {
    /// Wrap a store. Call [`ChainDb::init`] before use.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            latest: 0,
            best_block: RwLock::new(None),
        }
    }

    /// Load the chain from the store, or install the genesis block on first
    /// boot. Returns the best block.
    pub fn init(&mut self, genesis: &Genesis, genesis_state_root: Hash) -> Result<Block, ChainError> {
        if let Some(latest_bytes) = self.store.get(LATEST_KEY) {
            let latest = block_no_from_bytes(&latest_bytes)
                .ok_or_else(|| ChainError::Codec("latest pointer".into()))?;
            let best = self.get_block_by_no(latest)?;
            self.latest = latest;
            *self.best_block.write() = Some(best.clone());

            tracing::info!(latest, hash = %best.hash(), "chain loaded");
            return Ok(best);
        }

        let block = genesis.block(genesis_state_root);
        let mut batch = KvBatch::new();
        self.add_block(&mut batch, &block)?;
        self.connect_to_chain(&mut batch, &block, None);
        batch.put(GENESIS_KEY.to_vec(), genesis.to_bytes());
        self.commit(batch)?;
        self.set_latest(&block);

        tracing::info!(hash = %block.hash(), "genesis block added");
        Ok(block)
    }

    /// Commit a staged batch to the store.
    pub fn commit(&self, batch: KvBatch) -> Result<(), ChainError> {
        self.store.write(batch).map_err(ChainError::from)
    }

    /// The genesis bundle, when one was installed.
    pub fn genesis_info(&self) -> Option<Genesis> {
        self.store.get(GENESIS_KEY).and_then(|b| Genesis::from_bytes(&b))
    }

    /// Height of the canonical tip.
    pub fn best_block_no(&self) -> BlockNo {
        self.latest
    }

    /// The canonical tip, from the in-memory cache.
    pub fn get_best_block(&self) -> Option<Block> {
        self.best_block.read().clone()
    }

    /// Move `latest` and the best-block cache. Only called after the batch
    /// carrying the matching index writes has been committed. Returns the
    /// previous `latest`.
    pub fn set_latest(&mut self, best: &Block) -> BlockNo {
        let old = self.latest;
        self.latest = best.block_no();
        *self.best_block.write() = Some(best.clone());

        tracing::debug!(old, new = self.latest, "update latest block");
        old
    }

    /// Stage a block body under its hash.
    pub fn add_block(&self, batch: &mut KvBatch, block: &Block) -> Result<(), ChainError> {
        tracing::debug!(block_no = block.block_no(), hash = %block.hash(), "add block to db");
        let bytes = bincode::serialize(block).map_err(|e| ChainError::Codec(e.to_string()))?;
        batch.put(block.hash().as_bytes().to_vec(), bytes);
        Ok(())
    }

    /// Stage the canonical connection of `block`: the `latest` pointer, the
    /// number->hash entry, and the consensus checkpoint. The caller commits
    /// and then calls [`ChainDb::set_latest`].
    pub fn connect_to_chain(&self, batch: &mut KvBatch, block: &Block, consensus: Option<&dyn Consensus>) {
        let no_key = block_no_to_bytes(block.block_no());
        batch.put(LATEST_KEY.to_vec(), no_key.to_vec());
        batch.put(no_key.to_vec(), block.hash().as_bytes().to_vec());
        if let Some(consensus) = consensus {
            consensus.save(batch);
        }

        tracing::debug!(block_no = block.block_no(), hash = %block.hash(), "connect block to mainchain");
    }

    /// Stage the tx-index entries of a connected block.
    pub fn add_txs_of_block(&self, batch: &mut KvBatch, txs: &[SignedTx], block_hash: Hash) -> Result<(), ChainError> {
        for (idx, tx) in txs.iter().enumerate() {
            let txidx = TxIdx {
                block_hash,
                idx: idx as i32,
            };
            let bytes = bincode::serialize(&txidx).map_err(|e| ChainError::Codec(e.to_string()))?;
            batch.put(tx.hash().as_bytes().to_vec(), bytes);
        }
        Ok(())
    }

    /// Stage the removal of one tx-index entry.
    pub fn delete_tx(&self, batch: &mut KvBatch, tx_hash: Hash) {
        batch.delete(tx_hash.as_bytes().to_vec());
    }

    /// Replace the canonical suffix with `new_blocks` (tip first, down to one
    /// past the fork point).
    ///
    /// Writes are split into batches of at most [`TX_BATCH_MAX`] puts.
    /// Intermediate batches commit as they fill; only the final batch carries
    /// the `latest` pointer, which makes that write the linearization point.
    /// A crash between batches leaves `latest` on the old tip and the new
    /// branch is re-discovered via sync.
    pub fn swap_chain(&mut self, new_blocks: &[Block], consensus: Option<&dyn Consensus>) -> Result<(), ChainError> {
        let new_tip = new_blocks.first().ok_or(ChainError::InvalidSwapChain)?;
        let old_no = self.best_block_no();
        if old_no >= new_tip.block_no() {
            tracing::error!(old = old_no, new = new_tip.block_no(), "new chain is not longer than old chain");
            return Err(ChainError::InvalidSwapChain);
        }

        let mut batch = KvBatch::new();
        for block in new_blocks.iter().rev() {
            let no_key = block_no_to_bytes(block.block_no());
            batch.put(no_key.to_vec(), block.hash().as_bytes().to_vec());

            if batch.len() >= TX_BATCH_MAX {
                self.commit(std::mem::take(&mut batch))?;
            }
        }

        // Headroom for the tail writes, mirroring the split rule above.
        if batch.len() + 5 >= TX_BATCH_MAX {
            self.commit(std::mem::take(&mut batch))?;
        }

        batch.put(LATEST_KEY.to_vec(), block_no_to_bytes(new_tip.block_no()).to_vec());
        if let Some(consensus) = consensus {
            consensus.save(&mut batch);
        }
        self.commit(batch)?;
        self.set_latest(new_tip);

        Ok(())
    }

    /// Whether `block` extends the canonical tip.
    pub fn is_main_chain(&self, block: &Block) -> Result<bool, ChainError> {
        let block_no = block.block_no();
        if block_no > 0 && block_no != self.latest + 1 {
            tracing::debug!(block_no, latest = self.latest, "block is branch");
            return Ok(false);
        }

        let latest_hash = self.get_hash_by_no(self.best_block_no())?;
        Ok(block.prev_hash() == latest_hash)
    }

    /// Fetch a block by hash.
    pub fn get_block(&self, hash: Hash) -> Result<Block, ChainError> {
        let bytes = self.store.get(hash.as_bytes()).ok_or(ChainError::NoBlockByHash(hash))?;
        let block: Block = bincode::deserialize(&bytes).map_err(|e| ChainError::Codec(e.to_string()))?;
        if block.hash() != hash {
            return Err(ChainError::NoBlockByHash(hash));
        }
        Ok(block)
    }

    /// Whether a block with this hash is stored.
    pub fn has_block(&self, hash: Hash) -> bool {
        self.store.get(hash.as_bytes()).is_some()
    }

    /// Fetch the canonical hash at a height.
    pub fn get_hash_by_no(&self, block_no: BlockNo) -> Result<Hash, ChainError> {
        let bytes = self
            .store
            .get(&block_no_to_bytes(block_no))
            .ok_or(ChainError::NoBlockByNo(block_no))?;
        Hash::from_slice(&bytes).ok_or_else(|| ChainError::Codec("block hash entry".into()))
    }

    /// Fetch the canonical block at a height.
    pub fn get_block_by_no(&self, block_no: BlockNo) -> Result<Block, ChainError> {
        let hash = self.get_hash_by_no(block_no)?;
        self.get_block(hash)
    }

    /// Fetch a transaction plus its index entry. The entry may point into a
    /// detached branch after a reorg; the chain service layers the
    /// main-chain check on top.
    pub fn get_tx(&self, tx_hash: Hash) -> Result<(SignedTx, TxIdx), ChainError> {
        let bytes = self.store.get(tx_hash.as_bytes()).ok_or(ChainError::NoTx(tx_hash))?;
        let txidx: TxIdx = bincode::deserialize(&bytes).map_err(|e| ChainError::Codec(e.to_string()))?;

        let block = self.get_block(txidx.block_hash)?;
        let tx = block
            .body
            .txs
            .get(txidx.idx as usize)
            .cloned()
            .ok_or(ChainError::NoTx(tx_hash))?;
        Ok((tx, txidx))
    }

    /// Write a block's receipts in their own committed batch.
    pub fn write_receipts(&self, block_hash: Hash, block_no: BlockNo, receipts: &[Receipt]) -> Result<(), ChainError> {
        let bytes = bincode::serialize(receipts).map_err(|e| ChainError::Codec(e.to_string()))?;
        let mut batch = KvBatch::new();
        batch.put(receipts_key(&block_hash, block_no), bytes);
        self.commit(batch)
    }

    /// Fetch one receipt by block location and transaction index.
    pub fn get_receipt(&self, block_hash: Hash, block_no: BlockNo, idx: i32) -> Result<Receipt, ChainError> {
        let bytes = self
            .store
            .get(&receipts_key(&block_hash, block_no))
            .ok_or(ChainError::NoReceipt)?;
        let receipts: Vec<Receipt> = bincode::deserialize(&bytes).map_err(|e| ChainError::Codec(e.to_string()))?;

        if idx < 0 || idx as usize >= receipts.len() {
            return Err(ChainError::NoReceipt);
        }
        Ok(receipts[idx as usize].clone())
    }

    /// Sample the canonical chain for divergence discovery: every hash for
    /// the newest blocks, then doubling steps back to genesis.
    pub fn get_anchors(&self) -> Vec<Hash> {
        let mut anchors = Vec::new();
        let mut no = self.best_block_no();
        let mut step: BlockNo = 1;
        let mut dense = 0usize;

        loop {
            match self.get_hash_by_no(no) {
                Ok(hash) => anchors.push(hash),
                Err(_) => break,
            }
            if no == 0 {
                break;
            }
            dense += 1;
            if dense >= ANCHOR_DENSE_COUNT {
                step = step.saturating_mul(2);
            }
            no = no.saturating_sub(step);
        }

        anchors
    }

    /// The highest of `hashes` that sits on the canonical chain.
    pub fn find_ancestor(&self, hashes: &[Hash]) -> Option<BlockInfo> {
        for hash in hashes {
            let Ok(block) = self.get_block(*hash) else {
                continue;
            };
            let Ok(main_hash) = self.get_hash_by_no(block.block_no()) else {
                continue;
            };
            if main_hash == block.hash() {
                return Some(block.info());
            }
        }

        tracing::debug!(candidates = hashes.len(), "no common ancestor among candidates");
        None
    }

    /// Up to `count` canonical hashes directly after `prev`. Fails when
    /// `prev` is not on the canonical chain anymore.
    pub fn get_hashes_from(&self, prev: BlockInfo, count: u64) -> Result<Vec<Hash>, ChainError> {
        let anchor_hash = self.get_hash_by_no(prev.no)?;
        if anchor_hash != prev.hash {
            return Err(ChainError::NoAncestor);
        }

        let last = self.best_block_no().min(prev.no.saturating_add(count));
        let mut hashes = Vec::with_capacity((last.saturating_sub(prev.no)) as usize);
        for no in (prev.no + 1)..=last {
            hashes.push(self.get_hash_by_no(no)?);
        }
        Ok(hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_store::MemoryKv;
    use meridian_types::{Address, BlockBody, BlockHeader};

    fn new_cdb() -> (ChainDb, Block) {
        let mut cdb = ChainDb::new(Arc::new(MemoryKv::new()));
        let genesis = Genesis::new(1_700_000_000);
        let best = cdb.init(&genesis, Hash::ZERO).expect("init");
        (cdb, best)
    }

    fn child_of(parent: &Block, txs: Vec<SignedTx>) -> Block {
        Block::new(
            BlockHeader {
                block_no: parent.block_no() + 1,
                prev_hash: parent.hash(),
                blocks_root_hash: Hash::digest(&parent.block_no().to_be_bytes()),
                timestamp: parent.header.timestamp + 1,
                coinbase: Address::from_name("bp"),
                consensus: vec![],
            },
            BlockBody { txs },
        )
    }

    fn connect(cdb: &mut ChainDb, block: &Block) {
        let mut batch = KvBatch::new();
        cdb.add_block(&mut batch, block).expect("add");
        cdb.connect_to_chain(&mut batch, block, None);
        cdb.add_txs_of_block(&mut batch, &block.body.txs, block.hash()).expect("txs");
        cdb.commit(batch).expect("commit");
        cdb.set_latest(block);
    }

    fn extend(cdb: &mut ChainDb, n: usize) -> Vec<Block> {
        let mut blocks = vec![cdb.get_best_block().expect("best")];
        for _ in 0..n {
            let block = child_of(blocks.last().expect("last"), vec![]);
            connect(cdb, &block);
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn test_init_installs_genesis_once() {
        let (mut cdb, best) = new_cdb();
        assert_eq!(best.block_no(), 0);
        assert_eq!(cdb.best_block_no(), 0);
        assert!(cdb.genesis_info().is_some());

        // Re-init on the same store loads rather than reinstalls.
        let reloaded = cdb.init(&Genesis::new(1_700_000_000), Hash::ZERO).expect("reload");
        assert_eq!(reloaded.hash(), best.hash());
    }

    #[test]
    fn test_number_index_matches_blocks() {
        let (mut cdb, _) = new_cdb();
        extend(&mut cdb, 5);

        // Every canonical height resolves to a block with that height, and
        // the chain is hash-connected.
        for no in 0..=cdb.best_block_no() {
            let block = cdb.get_block(cdb.get_hash_by_no(no).expect("hash")).expect("block");
            assert_eq!(block.block_no(), no);
            if no > 0 {
                assert_eq!(block.prev_hash(), cdb.get_hash_by_no(no - 1).expect("prev"));
            }
        }
    }

    #[test]
    fn test_latest_pointer_survives_reload() {
        let store = Arc::new(MemoryKv::new());
        let genesis = Genesis::new(42);
        {
            let mut cdb = ChainDb::new(store.clone());
            cdb.init(&genesis, Hash::ZERO).expect("init");
            extend(&mut cdb, 3);
            assert_eq!(cdb.best_block_no(), 3);
        }

        let mut cdb = ChainDb::new(store);
        let best = cdb.init(&genesis, Hash::ZERO).expect("reload");
        assert_eq!(best.block_no(), 3);
        assert_eq!(cdb.best_block_no(), 3);
    }

    #[test]
    fn test_swap_chain_requires_longer_chain() {
        let (mut cdb, _) = new_cdb();
        let blocks = extend(&mut cdb, 3);

        // A "new chain" ending at the same height is rejected.
        let stale: Vec<Block> = blocks.iter().rev().cloned().collect();
        assert!(matches!(
            cdb.swap_chain(&stale[1..], None),
            Err(ChainError::InvalidSwapChain)
        ));
    }

    #[test]
    fn test_swap_chain_rewrites_number_index() {
        let (mut cdb, genesis_block) = new_cdb();
        let old = extend(&mut cdb, 2);

        // Build a branch g -> a' -> b' -> c' next to the canonical g -> a -> b.
        let a2 = child_of(&genesis_block, vec![]);
        let b2 = child_of(&a2, vec![]);
        let c2 = child_of(&b2, vec![]);
        for block in [&a2, &b2, &c2] {
            let mut batch = KvBatch::new();
            cdb.add_block(&mut batch, block).expect("add");
            cdb.commit(batch).expect("commit");
        }

        let new_chain = vec![c2.clone(), b2.clone(), a2.clone()];
        cdb.swap_chain(&new_chain, None).expect("swap");

        assert_eq!(cdb.best_block_no(), 3);
        assert_eq!(cdb.get_hash_by_no(1).expect("no 1"), a2.hash());
        assert_eq!(cdb.get_hash_by_no(2).expect("no 2"), b2.hash());
        assert_eq!(cdb.get_hash_by_no(3).expect("no 3"), c2.hash());
        assert_ne!(cdb.get_hash_by_no(1).expect("no 1"), old[1].hash());
        assert_eq!(cdb.get_best_block().expect("best").hash(), c2.hash());
    }

    #[test]
    fn test_receipt_index_bounds() {
        let (cdb, best) = {
            let (mut cdb, _) = new_cdb();
            let blocks = extend(&mut cdb, 1);
            (cdb, blocks[1].clone())
        };

        let id = meridian_types::AccountId::from_address(&Address::from_name("c"));
        let receipts = vec![Receipt::new(id, "SUCCESS", "ok")];
        cdb.write_receipts(best.hash(), best.block_no(), &receipts).expect("write");

        assert_eq!(cdb.get_receipt(best.hash(), best.block_no(), 0).expect("r0").result, "ok");
        // One past the end is invalid, as is a negative index.
        assert!(matches!(cdb.get_receipt(best.hash(), best.block_no(), 1), Err(ChainError::NoReceipt)));
        assert!(matches!(cdb.get_receipt(best.hash(), best.block_no(), -1), Err(ChainError::NoReceipt)));
    }

    #[test]
    fn test_anchors_are_dense_then_geometric() {
        let (mut cdb, _) = new_cdb();
        extend(&mut cdb, 40);

        let anchors = cdb.get_anchors();
        assert_eq!(anchors[0], cdb.get_hash_by_no(40).expect("tip"));
        // Ends at genesis.
        assert_eq!(*anchors.last().expect("last"), cdb.get_hash_by_no(0).expect("genesis"));
        // Much smaller than the chain itself.
        assert!(anchors.len() < 25, "anchors: {}", anchors.len());
    }

    #[test]
    fn test_find_ancestor_prefers_first_canonical_match() {
        let (mut cdb, _) = new_cdb();
        let blocks = extend(&mut cdb, 4);

        let found = cdb
            .find_ancestor(&[Hash::digest(b"unknown"), blocks[3].hash(), blocks[1].hash()])
            .expect("ancestor");
        assert_eq!(found.no, 3);
    }

    #[test]
    fn test_get_hashes_from_rejects_detached_anchor() {
        let (mut cdb, _) = new_cdb();
        let blocks = extend(&mut cdb, 3);

        let hashes = cdb
            .get_hashes_from(blocks[1].info(), 10)
            .expect("hashes");
        assert_eq!(hashes, vec![blocks[2].hash(), blocks[3].hash()]);

        let bogus = BlockInfo {
            hash: Hash::digest(b"not canonical"),
            no: 1,
        };
        assert!(cdb.get_hashes_from(bogus, 10).is_err());
    }
}
