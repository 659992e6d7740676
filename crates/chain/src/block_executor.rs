//! Per-block execution orchestration.

use crate::executor::{execute_tx, send_reward_coinbase};
use crate::{ChainError, Consensus};
use meridian_engine::ContractVm;
use meridian_state::{BlockState, StateDb};
use meridian_types::{Block, Hash, Receipt};

/// Runs one block through the state-transition pipeline.
///
/// Two modes:
///
/// - **Execute**: the block came from the network. It is validated, every
///   transaction is applied (with per-transaction snapshot/rollback as the
///   hard-failure path), the producer reward is paid and the recovery point
///   saved.
/// - **Commit-only**: the local producer already executed the block and
///   handed its block state over; re-execution is skipped.
///
/// Both modes end with post-validation against the header's state root and
/// an atomic fold into the state db.
pub struct BlockExecutor<'a> {
    sdb: &'a mut StateDb,
    vm: &'a dyn ContractVm,
    block: &'a Block,
    bs: BlockState,
    commit_only: bool,
}

impl<'a> BlockExecutor<'a> {
    /// Prepare an executor for `block`.
    ///
    /// `bstate` is the producer's pre-executed block state, when present;
    /// networked blocks pass `None` and get validated here.
    pub fn new(
        sdb: &'a mut StateDb,
        vm: &'a dyn ContractVm,
        consensus: &dyn Consensus,
        block: &'a Block,
        bstate: Option<BlockState>,
    ) -> Result<Self, ChainError> {
        let (bs, commit_only) = match bstate {
            None => {
                consensus.validate_block(block)?;
                (BlockState::new(sdb.root()), false)
            }
            Some(bs) => {
                tracing::debug!(block_no = block.block_no(), "received block from block factory");
                (bs, true)
            }
        };

        Ok(Self {
            sdb,
            vm,
            block,
            bs,
            commit_only,
        })
    }

    /// Run the pipeline to completion and commit. Returns the receipts in
    /// transaction order.
    pub fn execute(mut self, consensus: &dyn Consensus) -> Result<(Hash, Vec<Receipt>), ChainError> {
        if !self.commit_only {
            let txs = &self.block.body.txs;
            for (i, tx) in txs.iter().enumerate() {
                if let Some(next) = txs.get(i + 1) {
                    self.vm.preload(&next.body.payload);
                }

                let snapshot = self.bs.snapshot();
                if let Err(e) = execute_tx(
                    self.sdb,
                    self.vm,
                    &mut self.bs,
                    tx,
                    self.block.block_no(),
                    self.block.header.timestamp,
                ) {
                    tracing::error!(tx = %tx.hash(), err = %e, "tx failed");
                    self.bs.rollback(snapshot);
                    return Err(e.into());
                }
            }

            send_reward_coinbase(self.sdb, &mut self.bs, &self.block.header.coinbase);
            self.bs.save_recovery_point(self.block.block_no());
        }

        let root = self.bs.update(self.sdb);
        consensus.validate_post(root, self.bs.receipts(), self.block)?;

        let receipts = self.bs.receipts().to_vec();
        let committed = self.sdb.apply(self.bs)?;

        tracing::debug!(block_no = self.block.block_no(), root = %committed, "executed block");
        Ok((committed, receipts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SimplePos, COINBASE_FEE};
    use meridian_engine::KvVm;
    use meridian_types::{Address, BlockBody, BlockHeader, Genesis, SignedTx, TxBody, TxType};

    fn transfer(nonce: u64, from: &str, to: &str, amount: u64) -> SignedTx {
        SignedTx::new(TxBody {
            nonce,
            account: Address::from_name(from),
            recipient: Address::from_name(to),
            amount,
            payload: vec![],
            tx_type: TxType::Normal,
            sign: vec![1],
        })
    }

    fn block_with(vm: &KvVm, txs: Vec<SignedTx>, coinbase: &str) -> Block {
        // Dry-run the txs against a twin state db to learn the resulting
        // root for the header.
        let mut probe_sdb = StateDb::new();
        probe_sdb.init_genesis(&Genesis::new(0).with_balance(Address::from_name("alice"), COINBASE_FEE + 100));
        let mut bs = meridian_state::BlockState::new(probe_sdb.root());
        for tx in &txs {
            execute_tx(&probe_sdb, vm, &mut bs, tx, 1, 7).expect("probe");
        }
        send_reward_coinbase(&probe_sdb, &mut bs, &Address::from_name(coinbase));
        bs.save_recovery_point(1);
        let root = bs.update(&probe_sdb);

        Block::new(
            BlockHeader {
                block_no: 1,
                prev_hash: Hash::digest(b"genesis"),
                blocks_root_hash: root,
                timestamp: 7,
                coinbase: Address::from_name(coinbase),
                consensus: vec![],
            },
            BlockBody { txs },
        )
    }

    #[test]
    fn test_execute_commits_the_header_root() {
        let mut sdb = StateDb::new();
        sdb.init_genesis(&Genesis::new(0).with_balance(Address::from_name("alice"), COINBASE_FEE + 100));
        let vm = KvVm::new();
        let pos = SimplePos::new();

        let block = block_with(&vm, vec![transfer(1, "alice", "bob", 30)], "bp");
        let exec = BlockExecutor::new(&mut sdb, &vm, &pos, &block, None).expect("new");
        let (root, receipts) = exec.execute(&pos).expect("execute");

        assert_eq!(root, block.header.blocks_root_hash);
        assert_eq!(receipts.len(), 1);
        assert_eq!(sdb.root(), root);
    }

    #[test]
    fn test_wrong_header_root_aborts_before_commit() {
        let mut sdb = StateDb::new();
        sdb.init_genesis(&Genesis::new(0).with_balance(Address::from_name("alice"), COINBASE_FEE + 100));
        let before = sdb.root();
        let vm = KvVm::new();
        let pos = SimplePos::new();

        let mut block = block_with(&vm, vec![transfer(1, "alice", "bob", 30)], "bp");
        block.header.blocks_root_hash = Hash::digest(b"lie");
        let block = Block::new(block.header, block.body);

        let exec = BlockExecutor::new(&mut sdb, &vm, &pos, &block, None).expect("new");
        let err = exec.execute(&pos).unwrap_err();
        assert!(err.is_consensus());
        assert_eq!(sdb.root(), before);
    }

    #[test]
    fn test_invalid_tx_fails_the_block() {
        let mut sdb = StateDb::new();
        sdb.init_genesis(&Genesis::new(0).with_balance(Address::from_name("alice"), COINBASE_FEE + 100));
        let vm = KvVm::new();
        let pos = SimplePos::new();

        // Nonce 5 does not follow alice's nonce 0.
        let block = block_with(&vm, vec![transfer(5, "alice", "bob", 30)], "bp");
        let exec = BlockExecutor::new(&mut sdb, &vm, &pos, &block, None).expect("new");
        assert!(matches!(exec.execute(&pos), Err(ChainError::Tx(_))));
    }

    #[test]
    fn test_commit_only_skips_re_execution() {
        let mut sdb = StateDb::new();
        sdb.init_genesis(&Genesis::new(0).with_balance(Address::from_name("alice"), COINBASE_FEE + 100));
        let vm = KvVm::new();
        let pos = SimplePos::new();

        // Producer path: execute into a block state, build the header from
        // its root, then hand both to the executor.
        let mut bs = meridian_state::BlockState::new(sdb.root());
        let tx = transfer(1, "alice", "bob", 30);
        execute_tx(&sdb, &vm, &mut bs, &tx, 1, 7).expect("produce");
        send_reward_coinbase(&sdb, &mut bs, &Address::from_name("bp"));
        bs.save_recovery_point(1);
        let root = bs.update(&sdb);

        let block = Block::new(
            BlockHeader {
                block_no: 1,
                prev_hash: Hash::digest(b"genesis"),
                blocks_root_hash: root,
                timestamp: 7,
                coinbase: Address::from_name("bp"),
                consensus: vec![],
            },
            BlockBody { txs: vec![tx] },
        );

        let exec = BlockExecutor::new(&mut sdb, &vm, &pos, &block, Some(bs)).expect("new");
        let (committed, receipts) = exec.execute(&pos).expect("commit only");
        assert_eq!(committed, root);
        assert_eq!(receipts.len(), 1);
    }
}
