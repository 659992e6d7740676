//! End-to-end chain service scenarios: growth, orphans, branches, reorgs.

use meridian_chain::{ChainConfig, ChainError, ChainService, SimplePos, COINBASE_FEE};
use meridian_core::{ChainEvent, PeerRequest};
use meridian_engine::KvVm;
use meridian_state::{BlockState, StateDb};
use meridian_store::MemoryKv;
use meridian_types::{
    Address, Block, BlockBody, BlockHeader, Genesis, Hash, PeerId, SignedTx, TxBody, TxType,
};
use std::sync::Arc;
use tokio::sync::mpsc;

fn genesis() -> Genesis {
    Genesis::new(1_700_000_000)
        .with_balance(Address::from_name("alice"), 10 * COINBASE_FEE)
        .with_balance(Address::from_name("bob"), 0)
}

fn new_service() -> (ChainService, mpsc::Receiver<PeerRequest>, mpsc::Receiver<ChainEvent>) {
    let (peer_tx, peer_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(64);
    let svc = ChainService::new(
        ChainConfig::default(),
        &genesis(),
        Arc::new(MemoryKv::new()),
        Box::new(KvVm::new()),
        Box::new(SimplePos::new()),
        peer_tx,
        event_tx,
    )
    .expect("service");
    (svc, peer_rx, event_rx)
}

/// A block with no transactions: its post-state root is its parent's.
fn empty_block(parent: &Block) -> Block {
    Block::new(
        BlockHeader {
            block_no: parent.block_no() + 1,
            prev_hash: parent.hash(),
            blocks_root_hash: parent.header.blocks_root_hash,
            timestamp: parent.header.timestamp + 1,
            coinbase: Address::default(),
            consensus: vec![],
        },
        BlockBody::default(),
    )
}

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

/// Produce a valid block carrying `txs` by dry-running them on a twin state
/// db that has seen exactly the same block sequence.
struct TwinProducer {
    sdb: StateDb,
    vm: KvVm,
}

impl TwinProducer {
    fn new() -> Self {
        let mut sdb = StateDb::new();
        sdb.init_genesis(&genesis());
        Self { sdb, vm: KvVm::new() }
    }

    fn produce(&mut self, parent: &Block, txs: Vec<SignedTx>, coinbase: &str) -> Block {
        // The twin must sit at the parent's state before executing.
        self.sdb
            .rollback(parent.header.blocks_root_hash)
            .expect("twin at parent root");

        let block_no = parent.block_no() + 1;
        let ts = parent.header.timestamp + 1;
        let mut bs = BlockState::new(self.sdb.root());
        for tx in &txs {
            meridian_chain::execute_tx(&self.sdb, &self.vm, &mut bs, tx, block_no, ts).expect("produce tx");
        }
        meridian_chain::send_reward_coinbase(&self.sdb, &mut bs, &Address::from_name(coinbase));
        bs.save_recovery_point(block_no);
        bs.update(&self.sdb);
        let root = self.sdb.apply(bs).expect("twin apply");

        Block::new(
            BlockHeader {
                block_no,
                prev_hash: parent.hash(),
                blocks_root_hash: root,
                timestamp: ts,
                coinbase: Address::from_name(coinbase),
                consensus: vec![],
            },
            BlockBody { txs },
        )
    }
}

fn peer() -> Option<PeerId> {
    Some(PeerId::new("p1"))
}

#[test]
fn test_main_chain_growth_keeps_index_consistent() {
    let (mut svc, _peer_rx, _event_rx) = new_service();
    let g = svc.get_best_block().expect("genesis");

    let a = empty_block(&g);
    let b = empty_block(&a);
    svc.add_block(a.clone(), None, peer()).expect("a");
    svc.add_block(b.clone(), None, peer()).expect("b");

    assert_eq!(svc.best_block_no(), 2);
    for no in 0..=2 {
        let block = svc.get_block(svc.get_hash_by_no(no).expect("hash")).expect("block");
        assert_eq!(block.block_no(), no);
        if no > 0 {
            assert_eq!(block.prev_hash(), svc.get_hash_by_no(no - 1).expect("prev"));
        }
    }
}

#[test]
fn test_duplicate_networked_block_is_absorbed() {
    let (mut svc, _peer_rx, _event_rx) = new_service();
    let g = svc.get_best_block().expect("genesis");

    let a = empty_block(&g);
    svc.add_block(a.clone(), None, peer()).expect("first");
    svc.add_block(a.clone(), None, peer()).expect("duplicate");

    assert_eq!(svc.best_block_no(), 1);
    assert_eq!(svc.get_best_block().expect("best").hash(), a.hash());
}

#[test]
fn test_orphan_then_parent_connects_both() {
    let (mut svc, _peer_rx, _event_rx) = new_service();
    let g = svc.get_best_block().expect("genesis");

    let b = empty_block(&g);
    let c = empty_block(&b);

    // C arrives before its parent: orphan.
    let err = svc.add_block(c.clone(), None, peer()).unwrap_err();
    assert!(matches!(err, ChainError::Orphan));
    assert_eq!(svc.best_block_no(), 0);

    // B arrives: both connect.
    svc.add_block(b.clone(), None, peer()).expect("parent");
    assert_eq!(svc.best_block_no(), 2);
    assert_eq!(svc.get_best_block().expect("best").hash(), c.hash());
}

#[test]
fn test_orphan_with_producer_state_is_rejected() {
    let (mut svc, _peer_rx, _event_rx) = new_service();
    let g = svc.get_best_block().expect("genesis");

    let b = empty_block(&g);
    let c = empty_block(&b);

    let bs = BlockState::new(Hash::ZERO);
    let err = svc.add_block(c, Some(bs), None).unwrap_err();
    assert!(matches!(err, ChainError::OrphanWithState));
}

#[test]
fn test_orphan_triggers_sync_start() {
    use meridian_core::{SyncerHandle, SyncerMsg};

    let (mut svc, _peer_rx, _event_rx) = new_service();
    let (sync_tx, mut sync_rx) = mpsc::channel(8);
    svc.set_syncer(SyncerHandle::new(sync_tx));

    let g = svc.get_best_block().expect("genesis");
    let far = {
        // A block claiming height 5 with an unknown parent.
        Block::new(
            BlockHeader {
                block_no: 5,
                prev_hash: Hash::digest(b"unknown parent"),
                blocks_root_hash: g.header.blocks_root_hash,
                timestamp: g.header.timestamp + 5,
                coinbase: Address::default(),
                consensus: vec![],
            },
            BlockBody::default(),
        )
    };

    assert!(matches!(svc.add_block(far, None, peer()), Err(ChainError::Orphan)));
    match sync_rx.try_recv().expect("sync start") {
        SyncerMsg::SyncStart { peer, target_no } => {
            assert_eq!(peer, PeerId::new("p1"));
            assert_eq!(target_no, 5);
        }
        other => panic!("unexpected syncer message: {}", other.type_name()),
    }
}

#[test]
fn test_fork_reorg_moves_latest_to_heavier_branch() {
    let (mut svc, _peer_rx, _event_rx) = new_service();
    let g = svc.get_best_block().expect("genesis");

    // Canonical: g -> a -> b.
    let a = empty_block(&g);
    let b = empty_block(&a);
    svc.add_block(a.clone(), None, peer()).expect("a");
    svc.add_block(b.clone(), None, peer()).expect("b");

    // Branch from a: b' -> c', strictly longer.
    let b2 = {
        let mut block = empty_block(&a);
        block.header.timestamp += 100;
        Block::new(block.header, block.body)
    };
    let c2 = empty_block(&b2);

    svc.add_block(b2.clone(), None, peer()).expect("b2 branch");
    assert_eq!(svc.best_block_no(), 2, "branch alone must not move the tip");

    svc.add_block(c2.clone(), None, peer()).expect("c2 reorg");
    assert_eq!(svc.best_block_no(), 3);
    assert_eq!(svc.get_best_block().expect("best").hash(), c2.hash());
    assert_eq!(svc.get_hash_by_no(2).expect("no 2"), b2.hash());
    assert_eq!(svc.get_hash_by_no(1).expect("no 1"), a.hash());
}

#[test]
fn test_reorg_repoints_tx_index() {
    let (mut svc, _peer_rx, _event_rx) = new_service();
    let g = svc.get_best_block().expect("genesis");

    // Canonical: g -> a, carrying tx1.
    let tx1 = transfer(1, "alice", "bob", 30);
    let mut canon = TwinProducer::new();
    let a = canon.produce(&g, vec![tx1.clone()], "bp");
    svc.add_block(a.clone(), None, peer()).expect("a");
    assert!(svc.get_tx(tx1.hash()).is_ok());

    // Branch: g -> a' (tx2) -> b', heavier.
    let tx2 = transfer(1, "alice", "carol", 10);
    let mut branch = TwinProducer::new();
    let a2 = branch.produce(&g, vec![tx2.clone()], "bp2");
    let b2 = branch.produce(&a2, vec![], "bp2");

    svc.add_block(a2.clone(), None, peer()).expect("a2");
    svc.add_block(b2.clone(), None, peer()).expect("b2 reorg");

    // The branch is canonical now.
    assert_eq!(svc.best_block_no(), 2);
    assert_eq!(svc.get_hash_by_no(1).expect("no 1"), a2.hash());

    // tx2 resolved on the new chain; tx1 left with the old one.
    let (_, idx2) = svc.get_tx(tx2.hash()).expect("tx2");
    assert_eq!(idx2.block_hash, a2.hash());
    // tx1's index entry was removed with the old suffix; either failure
    // proves it left the canonical chain.
    assert!(matches!(
        svc.get_tx(tx1.hash()),
        Err(ChainError::NoTx(_) | ChainError::TxNotInMainChain)
    ));

    // Receipts follow the canonical chain too.
    assert!(svc.get_receipt(tx2.hash()).is_ok());
    assert!(svc.get_receipt(tx1.hash()).is_err());

    // Only the surviving chain's transactions are counted.
    assert_eq!(svc.count_txs_in_chain(), 1);
}

#[test]
fn test_block_execution_emits_events() {
    let (mut svc, _peer_rx, mut event_rx) = new_service();
    let g = svc.get_best_block().expect("genesis");

    let a = empty_block(&g);
    svc.add_block(a.clone(), None, peer()).expect("a");

    let mut kinds = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        kinds.push(event.type_name());
    }
    assert!(kinds.contains(&"MempoolDel"));
    assert!(kinds.contains(&"BlockNotify"));
}
