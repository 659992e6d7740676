//! Requests consumed by the chain service.

use meridian_state::BlockState;
use meridian_types::{Block, BlockInfo, BlockNo, Hash, PeerId, Receipt, SignedTx, TxIdx};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Message-level failures returned to chain service callers.
///
/// The chain service keeps its rich internal error type; callers on the
/// other side of the channel see this stable surface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainMsgError {
    /// The block's parent is unknown; a sync was triggered if configured.
    #[error("block is orphan, not connected in chain")]
    Orphan,

    /// No block under that hash or number.
    #[error("block not found")]
    NoBlock,

    /// No such transaction on the canonical chain.
    #[error("tx not found")]
    NoTx,

    /// No receipt for that transaction.
    #[error("cannot find a receipt")]
    NoReceipt,

    /// The transaction exists but its block left the canonical chain.
    #[error("tx is not in the main chain")]
    NotInMainChain,

    /// The block was rejected by validation.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// The chain service failed internally or is shutting down.
    #[error("chain service error: {0}")]
    Internal(String),
}

/// Point-in-time figures about the chain service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStats {
    /// Height of the canonical tip.
    pub best_no: BlockNo,

    /// Hash of the canonical tip.
    pub best_hash: Hash,

    /// Number of blocks currently parked in the orphan pool.
    pub orphans: usize,
}

/// A request to the chain service.
///
/// Every chain and state mutation in the system flows through this enum,
/// which is what serializes commits: the service handles one request at a
/// time.
#[derive(Debug)]
pub enum ChainRequest {
    /// Add a block received from a peer or produced locally.
    ///
    /// `state` is only present when the local producer already executed the
    /// block; such blocks must never be orphans.
    AddBlock {
        /// The block to add.
        block: Box<Block>,
        /// Pre-executed block state from the local producer, if any.
        state: Option<BlockState>,
        /// Peer the block came from; drives orphan-triggered sync.
        peer: Option<PeerId>,
        /// Resolves once the block is handled.
        reply: oneshot::Sender<Result<BlockInfo, ChainMsgError>>,
    },

    /// Fetch a block by hash.
    GetBlock {
        /// Block hash.
        hash: Hash,
        /// Reply channel.
        reply: oneshot::Sender<Result<Block, ChainMsgError>>,
    },

    /// Fetch a canonical block by height.
    GetBlockByNo {
        /// Block height.
        no: BlockNo,
        /// Reply channel.
        reply: oneshot::Sender<Result<Block, ChainMsgError>>,
    },

    /// Fetch the canonical tip.
    GetBestBlock {
        /// Reply channel.
        reply: oneshot::Sender<Result<Block, ChainMsgError>>,
    },

    /// Fetch a transaction and its canonical location.
    GetTx {
        /// Transaction hash.
        hash: Hash,
        /// Reply channel.
        reply: oneshot::Sender<Result<(SignedTx, TxIdx), ChainMsgError>>,
    },

    /// Fetch the receipt of a transaction on the canonical chain.
    GetReceipt {
        /// Transaction hash.
        hash: Hash,
        /// Reply channel.
        reply: oneshot::Sender<Result<Receipt, ChainMsgError>>,
    },

    /// Service op for remote peers: anchors for divergence discovery.
    GetAnchors {
        /// Reply channel.
        reply: oneshot::Sender<Vec<Hash>>,
    },

    /// Service op for remote peers: the highest offered hash that is on our
    /// canonical chain.
    FindAncestor {
        /// Candidate hashes, newest first.
        hashes: Vec<Hash>,
        /// Reply channel.
        reply: oneshot::Sender<Option<BlockInfo>>,
    },

    /// Service op for remote peers: canonical hashes after a known ancestor.
    GetHashesFrom {
        /// The requester's last known canonical block.
        prev: BlockInfo,
        /// Maximum number of hashes to return.
        count: u64,
        /// Reply channel.
        reply: oneshot::Sender<Result<Vec<Hash>, ChainMsgError>>,
    },

    /// Service op for remote peers: block bodies by hash, in request order.
    GetBlocksByHash {
        /// Hashes to fetch.
        hashes: Vec<Hash>,
        /// Reply channel.
        reply: oneshot::Sender<Result<Vec<Block>, ChainMsgError>>,
    },

    /// Fetch service statistics.
    GetStats {
        /// Reply channel.
        reply: oneshot::Sender<ChainStats>,
    },
}

/// Cloneable async interface to the chain service.
#[derive(Debug, Clone)]
pub struct ChainHandle {
    tx: mpsc::Sender<ChainRequest>,
}

impl ChainHandle {
    /// Wrap the chain service's request sender.
    pub fn new(tx: mpsc::Sender<ChainRequest>) -> Self {
        Self { tx }
    }

    async fn send_recv<T>(&self, req: ChainRequest, rx: oneshot::Receiver<T>) -> Result<T, ChainMsgError> {
        self.tx
            .send(req)
            .await
            .map_err(|_| ChainMsgError::Internal("chain service stopped".into()))?;
        rx.await
            .map_err(|_| ChainMsgError::Internal("chain service dropped reply".into()))
    }

    /// Add a block; see [`ChainRequest::AddBlock`].
    pub async fn add_block(
        &self,
        block: Block,
        state: Option<BlockState>,
        peer: Option<PeerId>,
    ) -> Result<BlockInfo, ChainMsgError> {
        let (reply, rx) = oneshot::channel();
        let req = ChainRequest::AddBlock {
            block: Box::new(block),
            state,
            peer,
            reply,
        };
        self.send_recv(req, rx).await?
    }

    /// Fetch a block by hash.
    pub async fn get_block(&self, hash: Hash) -> Result<Block, ChainMsgError> {
        let (reply, rx) = oneshot::channel();
        self.send_recv(ChainRequest::GetBlock { hash, reply }, rx).await?
    }

    /// Fetch a canonical block by height.
    pub async fn get_block_by_no(&self, no: BlockNo) -> Result<Block, ChainMsgError> {
        let (reply, rx) = oneshot::channel();
        self.send_recv(ChainRequest::GetBlockByNo { no, reply }, rx).await?
    }

    /// Fetch the canonical tip.
    pub async fn get_best_block(&self) -> Result<Block, ChainMsgError> {
        let (reply, rx) = oneshot::channel();
        self.send_recv(ChainRequest::GetBestBlock { reply }, rx).await?
    }

    /// Fetch a transaction and its canonical location.
    pub async fn get_tx(&self, hash: Hash) -> Result<(SignedTx, TxIdx), ChainMsgError> {
        let (reply, rx) = oneshot::channel();
        self.send_recv(ChainRequest::GetTx { hash, reply }, rx).await?
    }

    /// Fetch the receipt of a canonical transaction.
    pub async fn get_receipt(&self, hash: Hash) -> Result<Receipt, ChainMsgError> {
        let (reply, rx) = oneshot::channel();
        self.send_recv(ChainRequest::GetReceipt { hash, reply }, rx).await?
    }

    /// Fetch divergence-discovery anchors.
    pub async fn get_anchors(&self) -> Result<Vec<Hash>, ChainMsgError> {
        let (reply, rx) = oneshot::channel();
        self.send_recv(ChainRequest::GetAnchors { reply }, rx).await
    }

    /// Find the highest offered hash on our canonical chain.
    pub async fn find_ancestor(&self, hashes: Vec<Hash>) -> Result<Option<BlockInfo>, ChainMsgError> {
        let (reply, rx) = oneshot::channel();
        self.send_recv(ChainRequest::FindAncestor { hashes, reply }, rx).await
    }

    /// Fetch canonical hashes after a known ancestor.
    pub async fn get_hashes_from(&self, prev: BlockInfo, count: u64) -> Result<Vec<Hash>, ChainMsgError> {
        let (reply, rx) = oneshot::channel();
        self.send_recv(ChainRequest::GetHashesFrom { prev, count, reply }, rx).await?
    }

    /// Fetch block bodies by hash.
    pub async fn get_blocks_by_hash(&self, hashes: Vec<Hash>) -> Result<Vec<Block>, ChainMsgError> {
        let (reply, rx) = oneshot::channel();
        self.send_recv(ChainRequest::GetBlocksByHash { hashes, reply }, rx).await?
    }

    /// Fetch service statistics.
    pub async fn get_stats(&self) -> Result<ChainStats, ChainMsgError> {
        let (reply, rx) = oneshot::channel();
        self.send_recv(ChainRequest::GetStats { reply }, rx).await
    }
}
