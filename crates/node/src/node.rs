//! Chain + syncer assembly for one node.

use meridian_chain::{ChainConfig, ChainError, ChainService, SimplePos};
use meridian_core::{ChainEvent, ChainHandle, ChainRequest, PeerRequest, SyncerHandle, DEFAULT_CHANNEL_CAPACITY};
use meridian_engine::KvVm;
use meridian_store::MemoryKv;
use meridian_sync::{SyncConfig, Syncer};
use meridian_types::{Genesis, PeerId};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything needed to start a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// This node's transport identity.
    pub id: PeerId,

    /// Chain service tunables.
    pub chain: ChainConfig,

    /// Sync engine tunables.
    pub sync: SyncConfig,

    /// The genesis bundle every node in the network shares.
    pub genesis: Genesis,
}

impl NodeConfig {
    /// Defaults for `id` with the given genesis.
    pub fn new(id: impl Into<String>, genesis: Genesis) -> Self {
        Self {
            id: PeerId::new(id),
            chain: ChainConfig::default(),
            sync: SyncConfig::default(),
            genesis,
        }
    }
}

/// A started node: the handles into its two service tasks plus the outbound
/// channels the network layer drives.
pub struct Node {
    /// Transport identity.
    pub id: PeerId,

    /// Requests into the chain service.
    pub chain: ChainHandle,

    /// Messages into the syncer.
    pub syncer: SyncerHandle,

    /// Outbound peer requests; the network layer consumes these.
    pub peer_rx: mpsc::Receiver<PeerRequest>,

    /// Post-commit events; the gossip/mempool layer consumes these.
    pub event_rx: mpsc::Receiver<ChainEvent>,
}

impl Node {
    /// Build and start a node on an in-memory store with the key-value test
    /// engine and longest-chain consensus.
    pub fn start(cfg: NodeConfig) -> Result<Node, ChainError> {
        let (peer_tx, peer_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);

        // The chain handle must exist before the service runs so the syncer
        // can hold it from the start.
        let (chain_tx, chain_rx) = mpsc::channel::<ChainRequest>(DEFAULT_CHANNEL_CAPACITY);
        let chain = ChainHandle::new(chain_tx);

        let (syncer, _sync_join) = Syncer::spawn(cfg.sync.clone(), chain.clone(), peer_tx.clone());

        let mut service = ChainService::new(
            cfg.chain.clone(),
            &cfg.genesis,
            Arc::new(MemoryKv::new()),
            Box::new(KvVm::new()),
            Box::new(SimplePos::new()),
            peer_tx,
            event_tx,
        )?;
        service.set_syncer(syncer.clone());
        let _chain_join = service.spawn_on(chain_rx);

        tracing::info!(id = %cfg.id, "node started");
        Ok(Node {
            id: cfg.id,
            chain,
            syncer,
            peer_rx,
            event_rx,
        })
    }
}
