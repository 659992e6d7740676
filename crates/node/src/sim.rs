//! In-process multi-node network.
//!
//! Every node's outbound [`PeerRequest`] stream is served by a router task
//! that queries the *other* nodes' chain services and feeds the answers back
//! into the requester's syncer, exactly mirroring what the transport layer
//! does against remote nodes. Peers listed in `unresponsive` swallow
//! download requests, which is how the tests exercise task timeouts and
//! blacklisting.

use crate::{BlockNoticeCache, Node, NodeConfig};
use meridian_core::{ChainHandle, ChainMsgError, PeerRequest, SyncerHandle, SyncerMsg};
use meridian_types::{Block, BlockInfo, BlockNo, Genesis, PeerId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;

/// Capacity of the gossip dedup cache per node.
const NOTICE_CACHE_SIZE: usize = 1024;

/// A handle onto one simulated node.
pub struct SimNode {
    /// Transport identity.
    pub id: PeerId,

    /// Requests into the node's chain service.
    pub chain: ChainHandle,

    /// Messages into the node's syncer.
    pub syncer: SyncerHandle,

    notices: BlockNoticeCache,
}

/// A set of nodes wired together through in-process routers.
pub struct SimNetwork {
    nodes: HashMap<PeerId, SimNode>,
}

impl SimNetwork {
    /// Start `names` as nodes sharing `genesis`, with `configure` applied to
    /// each node's config. Peers in `unresponsive` never answer block
    /// downloads.
    pub fn start(
        names: &[&str],
        genesis: Genesis,
        unresponsive: &[&str],
        seed: u64,
        configure: impl Fn(NodeConfig) -> NodeConfig,
    ) -> Self {
        let mut started = Vec::new();
        for name in names {
            let cfg = configure(NodeConfig::new(*name, genesis.clone()));
            let node = Node::start(cfg).expect("node start");
            started.push(node);
        }

        let chains: HashMap<PeerId, ChainHandle> =
            started.iter().map(|n| (n.id.clone(), n.chain.clone())).collect();
        let syncers: HashMap<PeerId, SyncerHandle> =
            started.iter().map(|n| (n.id.clone(), n.syncer.clone())).collect();
        let dead: HashSet<PeerId> = unresponsive.iter().map(|n| PeerId::new(*n)).collect();

        let mut nodes = HashMap::new();
        for (i, node) in started.into_iter().enumerate() {
            let Node {
                id,
                chain,
                syncer,
                peer_rx,
                event_rx,
            } = node;

            tokio::spawn(route_peer_requests(
                id.clone(),
                peer_rx,
                chains.clone(),
                syncers.clone(),
                dead.clone(),
                ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64)),
            ));
            tokio::spawn(drain_events(event_rx));

            nodes.insert(
                id.clone(),
                SimNode {
                    id,
                    chain,
                    syncer,
                    notices: BlockNoticeCache::new(NOTICE_CACHE_SIZE),
                },
            );
        }

        Self { nodes }
    }

    /// The handle of one node.
    pub fn node(&self, name: &str) -> &SimNode {
        &self.nodes[&PeerId::new(name)]
    }

    /// Grow `name`'s chain by `count` empty blocks; returns the new tip.
    pub async fn extend_chain(&self, name: &str, count: u64) -> Block {
        let chain = &self.node(name).chain;
        let mut parent = chain.get_best_block().await.expect("best block");

        for _ in 0..count {
            let block = empty_child(&parent);
            chain
                .add_block(block.clone(), None, None)
                .await
                .expect("extend chain");
            parent = block;
        }
        parent
    }

    /// Deliver a block notice from `from` to `to`, with gossip-level
    /// duplicate filtering. Returns the chain's verdict, `None` when the
    /// notice was a duplicate.
    pub async fn notify_block(
        &mut self,
        from: &str,
        to: &str,
        block: Block,
    ) -> Option<Result<BlockInfo, ChainMsgError>> {
        let from_id = PeerId::new(from);
        let node = self.nodes.get_mut(&PeerId::new(to)).expect("node");
        if node.notices.contains_or_add(block.hash()) {
            return None;
        }
        Some(node.chain.add_block(block, None, Some(from_id)).await)
    }

    /// Wait until `name`'s best block reaches `no`, or panic after
    /// `timeout`.
    pub async fn wait_for_height(&self, name: &str, no: BlockNo, timeout: Duration) -> Block {
        let chain = self.node(name).chain.clone();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Ok(best) = chain.get_best_block().await {
                if best.block_no() >= no {
                    return best;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("{name} did not reach height {no} in {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// A block with no transactions extending `parent`.
pub fn empty_child(parent: &Block) -> Block {
    use meridian_types::{Address, BlockBody, BlockHeader};

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

async fn drain_events(mut event_rx: mpsc::Receiver<meridian_core::ChainEvent>) {
    while event_rx.recv().await.is_some() {}
}

/// Serve one node's outbound peer requests from the other nodes.
async fn route_peer_requests(
    self_id: PeerId,
    mut peer_rx: mpsc::Receiver<PeerRequest>,
    chains: HashMap<PeerId, ChainHandle>,
    syncers: HashMap<PeerId, SyncerHandle>,
    dead: HashSet<PeerId>,
    mut rng: ChaCha8Rng,
) {
    let syncer = syncers[&self_id].clone();

    while let Some(req) = peer_rx.recv().await {
        // Delivery jitter keeps response interleaving honest without making
        // runs nondeterministic.
        let jitter = Duration::from_millis(rng.gen_range(0..3));
        tokio::time::sleep(jitter).await;

        match req {
            PeerRequest::GetPeers { reply } => {
                let roster: Vec<PeerId> = chains.keys().filter(|id| **id != self_id).cloned().collect();
                let _ = reply.send(roster);
            }
            PeerRequest::GetSyncAncestor { to, hashes } => {
                let Some(remote) = chains.get(&to) else { continue };
                let ancestor = remote.find_ancestor(hashes).await.unwrap_or(None);
                syncer.send(SyncerMsg::GetSyncAncestorRsp { ancestor }).await;
            }
            PeerRequest::GetHashes { to, prev, count } => {
                let Some(remote) = chains.get(&to) else { continue };
                let msg = match remote.get_hashes_from(prev, count).await {
                    Ok(hashes) => SyncerMsg::GetHashesRsp { hashes, error: None },
                    Err(e) => SyncerMsg::GetHashesRsp {
                        hashes: Vec::new(),
                        error: Some(e.to_string()),
                    },
                };
                syncer.send(msg).await;
            }
            PeerRequest::GetBlockChunks { to, hashes, .. } => {
                if dead.contains(&to) {
                    tracing::debug!(peer = %to, "unresponsive peer swallowed a chunk request");
                    continue;
                }
                let Some(remote) = chains.get(&to) else { continue };
                if let Ok(blocks) = remote.get_blocks_by_hash(hashes).await {
                    syncer
                        .send(SyncerMsg::GetBlockChunksRsp { from: to, blocks })
                        .await;
                }
            }
            PeerRequest::GetMissingBlocks { to, anchors } => {
                // The anchors path answers with direct block notices; the
                // fast-sync tests do not exercise it.
                tracing::debug!(peer = %to, anchors = anchors.len(), "missing-blocks request ignored by harness");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::Hash;

    #[test]
    fn test_empty_child_links_to_parent() {
        let genesis = Genesis::new(1_700_000_000);
        let g = genesis.block(Hash::ZERO);
        let child = empty_child(&g);

        assert_eq!(child.block_no(), 1);
        assert_eq!(child.prev_hash(), g.hash());
    }
}
