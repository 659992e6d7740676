//! Outbound requests to the peer layer.

use meridian_types::{BlockInfo, Hash, PeerId};
use std::time::Duration;
use tokio::sync::oneshot;

/// A request the chain or syncer hands to the peer layer.
///
/// The peer layer owns delivery; responses come back as [`crate::SyncerMsg`]
/// values routed to the syncer's inbound channel.
#[derive(Debug)]
pub enum PeerRequest {
    /// List the currently connected, healthy peers.
    GetPeers {
        /// Reply channel.
        reply: oneshot::Sender<Vec<PeerId>>,
    },

    /// Ask `to` for the highest of `hashes` it has on its chain.
    GetSyncAncestor {
        /// Target peer.
        to: PeerId,
        /// Candidate hashes, newest first.
        hashes: Vec<Hash>,
    },

    /// Ask `to` for up to `count` canonical hashes after `prev`.
    GetHashes {
        /// Target peer.
        to: PeerId,
        /// Our last known common block.
        prev: BlockInfo,
        /// Maximum number of hashes.
        count: u64,
    },

    /// Ask `to` for the block bodies of `hashes`.
    GetBlockChunks {
        /// Target peer.
        to: PeerId,
        /// Hashes to download, chain order.
        hashes: Vec<Hash>,
        /// How long the requester will wait before treating the task as
        /// failed.
        ttl: Duration,
    },

    /// Ask `to` for the blocks above the newest of `anchors` it recognizes.
    GetMissingBlocks {
        /// Target peer.
        to: PeerId,
        /// Sample of our canonical hashes, newest first.
        anchors: Vec<Hash>,
    },
}

impl PeerRequest {
    /// Human-readable name of this request kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            PeerRequest::GetPeers { .. } => "GetPeers",
            PeerRequest::GetSyncAncestor { .. } => "GetSyncAncestor",
            PeerRequest::GetHashes { .. } => "GetHashes",
            PeerRequest::GetBlockChunks { .. } => "GetBlockChunks",
            PeerRequest::GetMissingBlocks { .. } => "GetMissingBlocks",
        }
    }
}
