//! Messages consumed by the syncer.

use meridian_types::{Block, BlockInfo, BlockNo, Hash, PeerId};
use tokio::sync::mpsc;

/// The sync sub-tasks, used to attribute shutdown and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTask {
    /// The ancestor finder.
    Finder,
    /// The hash fetcher.
    HashFetcher,
    /// The block fetcher.
    BlockFetcher,
    /// The ordering block processor.
    BlockProcessor,
}

impl std::fmt::Display for SyncTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncTask::Finder => "Finder",
            SyncTask::HashFetcher => "HashFetcher",
            SyncTask::BlockFetcher => "BlockFetcher",
            SyncTask::BlockProcessor => "BlockProcessor",
        };
        f.write_str(name)
    }
}

/// A message to the syncer.
///
/// While no session is running, everything except
/// [`SyncerMsg::SyncStart`] is dropped on the floor: responses from a
/// previous, reset session must not leak into the next one.
#[derive(Debug)]
pub enum SyncerMsg {
    /// Begin syncing toward `target_no` using `peer`.
    SyncStart {
        /// Peer that revealed the missing blocks.
        peer: PeerId,
        /// Height to sync to.
        target_no: BlockNo,
    },

    /// A peer's answer to `GetSyncAncestor`.
    GetSyncAncestorRsp {
        /// The highest offered hash the peer recognized, if any.
        ancestor: Option<BlockInfo>,
    },

    /// The finder finished (or failed).
    FinderResult {
        /// The common ancestor, when found.
        ancestor: Option<BlockInfo>,
        /// The failure, when not.
        error: Option<String>,
    },

    /// A peer's answer to `GetHashes`.
    GetHashesRsp {
        /// Canonical hashes after the requested ancestor, chain order.
        hashes: Vec<Hash>,
        /// Peer-side failure, if any.
        error: Option<String>,
    },

    /// A peer's answer to `GetBlockChunks`.
    GetBlockChunksRsp {
        /// The responding peer. An unidentified response is rejected.
        from: PeerId,
        /// The downloaded blocks, chain order.
        blocks: Vec<Block>,
    },

    /// The chain service finished an `AddBlock` issued by the sync pipeline.
    AddBlockRsp {
        /// The connected block, on success.
        block: Option<BlockInfo>,
        /// The failure, otherwise.
        error: Option<String>,
    },

    /// A sub-task asks for one fetcher to be shut down.
    CloseFetcher {
        /// The task to close.
        from: SyncTask,
    },

    /// A sub-task ends the whole session.
    SyncStop {
        /// The task that stopped the session.
        from: SyncTask,
        /// `None` on success, the failure otherwise.
        error: Option<String>,
    },
}

impl SyncerMsg {
    /// Human-readable name of this message kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            SyncerMsg::SyncStart { .. } => "SyncStart",
            SyncerMsg::GetSyncAncestorRsp { .. } => "GetSyncAncestorRsp",
            SyncerMsg::FinderResult { .. } => "FinderResult",
            SyncerMsg::GetHashesRsp { .. } => "GetHashesRsp",
            SyncerMsg::GetBlockChunksRsp { .. } => "GetBlockChunksRsp",
            SyncerMsg::AddBlockRsp { .. } => "AddBlockRsp",
            SyncerMsg::CloseFetcher { .. } => "CloseFetcher",
            SyncerMsg::SyncStop { .. } => "SyncStop",
        }
    }

    /// Whether this message is only meaningful inside a running session.
    pub fn is_session_response(&self) -> bool {
        !matches!(self, SyncerMsg::SyncStart { .. })
    }
}

/// Cloneable sender to the syncer.
#[derive(Debug, Clone)]
pub struct SyncerHandle {
    tx: mpsc::Sender<SyncerMsg>,
}

impl SyncerHandle {
    /// Wrap the syncer's inbound sender.
    pub fn new(tx: mpsc::Sender<SyncerMsg>) -> Self {
        Self { tx }
    }

    /// Deliver a message; silently dropped when the syncer is gone.
    pub async fn send(&self, msg: SyncerMsg) {
        let _ = self.tx.send(msg).await;
    }

    /// Deliver a message from non-async context without waiting; dropped when
    /// the syncer is gone or its queue is full.
    pub fn try_send(&self, msg: SyncerMsg) {
        let _ = self.tx.try_send(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_sync_start_survives_idle() {
        let start = SyncerMsg::SyncStart {
            peer: PeerId::new("p1"),
            target_no: 10,
        };
        let rsp = SyncerMsg::AddBlockRsp {
            block: None,
            error: None,
        };
        assert!(!start.is_session_response());
        assert!(rsp.is_session_response());
    }
}
