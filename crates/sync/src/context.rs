//! Per-session sync state.

use meridian_types::{BlockInfo, BlockNo, PeerId};

/// Everything a session knows about where it is going.
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// The peer the session pulls from.
    pub peer: PeerId,

    /// Height being synced to.
    pub target_no: BlockNo,

    /// Local best height when the session started.
    pub best_no: BlockNo,

    /// The highest block shared with the peer, once the finder has run.
    pub common_ancestor: Option<BlockInfo>,

    /// Blocks the session will transfer, set together with the ancestor.
    pub total_count: u64,
}

impl SyncContext {
    /// A fresh session context.
    pub fn new(peer: PeerId, target_no: BlockNo, best_no: BlockNo) -> Self {
        Self {
            peer,
            target_no,
            best_no,
            common_ancestor: None,
            total_count: 0,
        }
    }

    /// Record the finder's result.
    pub fn set_ancestor(&mut self, ancestor: BlockInfo) {
        self.total_count = self.target_no.saturating_sub(ancestor.no);
        self.common_ancestor = Some(ancestor);
    }
}
