//! Notifications emitted by the chain service.

use meridian_types::Block;

/// A post-commit notification.
///
/// The node wires these to the gossip layer and the mempool; the chain
/// service never blocks on them beyond channel capacity.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A block was connected to the canonical chain.
    BlockNotify {
        /// The connected block.
        block: Block,
    },

    /// A block's transactions should leave the mempool.
    MempoolDel {
        /// The committed block.
        block: Block,
    },
}

impl ChainEvent {
    /// Human-readable name of this event kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            ChainEvent::BlockNotify { .. } => "BlockNotify",
            ChainEvent::MempoolDel { .. } => "MempoolDel",
        }
    }
}
