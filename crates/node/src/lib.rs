//! Node assembly.
//!
//! Wires the chain service and the syncer together over their typed
//! channels, filters duplicate block notices the way the gossip layer
//! expects, and provides [`sim::SimNetwork`], an in-process multi-node
//! network used by the end-to-end tests: peer requests from one node are
//! served from the other nodes' chain services and routed back as syncer
//! messages, with optional unresponsive peers and deterministic delivery
//! jitter.

mod node;
mod notice;
pub mod sim;

pub use node::{Node, NodeConfig};
pub use notice::BlockNoticeCache;
