//! Typed messages and handles for the meridian tasks.
//!
//! The services in this workspace are independent tokio tasks that
//! communicate only through typed channels:
//!
//! - [`ChainRequest`]: everything the chain service consumes. Queries carry a
//!   oneshot reply sender; [`ChainHandle`] wraps the request channel behind
//!   async methods.
//! - [`SyncerMsg`]: everything the syncer consumes, from the initial
//!   [`SyncerMsg::SyncStart`] through the responses the peer layer routes
//!   back to a running session.
//! - [`PeerRequest`]: outbound requests to the peer layer.
//! - [`ChainEvent`]: notifications the chain service emits after commits
//!   (block gossip, mempool eviction).
//!
//! Receiving is a `match` on the message enum; there is no dynamic dispatch
//! anywhere on these paths.

mod chain;
mod event;
mod peer;
mod syncer;

pub use chain::{ChainHandle, ChainMsgError, ChainRequest, ChainStats};
pub use event::ChainEvent;
pub use peer::PeerRequest;
pub use syncer::{SyncTask, SyncerHandle, SyncerMsg};

/// Default capacity for the service request channels.
///
/// Bounded so a flooded producer blocks instead of growing the queue without
/// limit; sized to keep a busy sync pipeline from stalling on the tick
/// cadence.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
