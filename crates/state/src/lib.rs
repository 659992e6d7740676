//! Versioned world state.
//!
//! [`StateDb`] holds the committed account and contract state, one immutable
//! version per committed state root, so the chain can roll back to any
//! earlier root during a reorganization. [`BlockState`] is the mutation
//! buffer for a single block: all writes go into the buffer, transaction
//! failures roll back to a snapshot, and a successful block is folded into
//! the db with [`StateDb::apply`].
//!
//! Only the chain service task touches either type; there is no interior
//! locking.

mod block_state;
mod state_db;

pub use block_state::{BlockState, StateSnapshot};
pub use state_db::{StateDb, Storage};

use meridian_types::Hash;
use thiserror::Error;

/// Errors surfaced by the state layer.
#[derive(Debug, Error)]
pub enum StateError {
    /// A rollback targeted a root this db never committed.
    #[error("unknown state root {0}")]
    UnknownRoot(Hash),

    /// A block state was applied whose computed root was never set.
    #[error("block state was not updated before apply")]
    NotUpdated,
}
