//! Sync failures.
//!
//! Every variant resets the running session; the caller may retry on the
//! next orphan.

use thiserror::Error;

/// A failure inside the sync engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The ancestor finder failed internally.
    #[error("error finder internal")]
    FinderInternal,

    /// Every peer has been blacklisted.
    #[error("no available peers")]
    AllPeerBad,

    /// The session was cancelled.
    #[error("stopped by quit")]
    Quit,

    /// A peer or chain response failed validation.
    #[error("invalid sync message: {0}")]
    Msg(String),

    /// A stage waited too long for its response.
    #[error("sync timeout: {0}")]
    Timeout(String),

    /// The chain service failed a request the sync depends on.
    #[error("chain: {0}")]
    Chain(String),
}
