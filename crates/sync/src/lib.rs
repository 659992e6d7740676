//! Block synchronization.
//!
//! This crate implements the pull-based sync protocol that catches the local
//! chain up to a peer after an orphan block reveals a gap:
//!
//! 1. **Find**: the finder discovers the highest block both chains share,
//!    probing with a geometric anchor sample and falling back to a linear
//!    backward scan.
//! 2. **Fetch hashes**: the hash fetcher walks from the ancestor toward the
//!    target in fixed-size rounds, feeding hash sets to the block fetcher.
//! 3. **Fetch blocks**: the block fetcher splits hash sets into tasks,
//!    assigns them to free peers under a global tick, requeues timed-out
//!    tasks and blacklists repeat offenders.
//! 4. **Connect**: the block processor orders fetched blocks and hands them
//!    to the chain service in strictly increasing height.
//!
//! The [`Syncer`] task owns the session: it routes peer responses to
//! whichever stage is waiting for them, and any protocol error resets the
//! whole session; the next orphan starts a fresh one.

mod block_fetcher;
mod config;
mod context;
mod error;
mod finder;
mod hash_fetcher;
mod peers;
mod processor;
mod service;

pub use block_fetcher::HashSet;
pub use config::SyncConfig;
pub use context::SyncContext;
pub use error::SyncError;
pub use service::Syncer;

pub(crate) use block_fetcher::{spawn_block_fetcher, BlockFetcherHandle, FetcherRsp};
pub(crate) use finder::{spawn_finder, FinderHandle};
pub(crate) use hash_fetcher::{spawn_hash_fetcher, HashFetcherHandle};
