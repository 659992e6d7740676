//! Chain management.
//!
//! This crate is the single source of truth for the ledger. The
//! [`ChainService`] task owns the block index ([`ChainDb`]), the world state
//! (`meridian_state::StateDb`) and the orphan pool; every mutation (block
//! persistence, execution, canonical connection, reorganization) happens on
//! that one task, which is what linearizes commits without fine-grained
//! locking.
//!
//! The per-block workflow lives in [`processor`]: classify an incoming block
//! as main-chain, branch or orphan, persist it, execute main-chain blocks
//! through the [`executor`] pipeline, and hand heavier branches to the
//! [`reorg`] machinery.

mod block_executor;
mod chaindb;
mod config;
mod consensus;
mod error;
mod executor;
mod orphan;
mod processor;
mod reorg;
mod service;
pub mod testing;

pub use block_executor::BlockExecutor;
pub use chaindb::ChainDb;
pub use config::{ChainConfig, OrphanPoolConfig, COINBASE_FEE, TX_BATCH_MAX};
pub use consensus::{Consensus, SimplePos};
pub use error::{ChainError, TxError};
pub use executor::{execute_tx, send_reward_coinbase};
pub use orphan::OrphanPool;
pub use service::ChainService;
