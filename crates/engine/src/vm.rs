//! The contract engine seam.

use crate::VmError;
use meridian_state::Storage;
use meridian_types::{AccountId, Address, BlockNo};

/// Everything the engine may observe about the call site.
///
/// Handed to the engine by value per call; the engine must not retain it.
#[derive(Debug, Clone)]
pub struct VmContext<'a> {
    /// Height of the block being executed.
    pub block_no: BlockNo,

    /// Timestamp of the block being executed.
    pub timestamp: i64,

    /// Address of the calling account.
    pub sender: &'a Address,

    /// Account id of the contract being called or created.
    pub contract_id: AccountId,

    /// Amount attached to the call (already transferred by the frame).
    pub amount: u64,
}

/// A deterministic smart-contract engine.
///
/// The engine operates on one contract's storage at a time; the transaction
/// executor owns balance movement, fee accounting and receipt emission. An
/// engine must be a pure function of `(storage, input, ctx)`: any
/// wall-clock, randomness or I/O inside an implementation breaks state-root
/// agreement between nodes.
pub trait ContractVm: Send + Sync {
    /// Deploy `code` into a fresh contract, running its constructor.
    /// Returns the constructor's return value.
    fn create(&self, storage: &mut Storage, code: &[u8], ctx: &VmContext<'_>) -> Result<String, VmError>;

    /// Execute a call `payload` against a deployed contract.
    /// Returns the call's return value.
    fn execute(&self, storage: &mut Storage, payload: &[u8], ctx: &VmContext<'_>) -> Result<String, VmError>;

    /// Run a read-only query against a contract's storage.
    fn query(&self, storage: &Storage, query: &[u8]) -> Result<String, VmError>;

    /// Advisory warm-up for the next payload to be executed. Purely an
    /// optimization hint: implementations may drop it, and acting on it must
    /// not change any observable execution result.
    fn preload(&self, _payload: &[u8]) {}
}
