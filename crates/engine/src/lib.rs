//! Contract execution interface.
//!
//! The chain treats the smart-contract engine as a pure function over
//! contract storage: [`ContractVm`] exposes `create`, `execute` and `query`,
//! and every engine failure is a [`VmError`], the classification the
//! transaction executor uses to absorb contract failures into receipts
//! instead of failing the block.
//!
//! [`KvVm`] is the deterministic key-value engine used by tests and the
//! simulated network; a production engine plugs in behind the same trait.
//! Governance transitions (staking against the system account) are a fixed
//! state-transition table, not engine code, and live in [`governance`].

mod dummy;
mod error;
pub mod governance;
mod vm;

pub use dummy::{KvVm, VmCall};
pub use error::VmError;
pub use vm::{ContractVm, VmContext};
