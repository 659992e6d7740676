//! Engine failure classification.

use thiserror::Error;

/// A failure produced by the contract engine.
///
/// These never fail a block: the transaction executor converts them into an
/// error receipt, charges the fee, and moves on. Everything the engine can
/// signal must therefore go through this type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VmError {
    /// The call payload could not be decoded.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The target function does not exist or rejected its arguments.
    #[error("undefined function: {0}")]
    UndefinedFunction(String),

    /// The contract itself raised an error.
    #[error("{0}")]
    Execution(String),

    /// A read-only query was malformed or unsupported.
    #[error("query failed: {0}")]
    Query(String),
}
