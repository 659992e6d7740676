//! Deterministic key-value contract engine.

use crate::{ContractVm, VmContext, VmError};
use meridian_state::Storage;
use serde::{Deserialize, Serialize};

/// Storage cell written by single-argument calls.
const VALUE_CELL: &[u8] = b"value";

/// A call or constructor payload: a function name plus string arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmCall {
    /// Function to invoke.
    #[serde(rename = "fn")]
    pub func: String,

    /// String arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl VmCall {
    /// Build a call payload.
    pub fn new(func: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            func: func.into(),
            args,
        }
    }

    /// Encode for use as a transaction payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// A contract engine whose contracts are key-value cells.
///
/// Call semantics:
///
/// - `set(k, v)` writes cell `k`.
/// - `get(k)` (or bare `get`) reads a cell; this is also the query form.
/// - `fail(msg)` raises an execution error, exercising the VM-error
///   absorption path.
/// - Any other function stores its first argument in the `value` cell and
///   returns it, so `foo("x")` followed by a `get` query yields `"x"`.
///
/// Constructors run exactly like calls against the empty storage.
#[derive(Debug, Clone, Default)]
pub struct KvVm;

impl KvVm {
    /// Create the engine.
    pub fn new() -> Self {
        Self
    }

    fn decode(payload: &[u8]) -> Result<VmCall, VmError> {
        serde_json::from_slice(payload).map_err(|e| VmError::InvalidPayload(e.to_string()))
    }

    fn run(storage: &mut Storage, call: &VmCall) -> Result<String, VmError> {
        match call.func.as_str() {
            "set" => {
                let [key, value] = call.args.as_slice() else {
                    return Err(VmError::UndefinedFunction("set expects (key, value)".into()));
                };
                storage.insert(key.as_bytes().to_vec(), value.as_bytes().to_vec());
                Ok(String::new())
            }
            "get" => {
                let key = call.args.first().map(String::as_bytes).unwrap_or(VALUE_CELL);
                let value = storage.get(key).cloned().unwrap_or_default();
                Ok(String::from_utf8_lossy(&value).into_owned())
            }
            "fail" => {
                let msg = call.args.first().cloned().unwrap_or_else(|| "contract failure".into());
                Err(VmError::Execution(msg))
            }
            _ => {
                let value = call.args.first().cloned().unwrap_or_default();
                storage.insert(VALUE_CELL.to_vec(), value.as_bytes().to_vec());
                Ok(value)
            }
        }
    }
}

impl ContractVm for KvVm {
    fn create(&self, storage: &mut Storage, code: &[u8], ctx: &VmContext<'_>) -> Result<String, VmError> {
        if code.is_empty() {
            return Err(VmError::InvalidPayload("empty contract code".into()));
        }
        let call = Self::decode(code)?;

        tracing::debug!(contract = ?ctx.contract_id, func = %call.func, "contract constructor");
        Self::run(storage, &call)?;
        Ok(String::new())
    }

    fn execute(&self, storage: &mut Storage, payload: &[u8], ctx: &VmContext<'_>) -> Result<String, VmError> {
        let call = Self::decode(payload)?;

        tracing::debug!(contract = ?ctx.contract_id, func = %call.func, "contract call");
        Self::run(storage, &call)
    }

    fn query(&self, storage: &Storage, query: &[u8]) -> Result<String, VmError> {
        let call = Self::decode(query).map_err(|e| VmError::Query(e.to_string()))?;
        if call.func != "get" {
            return Err(VmError::Query(format!("unsupported query function: {}", call.func)));
        }

        let key = call.args.first().map(String::as_bytes).unwrap_or(VALUE_CELL);
        let value = storage.get(key).cloned().unwrap_or_default();
        Ok(String::from_utf8_lossy(&value).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::{AccountId, Address};

    fn ctx<'a>(sender: &'a Address) -> VmContext<'a> {
        VmContext {
            block_no: 1,
            timestamp: 0,
            sender,
            contract_id: AccountId::from_address(&Address::from_name("c")),
            amount: 0,
        }
    }

    #[test]
    fn test_call_stores_and_query_reads() {
        let vm = KvVm::new();
        let sender = Address::from_name("alice");
        let mut storage = Storage::new();

        vm.create(&mut storage, &VmCall::new("init", vec!["init".into()]).to_bytes(), &ctx(&sender))
            .expect("create");

        let rv = vm
            .execute(&mut storage, &VmCall::new("foo", vec!["x".into()]).to_bytes(), &ctx(&sender))
            .expect("call");
        assert_eq!(rv, "x");

        let got = vm
            .query(&storage, &VmCall::new("get", vec![]).to_bytes())
            .expect("query");
        assert_eq!(got, "x");
    }

    #[test]
    fn test_fail_raises_execution_error() {
        let vm = KvVm::new();
        let sender = Address::from_name("alice");
        let mut storage = Storage::new();

        let err = vm
            .execute(&mut storage, &VmCall::new("fail", vec!["boom".into()]).to_bytes(), &ctx(&sender))
            .unwrap_err();
        assert_eq!(err, VmError::Execution("boom".into()));
    }

    #[test]
    fn test_garbage_payload_is_a_vm_error() {
        let vm = KvVm::new();
        let sender = Address::from_name("alice");
        let mut storage = Storage::new();

        let err = vm.execute(&mut storage, b"not json", &ctx(&sender)).unwrap_err();
        assert!(matches!(err, VmError::InvalidPayload(_)));
    }

    #[test]
    fn test_query_rejects_mutations() {
        let vm = KvVm::new();
        let storage = Storage::new();

        let err = vm
            .query(&storage, &VmCall::new("set", vec!["k".into(), "v".into()]).to_bytes())
            .unwrap_err();
        assert!(matches!(err, VmError::Query(_)));
    }
}
