use crate::core::state::BlockState;
use log::trace;
use serde::{Deserialize, Serialize};
use stele_common::{
    block::BlockNo,
    crypto::{AccountId, Address},
};
use thiserror::Error;

// Failures raised by contract execution. These are absorbed into
// receipts by the tx executor; only the frame around the VM can fail
// a block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VmError {
    #[error("vm: {0}")]
    Execution(String),
    #[error("invalid call payload: {0}")]
    Payload(String),
    #[error("no code at contract address")]
    NoCode,
}

// Contract call encoding: a function name plus positional JSON
// arguments, e.g. {"Name": "set", "Args": ["k", "v"]}
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CallInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Args", default)]
    pub args: Vec<serde_json::Value>,
}

impl CallInfo {
    pub fn parse(payload: &[u8]) -> Result<Self, VmError> {
        serde_json::from_slice(payload).map_err(|e| VmError::Payload(e.to_string()))
    }

    fn arg_str(&self, idx: usize) -> Option<String> {
        self.args.get(idx).map(|value| match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        })
    }
}

// Execution environment handed to the runtime for one call
pub struct VmContext<'a> {
    pub state: &'a mut BlockState,
    pub contract: AccountId,
    pub contract_address: Address,
    pub sender: Address,
    pub block_no: BlockNo,
    pub timestamp: i64,
}

// Seam to the smart-contract virtual machine. Treated as a pure
// function over contract state: all chain-visible effects go through
// the passed context.
pub trait ContractRuntime: Send + Sync + 'static {
    // Deploy `code` and run its constructor, returning the
    // constructor result
    fn create(&self, ctx: &mut VmContext<'_>, code: &[u8]) -> Result<Vec<u8>, VmError>;

    // Invoke a deployed contract
    fn execute(&self, ctx: &mut VmContext<'_>, call: CallInfo) -> Result<Vec<u8>, VmError>;

    // Read-only query against the given state
    fn query(
        &self,
        state: &BlockState,
        contract: &AccountId,
        method: &str,
    ) -> Result<Vec<u8>, VmError>;
}

// Reference runtime backed by plain contract key-value slots.
//
// Semantics: a call `f(v)` stores `v` under the slot named `f` and
// refreshes the well-known "value" slot; `set(k, v)` writes slot `k`
// directly. Queries read a slot, with "get" aliased to "value".
// Deploy payloads are constructor calls in the same encoding.
pub struct KvRuntime;

const VALUE_SLOT: &[u8] = b"value";

impl KvRuntime {
    fn store_call(&self, ctx: &mut VmContext<'_>, call: &CallInfo) -> Result<Vec<u8>, VmError> {
        match call.name.as_str() {
            "set" => {
                let key = call
                    .arg_str(0)
                    .ok_or_else(|| VmError::Execution("set requires a key".to_string()))?;
                let value = call
                    .arg_str(1)
                    .ok_or_else(|| VmError::Execution("set requires a value".to_string()))?;
                ctx.state
                    .set_storage(&ctx.contract, key.into_bytes(), value.clone().into_bytes());
                Ok(value.into_bytes())
            }
            "fail" => {
                // deterministic failure hook used to exercise the
                // VM-error absorption path
                Err(VmError::Execution(
                    call.arg_str(0).unwrap_or_else(|| "fail called".to_string()),
                ))
            }
            name => {
                let value = call.arg_str(0).unwrap_or_default();
                ctx.state.set_storage(
                    &ctx.contract,
                    name.as_bytes().to_vec(),
                    value.clone().into_bytes(),
                );
                ctx.state
                    .set_storage(&ctx.contract, VALUE_SLOT.to_vec(), value.clone().into_bytes());
                Ok(value.into_bytes())
            }
        }
    }
}

impl ContractRuntime for KvRuntime {
    fn create(&self, ctx: &mut VmContext<'_>, code: &[u8]) -> Result<Vec<u8>, VmError> {
        ctx.state.set_code(&ctx.contract, code.to_vec());
        trace!(
            "deployed contract {} ({} bytes) at block {}",
            ctx.contract_address,
            code.len(),
            ctx.block_no
        );
        // the deploy payload doubles as the constructor call
        match CallInfo::parse(code) {
            Ok(constructor) => self.store_call(ctx, &constructor),
            // raw (non-call) code deploys without a constructor
            Err(_) => Ok(Vec::new()),
        }
    }

    fn execute(&self, ctx: &mut VmContext<'_>, call: CallInfo) -> Result<Vec<u8>, VmError> {
        if ctx.state.get_code(&ctx.contract).is_none() {
            return Err(VmError::NoCode);
        }
        trace!("executing {}.{}", ctx.contract_address, call.name);
        self.store_call(ctx, &call)
    }

    fn query(
        &self,
        state: &BlockState,
        contract: &AccountId,
        method: &str,
    ) -> Result<Vec<u8>, VmError> {
        let slot: &[u8] = if method == "get" {
            VALUE_SLOT
        } else {
            method.as_bytes()
        };
        state
            .get_storage(contract, slot)
            .ok_or_else(|| VmError::Execution(format!("no value for {}", method)))
    }
}
