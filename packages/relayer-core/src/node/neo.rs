use async_trait::async_trait;
use serde_json::{json, Value};

use super::rpc::RpcClient;
use super::NeoNode;
use crate::{Error, Result};

pub const GET_CURRENT_HEIGHT: &str = "currentSyncHeight";
pub const CHECK_FROM_CHAIN_TX: &str = "checkIfFromChainTxExist";

pub struct NeoRpcClient {
    rpc: RpcClient,
}

impl NeoRpcClient {
    pub fn new(nodes: Vec<String>) -> Result<Self> {
        Ok(Self {
            rpc: RpcClient::new(nodes)?,
        })
    }

    async fn invoke_function(&self, ccm: &str, operation: &str, args: Value) -> Result<Value> {
        let result: Value = self
            .rpc
            .call("invokefunction", json!([ccm.trim_start_matches("0x"), operation, args]))
            .await?;
        let state = result.get("state").and_then(|s| s.as_str()).unwrap_or_default();
        if !state.starts_with("HALT") {
            return Err(Error::Chain(format!("Neo {} faulted: {}", operation, state)));
        }
        result
            .get("stack")
            .and_then(|s| s.get(0))
            .cloned()
            .ok_or_else(|| Error::Chain(format!("Neo {} returned empty stack", operation)))
    }
}

/// Reads an integer stack item, which nodes serve either as a decimal
/// string or as little-endian bytes.
fn stack_integer(item: &Value) -> Result<u64> {
    let value = item.get("value").and_then(|v| v.as_str()).unwrap_or_default();
    match item.get("type").and_then(|t| t.as_str()) {
        Some("Integer") => value
            .parse()
            .map_err(|_| Error::Serialization(format!("bad integer {}", value))),
        Some("ByteArray") => {
            let bytes = hex::decode(value).map_err(|e| Error::Serialization(e.to_string()))?;
            let mut le = [0u8; 8];
            let n = bytes.len().min(8);
            le[..n].copy_from_slice(&bytes[..n]);
            Ok(u64::from_le_bytes(le))
        }
        other => Err(Error::Serialization(format!("unexpected stack item {:?}", other))),
    }
}

fn stack_bool(item: &Value) -> Result<bool> {
    match item.get("type").and_then(|t| t.as_str()) {
        Some("Boolean") => Ok(item.get("value").and_then(|v| v.as_bool()).unwrap_or_default()
            || item.get("value").and_then(|v| v.as_str()) == Some("true")),
        _ => Ok(stack_integer(item)? != 0),
    }
}

#[async_trait]
impl NeoNode for NeoRpcClient {
    async fn poly_epoch_height(&self, ccm: &str, poly_id: u64) -> Result<u64> {
        let item = self
            .invoke_function(
                ccm,
                GET_CURRENT_HEIGHT,
                json!([{ "type": "Integer", "value": poly_id.to_string() }]),
            )
            .await?;
        stack_integer(&item)
    }

    async fn from_chain_tx_exist(&self, ccm: &str, src_chain_id: u64, tx_id: Vec<u8>) -> Result<bool> {
        let item = self
            .invoke_function(
                ccm,
                CHECK_FROM_CHAIN_TX,
                json!([
                    { "type": "Integer", "value": src_chain_id.to_string() },
                    { "type": "ByteArray", "value": hex::encode(tx_id) },
                ]),
            )
            .await?;
        stack_bool(&item)
    }
}
