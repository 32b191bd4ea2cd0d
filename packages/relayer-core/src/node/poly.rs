use async_trait::async_trait;
use serde_json::{json, Value};

use super::rpc::RpcClient;
use super::{PolyEvent, PolyNode};
use crate::{types::PolyHeader, Error, Result};

pub const HEADER_SYNC_CONTRACT: &str = "0100000000000000000000000000000000000000";
pub const CROSS_CHAIN_MANAGER_CONTRACT: &str = "0300000000000000000000000000000000000000";

const CURRENT_HEADER_HEIGHT: &[u8] = b"currentHeaderHeight";
const EPOCH_SWITCH: &[u8] = b"epochSwitch";

/// Relay chain node client.
pub struct PolyRpcClient {
    rpc: RpcClient,
}

impl PolyRpcClient {
    pub fn new(nodes: Vec<String>) -> Result<Self> {
        Ok(Self {
            rpc: RpcClient::new(nodes)?,
        })
    }

    async fn storage(&self, contract: &str, prefix: &[u8], chain_id: u64) -> Result<Vec<u8>> {
        let mut key = prefix.to_vec();
        key.extend_from_slice(&chain_id.to_le_bytes());
        let value: Option<String> = self
            .rpc
            .call("getstorage", json!([contract, hex::encode(key)]))
            .await?;
        hex::decode(value.unwrap_or_default()).map_err(|e| Error::Serialization(e.to_string()))
    }

    async fn audit_path(&self, method: &str, params: Value) -> Result<String> {
        let proof: Value = self.rpc.call(method, params).await?;
        proof
            .get("AuditPath")
            .and_then(|p| p.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Chain(format!("{} returned no audit path", method)))
    }

    fn parse_events(raw: &Value) -> Vec<PolyEvent> {
        let tx_hash = raw.get("TxHash").and_then(|h| h.as_str()).unwrap_or_default();
        let height = raw.get("Height").and_then(|h| h.as_u64()).unwrap_or_default() as u32;
        raw.get("Notify")
            .and_then(|n| n.as_array())
            .into_iter()
            .flatten()
            .map(|notify| PolyEvent {
                tx_hash: tx_hash.to_string(),
                height,
                contract: notify
                    .get("ContractAddress")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_string(),
                states: notify
                    .get("States")
                    .and_then(|s| s.as_array())
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect()
    }
}

#[async_trait]
impl PolyNode for PolyRpcClient {
    async fn latest_height(&self) -> Result<u32> {
        let count: u32 = self.rpc.call("getblockcount", json!([])).await?;
        Ok(count.saturating_sub(1))
    }

    async fn header(&self, height: u32) -> Result<PolyHeader> {
        let raw: String = self.rpc.call("getheaderbyheight", json!([height])).await?;
        let raw = hex::decode(raw).map_err(|e| Error::Serialization(e.to_string()))?;
        PolyHeader::decode(&raw)
    }

    async fn cross_states_proof(&self, height: u32, key: &str) -> Result<String> {
        self.audit_path("getcrossstatesproof", json!([height, key])).await
    }

    async fn merkle_proof(&self, height: u32, root_height: u32) -> Result<String> {
        self.audit_path("getmerkleproof", json!([height, root_height])).await
    }

    async fn side_chain_height(&self, chain_id: u64) -> Result<u64> {
        let value = self
            .storage(HEADER_SYNC_CONTRACT, CURRENT_HEADER_HEIGHT, chain_id)
            .await?;
        let mut bytes = [0u8; 8];
        let n = value.len().min(8);
        bytes[..n].copy_from_slice(&value[..n]);
        Ok(u64::from_le_bytes(bytes))
    }

    async fn side_chain_epoch(&self, chain_id: u64) -> Result<Vec<u8>> {
        self.storage(HEADER_SYNC_CONTRACT, EPOCH_SWITCH, chain_id).await
    }

    async fn block_events(&self, height: u32) -> Result<Vec<PolyEvent>> {
        let events: Option<Vec<Value>> = self.rpc.call("getsmartcodeevent", json!([height])).await?;
        Ok(events
            .unwrap_or_default()
            .iter()
            .flat_map(|raw| {
                let mut evs = Self::parse_events(raw);
                for ev in evs.iter_mut() {
                    ev.height = height;
                }
                evs
            })
            .collect())
    }

    async fn tx_events(&self, hash: &str) -> Result<Vec<PolyEvent>> {
        let event: Value = self.rpc.call("getsmartcodeevent", json!([hash])).await?;
        if event.is_null() {
            return Err(Error::Chain(format!("Poly tx {} not found", hash)));
        }
        Ok(Self::parse_events(&event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::poly_header;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_header_and_events() {
        let header = poly_header(77, vec![vec![9; 65]]);
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "getheaderbyheight" })))
            .with_body(
                json!({ "desc": "SUCCESS", "error": 0, "result": hex::encode(header.encode()) })
                    .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "getsmartcodeevent" })))
            .with_body(
                json!({
                    "desc": "SUCCESS",
                    "error": 0,
                    "result": [{
                        "TxHash": "aa11",
                        "State": 1,
                        "Notify": [{
                            "ContractAddress": CROSS_CHAIN_MANAGER_CONTRACT,
                            "States": ["makeProof", 2, 6, "abc", 77, "0102"]
                        }]
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = PolyRpcClient::new(vec![server.url()]).unwrap();
        assert_eq!(client.header(77).await.unwrap(), header);
        let events = client.block_events(77).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tx_hash, "aa11");
        assert_eq!(events[0].height, 77);
        assert_eq!(events[0].states[0], json!("makeProof"));
    }

    #[tokio::test]
    async fn test_side_chain_height() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_body(
                json!({ "desc": "SUCCESS", "error": 0, "result": hex::encode(500u64.to_le_bytes()) })
                    .to_string(),
            )
            .create_async()
            .await;
        let client = PolyRpcClient::new(vec![server.url()]).unwrap();
        assert_eq!(client.side_chain_height(2).await.unwrap(), 500);
    }
}
