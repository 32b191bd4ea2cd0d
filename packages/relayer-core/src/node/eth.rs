use async_trait::async_trait;
use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::U256;
use ethers_core::utils::keccak256;
use serde_json::{json, Value};
use std::sync::Arc;

use super::rpc::{parse_quantity, RpcClient};
use super::{CrossChainData, CrossChainEvent, EvmNode};
use crate::{codec::decode_hex, Error, Result};

const CROSS_CHAIN_EVENT: &str = "CrossChainEvent(address,bytes,address,uint64,bytes,bytes)";

pub fn cross_chain_event_topic() -> String {
    format!("0x{}", hex::encode(keccak256(CROSS_CHAIN_EVENT)))
}

pub struct EthRpcClient {
    rpc: RpcClient,
}

impl EthRpcClient {
    pub fn new(nodes: Vec<String>) -> Result<Self> {
        Ok(Self {
            rpc: RpcClient::new(nodes)?,
        })
    }

    pub async fn eth_call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>> {
        let result: String = self
            .rpc
            .call(
                "eth_call",
                json!([{ "to": to, "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await?;
        hex::decode(result.trim_start_matches("0x")).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn parse_log(log: &Value) -> Result<CrossChainEvent> {
        let field = |name: &str| {
            log.get(name)
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::Serialization(format!("log missing {}", name)))
        };
        let data = decode_hex(field("data")?)
            .map_err(|e| Error::Serialization(format!("log data: {}", e)))?;
        let tokens = abi::decode(
            &[
                ParamType::Bytes,
                ParamType::Address,
                ParamType::Uint(64),
                ParamType::Bytes,
                ParamType::Bytes,
            ],
            &data,
        )
        .map_err(|e| Error::Serialization(format!("decode cross chain event: {}", e)))?;

        let mut tokens = tokens.into_iter();
        let mut next = || {
            tokens
                .next()
                .ok_or_else(|| Error::Serialization("cross chain event too short".to_string()))
        };
        let tx_id = next()?.into_bytes().unwrap_or_default();
        next()?; // proxy or asset contract
        let to_chain_id = next()?.into_uint().unwrap_or_default().low_u64();
        let to_contract = next()?.into_bytes().unwrap_or_default();
        let raw_data = next()?.into_bytes().unwrap_or_default();

        Ok(CrossChainEvent {
            tx_hash: field("transactionHash")?.to_string(),
            height: parse_quantity(field("blockNumber")?)?,
            tx_id,
            to_chain_id,
            to_contract,
            raw_data,
        })
    }

    fn is_cross_chain_log(log: &Value, ccm: &str, topic: &str) -> bool {
        let address = log.get("address").and_then(|a| a.as_str()).unwrap_or_default();
        let topic0 = log
            .get("topics")
            .and_then(|t| t.get(0))
            .and_then(|t| t.as_str())
            .unwrap_or_default();
        address.eq_ignore_ascii_case(ccm) && topic0.eq_ignore_ascii_case(topic)
    }
}

#[async_trait]
impl EvmNode for EthRpcClient {
    async fn block_number(&self) -> Result<u64> {
        let height: String = self.rpc.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&height)
    }

    async fn header_by_number(&self, height: u64) -> Result<Value> {
        let header: Value = self
            .rpc
            .call("eth_getBlockByNumber", json!([format!("{:#x}", height), false]))
            .await?;
        if header.is_null() {
            return Err(Error::Chain(format!("Header not found at height {}", height)));
        }
        Ok(header)
    }

    async fn cross_chain_events(&self, ccm: &str, height: u64) -> Result<Vec<CrossChainEvent>> {
        let logs: Vec<Value> = self
            .rpc
            .call(
                "eth_getLogs",
                json!([{
                    "fromBlock": format!("{:#x}", height),
                    "toBlock": format!("{:#x}", height),
                    "address": ccm,
                    "topics": [cross_chain_event_topic()],
                }]),
            )
            .await?;
        logs.iter().map(Self::parse_log).collect()
    }

    async fn tx_cross_chain_events(&self, ccm: &str, tx_hash: &str) -> Result<Vec<CrossChainEvent>> {
        let receipt: Value = self
            .rpc
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if receipt.is_null() {
            return Err(Error::Chain(format!("Receipt not found for {}", tx_hash)));
        }
        let topic = cross_chain_event_topic();
        receipt
            .get("logs")
            .and_then(|l| l.as_array())
            .into_iter()
            .flatten()
            .filter(|log| Self::is_cross_chain_log(log, ccm, &topic))
            .map(Self::parse_log)
            .collect()
    }

    async fn storage_proof(&self, contract: &str, key: &str, height: u64) -> Result<Vec<u8>> {
        let proof: Value = self
            .rpc
            .call(
                "eth_getProof",
                json!([contract, [key], format!("{:#x}", height)]),
            )
            .await?;
        Ok(serde_json::to_vec(&proof)?)
    }
}

/// The cross chain data contract of an EVM destination chain.
pub struct EthCrossChainData {
    client: Arc<EthRpcClient>,
    ccd: String,
}

impl EthCrossChainData {
    pub fn new(client: Arc<EthRpcClient>, ccd: impl Into<String>) -> Self {
        Self {
            client,
            ccd: ccd.into(),
        }
    }

    async fn call(&self, method: &str, inputs: &[ParamType], args: &[Token], output: ParamType) -> Result<Token> {
        let mut data = abi::short_signature(method, inputs).to_vec();
        data.extend(abi::encode(args));
        let ret = self.client.eth_call(&self.ccd, &data).await?;
        abi::decode(&[output], &ret)
            .map_err(|e| Error::Chain(format!("{} returned undecodable data: {}", method, e)))?
            .pop()
            .ok_or_else(|| Error::Chain(format!("{} returned nothing", method)))
    }
}

#[async_trait]
impl CrossChainData for EthCrossChainData {
    async fn check_if_from_chain_tx_exist(&self, src_chain_id: u64, tx_id: [u8; 32]) -> Result<bool> {
        let ret = self
            .call(
                "checkIfFromChainTxExist",
                &[ParamType::Uint(64), ParamType::FixedBytes(32)],
                &[Token::Uint(U256::from(src_chain_id)), Token::FixedBytes(tx_id.to_vec())],
                ParamType::Bool,
            )
            .await?;
        Ok(ret.into_bool().unwrap_or_default())
    }

    async fn cur_epoch_start_height(&self) -> Result<u32> {
        let ret = self
            .call("getCurEpochStartHeight", &[], &[], ParamType::Uint(32))
            .await?;
        Ok(ret.into_uint().unwrap_or_default().low_u32())
    }

    async fn cur_epoch_con_pub_key_bytes(&self) -> Result<Vec<u8>> {
        let ret = self
            .call("getCurEpochConPubKeyBytes", &[], &[], ParamType::Bytes)
            .await?;
        Ok(ret.into_bytes().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::Address;
    use mockito::Matcher;

    const CCM: &str = "0x00000000000000000000000000000000000000cc";

    fn event_log() -> Value {
        let data = abi::encode(&[
            Token::Bytes(vec![0x0a, 0xbc]),
            Token::Address(Address::zero()),
            Token::Uint(U256::from(6u64)),
            Token::Bytes(vec![0x33; 20]),
            Token::Bytes(vec![1, 2, 3]),
        ]);
        json!({
            "address": CCM,
            "topics": [cross_chain_event_topic()],
            "data": format!("0x{}", hex::encode(data)),
            "blockNumber": "0x3e8",
            "transactionHash": "0xfeed",
        })
    }

    #[tokio::test]
    async fn test_cross_chain_events_decode() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "eth_getLogs" })))
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": [event_log()] }).to_string())
            .create_async()
            .await;

        let client = EthRpcClient::new(vec![server.url()]).unwrap();
        let events = client.cross_chain_events(CCM, 1000).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].height, 1000);
        assert_eq!(events[0].tx_id, vec![0x0a, 0xbc]);
        assert_eq!(events[0].to_chain_id, 6);
        assert_eq!(events[0].raw_data, vec![1, 2, 3]);
        assert_eq!(events[0].tx_hash, "0xfeed");
    }

    #[tokio::test]
    async fn test_receipt_filters_foreign_logs() {
        let mut foreign = event_log();
        foreign["address"] = json!("0x00000000000000000000000000000000000000dd");
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "eth_getTransactionReceipt" })))
            .with_body(
                json!({ "jsonrpc": "2.0", "id": 1, "result": { "logs": [foreign, event_log()] } })
                    .to_string(),
            )
            .create_async()
            .await;

        let client = EthRpcClient::new(vec![server.url()]).unwrap();
        let events = client.tx_cross_chain_events(CCM, "0xfeed").await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_cross_chain_data_calls() {
        let selector = hex::encode(abi::short_signature(
            "checkIfFromChainTxExist",
            &[ParamType::Uint(64), ParamType::FixedBytes(32)],
        ));
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::Regex(selector))
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": format!("0x{}", hex::encode(abi::encode(&[Token::Bool(true)]))),
                })
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(Matcher::Regex(hex::encode(abi::short_signature(
                "getCurEpochStartHeight",
                &[],
            ))))
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": format!("0x{}", hex::encode(abi::encode(&[Token::Uint(U256::from(88u64))]))),
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = Arc::new(EthRpcClient::new(vec![server.url()]).unwrap());
        let ccd = EthCrossChainData::new(client, "0x00000000000000000000000000000000000000cd");
        assert!(ccd.check_if_from_chain_tx_exist(2, [1u8; 32]).await.unwrap());
        assert_eq!(ccd.cur_epoch_start_height().await.unwrap(), 88);
    }
}
