use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::rpc::RpcClient;
use super::TendermintNode;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TmHeader {
    pub chain_id: String,
    pub height: u64,
    pub time: String,
    pub last_block_id: String,
    pub validators_hash: Vec<u8>,
    pub next_validators_hash: Vec<u8>,
    pub app_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CommitSig {
    pub block_id_flag: u8,
    pub validator_address: Vec<u8>,
    pub timestamp: String,
    /// Base64 as served by the node.
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Commit {
    pub height: u64,
    pub round: u32,
    pub block_id: String,
    pub signatures: Vec<CommitSig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CommitResult {
    pub header: TmHeader,
    pub commit: Commit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Validator {
    pub address: Vec<u8>,
    pub pub_key_type: String,
    /// Base64 as served by the node.
    pub pub_key: String,
    pub voting_power: i64,
}

/// Tendermint RPC over JSON-RPC.
pub struct TendermintRpcClient {
    rpc: RpcClient,
}

fn str_field<'a>(v: &'a Value, path: &[&str]) -> Result<&'a str> {
    let mut cur = v;
    for key in path {
        cur = cur
            .get(key)
            .ok_or_else(|| Error::Serialization(format!("missing field {}", path.join("."))))?;
    }
    cur.as_str()
        .ok_or_else(|| Error::Serialization(format!("field {} is not a string", path.join("."))))
}

fn num_field<T: std::str::FromStr>(v: &Value, path: &[&str]) -> Result<T> {
    match path.iter().try_fold(v, |cur, key| cur.get(key)) {
        Some(Value::Number(n)) => n
            .to_string()
            .parse()
            .map_err(|_| Error::Serialization(format!("field {} out of range", path.join(".")))),
        _ => str_field(v, path)?
            .parse()
            .map_err(|_| Error::Serialization(format!("field {} is not a number", path.join(".")))),
    }
}

fn hex_field(v: &Value, path: &[&str]) -> Result<Vec<u8>> {
    hex::decode(str_field(v, path)?).map_err(|e| Error::Serialization(e.to_string()))
}

impl TendermintRpcClient {
    pub fn new(nodes: Vec<String>) -> Result<Self> {
        Ok(Self {
            rpc: RpcClient::new(nodes)?,
        })
    }

    fn parse_commit(result: &Value) -> Result<CommitResult> {
        let header = result
            .get("signed_header")
            .and_then(|h| h.get("header"))
            .ok_or_else(|| Error::Serialization("commit missing header".to_string()))?;
        let commit = result
            .get("signed_header")
            .and_then(|h| h.get("commit"))
            .ok_or_else(|| Error::Serialization("commit missing commit".to_string()))?;

        let signatures = commit
            .get("signatures")
            .and_then(|s| s.as_array())
            .into_iter()
            .flatten()
            .map(|sig| {
                Ok(CommitSig {
                    block_id_flag: num_field(sig, &["block_id_flag"])?,
                    validator_address: hex_field(sig, &["validator_address"]).unwrap_or_default(),
                    timestamp: str_field(sig, &["timestamp"]).unwrap_or_default().to_string(),
                    signature: str_field(sig, &["signature"]).unwrap_or_default().to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CommitResult {
            header: TmHeader {
                chain_id: str_field(header, &["chain_id"])?.to_string(),
                height: num_field(header, &["height"])?,
                time: str_field(header, &["time"])?.to_string(),
                last_block_id: str_field(header, &["last_block_id", "hash"])
                    .unwrap_or_default()
                    .to_string(),
                validators_hash: hex_field(header, &["validators_hash"])?,
                next_validators_hash: hex_field(header, &["next_validators_hash"])?,
                app_hash: hex_field(header, &["app_hash"])?,
            },
            commit: Commit {
                height: num_field(commit, &["height"])?,
                round: num_field(commit, &["round"])?,
                block_id: str_field(commit, &["block_id", "hash"])?.to_string(),
                signatures,
            },
        })
    }
}

#[async_trait]
impl TendermintNode for TendermintRpcClient {
    async fn commit(&self, height: u64) -> Result<CommitResult> {
        let result: Value = self
            .rpc
            .call("commit", json!({ "height": height.to_string() }))
            .await?;
        Self::parse_commit(&result)
    }

    async fn validators(&self, height: u64) -> Result<Vec<Validator>> {
        let mut validators = Vec::new();
        let mut page = 1u32;
        loop {
            let result: Value = self
                .rpc
                .call(
                    "validators",
                    json!({ "height": height.to_string(), "page": page.to_string(), "per_page": "100" }),
                )
                .await?;
            let batch = result
                .get("validators")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            for v in &batch {
                validators.push(Validator {
                    address: hex_field(v, &["address"])?,
                    pub_key_type: str_field(v, &["pub_key", "type"])?.to_string(),
                    pub_key: str_field(v, &["pub_key", "value"])?.to_string(),
                    voting_power: num_field(v, &["voting_power"])?,
                });
            }
            let total: usize = num_field(&result, &["total"]).unwrap_or(validators.len());
            if batch.is_empty() || validators.len() >= total {
                return Ok(validators);
            }
            page += 1;
        }
    }
}
