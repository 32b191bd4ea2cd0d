use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

use crate::{Error, Result};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 200;

/// JSON-RPC client over a set of interchangeable endpoints. Transport
/// failures rotate to the next endpoint; errors reported by a node are
/// returned as is.
pub struct RpcClient {
    http: reqwest::Client,
    nodes: Vec<String>,
    next: AtomicUsize,
}

impl RpcClient {
    pub fn new(nodes: Vec<String>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::Config("No rpc nodes provided".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            nodes,
            next: AtomicUsize::new(0),
        })
    }

    fn node(&self) -> &str {
        let i = self.next.load(Ordering::Relaxed) % self.nodes.len();
        &self.nodes[i]
    }

    fn rotate(&self) {
        self.next.fetch_add(1, Ordering::Relaxed);
    }

    async fn post(&self, body: &Value) -> Result<Value> {
        let response = self.http.post(self.node()).json(body).send().await?;
        Ok(response.json().await?)
    }

    fn request(method: &str, params: Value) -> Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        })
    }

    /// Read call: transport failures rotate nodes and retry.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let body = Self::request(method, params);

        let mut retries = 0;
        let reply = loop {
            match self.post(&body).await {
                Ok(reply) => break reply,
                Err(e) => {
                    retries += 1;
                    self.rotate();
                    if retries >= MAX_RETRIES {
                        return Err(e);
                    }
                    log::warn!("Rpc {} failed on attempt {}: {}", method, retries, e);
                    sleep(Duration::from_millis(RETRY_DELAY_MS * 2u64.pow(retries))).await;
                }
            }
        };
        Self::result(method, reply)
    }

    /// Single attempt for calls that must not be replayed, such as
    /// broadcasts. A transport failure still rotates to the next node for
    /// later calls.
    pub async fn call_once<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let body = Self::request(method, params);
        let reply = self.post(&body).await.map_err(|e| {
            self.rotate();
            e
        })?;
        Self::result(method, reply)
    }

    fn result<T: DeserializeOwned>(method: &str, reply: Value) -> Result<T> {
        match reply.get("error") {
            None | Some(Value::Null) => {}
            // relay chain nodes report success as a zero error code
            Some(Value::Number(code)) if code.as_i64() == Some(0) => {}
            Some(err) => {
                let desc = reply
                    .get("desc")
                    .and_then(|d| d.as_str())
                    .map(|d| format!(" {}", d))
                    .unwrap_or_default();
                return Err(Error::Chain(format!("Rpc {} failed: {}{}", method, err, desc)));
            }
        }
        let result = reply.get("result").cloned().unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| Error::Serialization(format!("Rpc {} bad result: {}", method, e)))
    }
}

/// Parses a `0x` prefixed hex quantity.
pub fn parse_quantity(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| Error::Serialization(format!("invalid quantity {}: {}", s, e)))
}
