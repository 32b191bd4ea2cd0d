use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::rpc::RpcClient;
use super::{TxRequest, Wallet};
use crate::{types::Account, Error, Result};

/// Wallet backed by a remote signer that holds the keys. Sends through the
/// same account are serialized here so nonces are allocated in order.
/// Broadcasts are sent once; the delivery worker owns retries.
pub struct RemoteWallet {
    rpc: RpcClient,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RemoteWallet {
    pub fn new(nodes: Vec<String>) -> Result<Self> {
        Ok(Self {
            rpc: RpcClient::new(nodes)?,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn account_lock(&self, account: &Account) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::Chain("wallet account locks poisoned".to_string()))?;
        Ok(locks
            .entry(account.address.to_lowercase())
            .or_default()
            .clone())
    }

    fn request_json(request: &TxRequest) -> Value {
        json!({
            "to": request.to,
            "value": request.value.to_string(),
            "gasLimit": request.gas_limit,
            "gasPrice": request.gas_price.map(|p| p.to_string()),
            "gasPriceX": request.gas_price_x,
            "data": format!("0x{}", hex::encode(&request.data)),
        })
    }
}

#[async_trait]
impl Wallet for RemoteWallet {
    async fn accounts(&self) -> Result<Vec<Account>> {
        let addresses: Vec<String> = self.rpc.call("wallet_accounts", json!([])).await?;
        Ok(addresses.into_iter().map(Account::new).collect())
    }

    async fn send(&self, request: &TxRequest) -> Result<String> {
        self.rpc
            .call_once("wallet_send", json!([Self::request_json(request)]))
            .await
    }

    async fn send_with_account(&self, account: &Account, request: &TxRequest) -> Result<String> {
        let lock = self.account_lock(account)?;
        let _guard = lock.lock().await;
        self.rpc
            .call_once(
                "wallet_sendWithAccount",
                json!([account.address, Self::request_json(request)]),
            )
            .await
    }

    async fn invoke(&self, script: &[u8], account: Option<Account>) -> Result<String> {
        let params = json!([hex::encode(script), account.as_ref().map(|a| a.address.clone())]);
        match &account {
            Some(account) => {
                let lock = self.account_lock(account)?;
                let _guard = lock.lock().await;
                self.rpc.call_once("wallet_invoke", params).await
            }
            None => self.rpc.call_once("wallet_invoke", params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::U256;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_remote_wallet() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "wallet_accounts" })))
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":["0xaa","0xbb"]}"#)
            .create_async()
            .await;
        let send = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({ "method": "wallet_sendWithAccount" })),
                Matcher::Regex(r#""0xaa""#.to_string()),
                Matcher::Regex(r#""data":"0x0102""#.to_string()),
            ]))
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0xhash"}"#)
            .create_async()
            .await;

        let wallet = RemoteWallet::new(vec![server.url()]).unwrap();
        let accounts = wallet.accounts().await.unwrap();
        assert_eq!(accounts, vec![Account::new("0xaa"), Account::new("0xbb")]);

        let request = TxRequest {
            to: "0xcc".to_string(),
            value: U256::zero(),
            data: vec![1, 2],
            ..Default::default()
        };
        let hash = wallet.send_with_account(&accounts[0], &request).await.unwrap();
        assert_eq!(hash, "0xhash");
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_broadcast_is_not_resent() {
        let mut server = mockito::Server::new_async().await;
        let send = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "wallet_send" })))
            .with_status(502)
            .with_body("bad gateway")
            .expect(1)
            .create_async()
            .await;
        let invoke = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "wallet_invoke" })))
            .with_status(502)
            .with_body("bad gateway")
            .expect(1)
            .create_async()
            .await;

        let wallet = RemoteWallet::new(vec![server.url()]).unwrap();
        let request = TxRequest {
            to: "0xcc".to_string(),
            value: U256::zero(),
            data: vec![1],
            ..Default::default()
        };
        assert!(wallet.send(&request).await.is_err());
        assert!(wallet
            .invoke(&[1, 2], Some(Account::new("0xaa")))
            .await
            .is_err());
        send.assert_async().await;
        invoke.assert_async().await;
    }
}
