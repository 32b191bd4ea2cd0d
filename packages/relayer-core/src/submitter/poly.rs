use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use crate::{
    codec::{decode_hex, Sink},
    config::PolyChainConfig,
    node::{
        poly::{CROSS_CHAIN_MANAGER_CONTRACT, HEADER_SYNC_CONTRACT},
        wallet::RemoteWallet,
        Wallet,
    },
    types::{Account, Tx},
    Error, Result,
};

pub const SYNC_BLOCK_HEADER: &str = "syncBlockHeader";
pub const IMPORT_OUTER_TRANSFER: &str = "importOuterTransfer";

/// Writes to the relay chain on behalf of source chains.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelaySubmitter: Send + Sync {
    /// Syncs a batch of serialized source chain headers.
    async fn submit_headers(&self, chain_id: u64, headers: Vec<Vec<u8>>) -> Result<String>;

    /// Commits a composed source tx; sets `poly_hash` on success.
    async fn commit_src_tx(&self, tx: &mut Tx) -> Result<()>;
}

/// Native contract call as accepted by the relay chain wallet.
pub fn native_invocation(contract: &str, method: &str, args: &[u8]) -> Result<Vec<u8>> {
    let address = decode_hex(contract)
        .map_err(|e| Error::Config(format!("Invalid native contract {}: {}", contract, e)))?;
    let mut sink = Sink::new();
    sink.write_u8(0)
        .write_var_bytes(&address)
        .write_var_string(method)
        .write_var_bytes(args);
    Ok(sink.into_bytes())
}

pub struct PolySubmitter {
    wallet: Arc<dyn Wallet>,
    account: Account,
    address: Vec<u8>,
}

impl PolySubmitter {
    pub fn new(wallet: Arc<dyn Wallet>, account: Account) -> Result<Self> {
        let address = decode_hex(&account.address)
            .ok()
            .filter(|a| a.len() == 20)
            .ok_or_else(|| {
                Error::Config(format!("Invalid poly relayer address {}", account.address))
            })?;
        Ok(Self {
            wallet,
            account,
            address,
        })
    }

    /// Uses the first account of the relay chain wallet as relayer.
    pub async fn init(config: &PolyChainConfig) -> Result<Self> {
        let wallet_config = config
            .wallet
            .as_ref()
            .ok_or_else(|| Error::Config("No wallet configured for poly".to_string()))?;
        let wallet = Arc::new(RemoteWallet::new(wallet_config.nodes.clone())?);
        let account = wallet
            .accounts()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Config("No account in poly wallet".to_string()))?;
        Self::new(wallet, account)
    }

    pub fn sync_block_header_args(&self, chain_id: u64, headers: &[Vec<u8>]) -> Vec<u8> {
        let mut sink = Sink::new();
        sink.write_var_uint(chain_id)
            .write_bytes(&self.address)
            .write_var_uint(headers.len() as u64);
        for header in headers {
            sink.write_var_bytes(header);
        }
        sink.into_bytes()
    }

    pub fn import_outer_transfer_args(&self, tx: &Tx) -> Result<Vec<u8>> {
        if tx.src_proof.is_empty() || tx.src_event.is_empty() {
            return Err(Error::InvalidTx(format!(
                "src tx {} is not composed",
                tx.src_hash
            )));
        }
        let height = u32::try_from(tx.src_proof_height).map_err(|_| {
            Error::InvalidTx(format!("src proof height {} out of range", tx.src_proof_height))
        })?;
        let mut sink = Sink::new();
        sink.write_var_uint(tx.src_chain_id)
            .write_var_uint(height as u64)
            .write_var_bytes(&tx.src_proof)
            .write_var_bytes(&self.address)
            .write_var_bytes(&tx.src_event)
            .write_var_bytes(&[]);
        Ok(sink.into_bytes())
    }
}

#[async_trait]
impl RelaySubmitter for PolySubmitter {
    async fn submit_headers(&self, chain_id: u64, headers: Vec<Vec<u8>>) -> Result<String> {
        let args = self.sync_block_header_args(chain_id, &headers);
        let invocation = native_invocation(HEADER_SYNC_CONTRACT, SYNC_BLOCK_HEADER, &args)?;
        let hash = self
            .wallet
            .invoke(&invocation, Some(self.account.clone()))
            .await?;
        info!(
            "Submitted {} headers of chain {} to poly, hash {}",
            headers.len(),
            chain_id,
            hash
        );
        Ok(hash)
    }

    async fn commit_src_tx(&self, tx: &mut Tx) -> Result<()> {
        let args = self.import_outer_transfer_args(tx)?;
        let invocation = native_invocation(CROSS_CHAIN_MANAGER_CONTRACT, IMPORT_OUTER_TRANSFER, &args)?;
        tx.poly_hash = self
            .wallet
            .invoke(&invocation, Some(self.account.clone()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Source;
    use crate::node::MockWallet;

    const RELAYER: &str = "0x1111111111111111111111111111111111111111";

    fn composed_tx() -> Tx {
        Tx {
            src_hash: "0xfeed".to_string(),
            src_chain_id: 2,
            src_proof_height: 1000,
            src_proof: b"{}".to_vec(),
            src_event: vec![9, 9],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_commit_src_tx() {
        let mut wallet = MockWallet::new();
        wallet
            .expect_invoke()
            .withf(|script, account| {
                let mut source = Source::new(script);
                source.read_u8().unwrap();
                let contract = source.read_var_bytes().unwrap().to_vec();
                let method = source.read_var_string().unwrap();
                contract == hex::decode(CROSS_CHAIN_MANAGER_CONTRACT).unwrap()
                    && method == IMPORT_OUTER_TRANSFER
                    && account.as_ref().map(|a| a.address.as_str()) == Some(RELAYER)
            })
            .times(1)
            .returning(|_, _| Ok("polyhash".to_string()));
        let submitter = PolySubmitter::new(Arc::new(wallet), Account::new(RELAYER)).unwrap();

        let mut tx = composed_tx();
        submitter.commit_src_tx(&mut tx).await.unwrap();
        assert_eq!(tx.poly_hash, "polyhash");

        let args = submitter.import_outer_transfer_args(&composed_tx()).unwrap();
        let mut source = Source::new(&args);
        assert_eq!(source.read_var_uint().unwrap(), 2);
        assert_eq!(source.read_var_uint().unwrap(), 1000);
        assert_eq!(source.read_var_bytes().unwrap(), b"{}");
        assert_eq!(source.read_var_bytes().unwrap(), [0x11; 20]);
        assert_eq!(source.read_var_bytes().unwrap(), [9, 9]);
    }

    #[tokio::test]
    async fn test_uncomposed_tx_is_invalid() {
        let mut wallet = MockWallet::new();
        wallet.expect_invoke().times(0);
        let submitter = PolySubmitter::new(Arc::new(wallet), Account::new(RELAYER)).unwrap();
        let mut tx = Tx {
            src_proof: vec![],
            ..composed_tx()
        };
        assert!(submitter.commit_src_tx(&mut tx).await.unwrap_err().is_invalid_tx());
    }

    #[test]
    fn test_sync_block_header_args() {
        let submitter =
            PolySubmitter::new(Arc::new(MockWallet::new()), Account::new(RELAYER)).unwrap();
        let args = submitter.sync_block_header_args(12, &[vec![1, 2], vec![3]]);
        let mut source = Source::new(&args);
        assert_eq!(source.read_var_uint().unwrap(), 12);
        assert_eq!(source.read_bytes(20).unwrap(), [0x11; 20]);
        assert_eq!(source.read_var_uint().unwrap(), 2);
        assert_eq!(source.read_var_bytes().unwrap(), [1, 2]);
        assert_eq!(source.read_var_bytes().unwrap(), [3]);
        assert!(PolySubmitter::new(Arc::new(MockWallet::new()), Account::new("0x12")).is_err());
    }
}
