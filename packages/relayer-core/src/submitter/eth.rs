use async_trait::async_trait;
use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::U256;
use log::info;
use std::sync::Arc;

use super::Submitter;
use crate::{
    chains,
    codec::decode_hex,
    compose::PolyComposer,
    config::SubmitterConfig,
    node::{
        eth::{EthCrossChainData, EthRpcClient},
        wallet::RemoteWallet,
        CrossChainData, TxRequest, Wallet,
    },
    types::{Account, Tx, TxType},
    Error, Result,
};

const VERIFY_HEADER_AND_EXECUTE_TX: &str = "verifyHeaderAndExecuteTx";

/// Call data of `verifyHeaderAndExecuteTx(bytes,bytes,bytes,bytes,bytes)`.
pub fn pack_verify_header_and_execute_tx(
    audit_path: Vec<u8>,
    header: Vec<u8>,
    anchor_proof: Vec<u8>,
    anchor_header: Vec<u8>,
    sigs: Vec<u8>,
) -> Vec<u8> {
    let params = vec![ParamType::Bytes; 5];
    let mut data = abi::short_signature(VERIFY_HEADER_AND_EXECUTE_TX, &params).to_vec();
    data.extend(abi::encode(&[
        Token::Bytes(audit_path),
        Token::Bytes(header),
        Token::Bytes(anchor_proof),
        Token::Bytes(anchor_header),
        Token::Bytes(sigs),
    ]));
    data
}

/// Submitter for EVM chains: delivers through the cross chain manager and
/// reads epoch state and relayed records from the cross chain data contract.
pub struct EthSubmitter {
    chain_id: u64,
    name: String,
    ccm: String,
    ccd: Arc<dyn CrossChainData>,
    wallet: Arc<dyn Wallet>,
    accounts: Vec<Account>,
    gas_limit: u64,
}

impl EthSubmitter {
    pub fn new(
        config: &SubmitterConfig,
        ccd: Arc<dyn CrossChainData>,
        wallet: Arc<dyn Wallet>,
        accounts: Vec<Account>,
    ) -> Self {
        Self {
            chain_id: config.chain_id,
            name: chains::chain_name(config.chain_id),
            ccm: config.ccm_contract.clone(),
            ccd,
            wallet,
            accounts,
            gas_limit: config.gas_limit,
        }
    }

    /// Connects to the chain and the wallet and loads the managed accounts.
    pub async fn init(config: &SubmitterConfig) -> Result<Self> {
        let client = Arc::new(EthRpcClient::new(config.nodes.clone())?);
        let ccd = Arc::new(EthCrossChainData::new(client, config.ccd_contract.clone()));
        let wallet_config = config.wallet.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "No wallet configured for {} submitter",
                chains::chain_name(config.chain_id)
            ))
        })?;
        let wallet = Arc::new(RemoteWallet::new(wallet_config.nodes.clone())?);
        let accounts = wallet.accounts().await?;
        Ok(Self::new(config, ccd, wallet, accounts))
    }

    async fn process_poly_tx(&self, tx: &mut Tx) -> Result<()> {
        let tx_id = tx.tx_id_bytes32()?;
        if self
            .ccd
            .check_if_from_chain_tx_exist(tx.src_chain_id, tx_id)
            .await?
        {
            info!(
                "ProcessPolyTx dst tx already relayed, tx id occupied, chain {}, txid {}",
                self.name, tx.tx_id
            );
            return Ok(());
        }

        let proof = decode_hex(&tx.anchor_proof).map_err(|e| {
            Error::InvalidTx(format!("{} processPolyTx decode anchor proof: {}", self.name, e))
        })?;
        let path = decode_hex(&tx.audit_path).map_err(|e| {
            Error::InvalidTx(format!("{} failed to decode audit path: {}", self.name, e))
        })?;
        let header = tx
            .poly_header
            .as_ref()
            .map(|h| h.message.clone())
            .ok_or_else(|| Error::InvalidTx(format!("{} poly tx {} has no header", self.name, tx.poly_hash)))?;
        let anchor = tx
            .anchor_header
            .as_ref()
            .map(|h| h.message.clone())
            .unwrap_or_default();

        tx.dst_data = pack_verify_header_and_execute_tx(path, header, proof, anchor, tx.poly_sigs.clone());
        if tx.dst_gas_limit == 0 {
            tx.dst_gas_limit = self.gas_limit;
        }
        self.send(tx).await
    }

    async fn send(&self, tx: &mut Tx) -> Result<()> {
        if tx.dst_data.is_empty() {
            return Ok(());
        }
        let gas_price = if tx.dst_gas_price.is_empty() {
            None
        } else {
            Some(U256::from_dec_str(&tx.dst_gas_price).map_err(|_| {
                Error::InvalidTx(format!("{} submit invalid gas price {}", self.name, tx.dst_gas_price))
            })?)
        };
        let gas_price_x = if tx.dst_gas_price_x.is_empty() {
            None
        } else {
            Some(tx.dst_gas_price_x.parse::<f64>().map_err(|_| {
                Error::InvalidTx(format!("{} submit invalid gas priceX {}", self.name, tx.dst_gas_price_x))
            })?)
        };
        let request = TxRequest {
            to: self.ccm.clone(),
            value: U256::zero(),
            gas_limit: tx.dst_gas_limit,
            gas_price,
            gas_price_x,
            data: tx.dst_data.clone(),
        };
        tx.dst_hash = match &tx.dst_sender {
            Some(account) => self.wallet.send_with_account(account, &request).await?,
            None => self.wallet.send(&request).await?,
        };
        Ok(())
    }
}

#[async_trait]
impl Submitter for EthSubmitter {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn accounts(&self) -> Vec<Account> {
        self.accounts.clone()
    }

    async fn poly_epoch_start_height(&self) -> Result<u32> {
        self.ccd.cur_epoch_start_height().await
    }

    async fn poly_keepers(&self) -> Result<Vec<u8>> {
        self.ccd.cur_epoch_con_pub_key_bytes().await
    }

    async fn process_tx(&self, tx: &mut Tx, compose: &dyn PolyComposer) -> Result<()> {
        if tx.message_type() != TxType::Poly {
            return Err(Error::InvalidTx(format!(
                "{} desired message is not poly tx {:?}",
                self.name,
                tx.message_type()
            )));
        }
        if tx.dst_chain_id != self.chain_id {
            return Err(Error::InvalidTx(format!(
                "{} message dst chain does not match {}",
                self.name, tx.dst_chain_id
            )));
        }
        tx.dst_poly_epoch_start_height = self.poly_epoch_start_height().await.map_err(|e| {
            Error::Chain(format!("{} fetch dst chain poly epoch height error {}", self.name, e))
        })?;
        tx.dst_poly_keepers = self.poly_keepers().await.map_err(|e| {
            Error::Chain(format!("{} fetch dst chain poly keepers error {}", self.name, e))
        })?;
        compose.compose(tx).await?;
        self.process_poly_tx(tx).await
    }
}
