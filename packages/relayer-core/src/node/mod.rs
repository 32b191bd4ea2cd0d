//! Capabilities the relay engine consumes from chain nodes and wallets.

use async_trait::async_trait;
use ethers_core::types::U256;
use serde_json::Value;

use crate::{
    types::{Account, PolyHeader},
    Result,
};

pub mod eth;
pub mod neo;
pub mod poly;
pub mod rpc;
pub mod tendermint;
pub mod wallet;

pub use tendermint::{CommitResult, Validator};

/// A cross chain manager event found on an EVM chain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CrossChainEvent {
    pub tx_hash: String,
    pub height: u64,
    /// Cross chain index assigned by the manager contract.
    pub tx_id: Vec<u8>,
    pub to_chain_id: u64,
    pub to_contract: Vec<u8>,
    /// Serialized `MakeTxParam`.
    pub raw_data: Vec<u8>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvmNode: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    async fn header_by_number(&self, height: u64) -> Result<Value>;

    async fn cross_chain_events(&self, ccm: &str, height: u64) -> Result<Vec<CrossChainEvent>>;

    async fn tx_cross_chain_events(&self, ccm: &str, tx_hash: &str)
        -> Result<Vec<CrossChainEvent>>;

    /// JSON encoded `eth_getProof` result for one storage key.
    async fn storage_proof(&self, contract: &str, key: &str, height: u64) -> Result<Vec<u8>>;
}

/// The relay chain state a destination chain trusts, and its record of
/// already executed messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CrossChainData: Send + Sync {
    async fn check_if_from_chain_tx_exist(&self, src_chain_id: u64, tx_id: [u8; 32])
        -> Result<bool>;

    async fn cur_epoch_start_height(&self) -> Result<u32>;

    async fn cur_epoch_con_pub_key_bytes(&self) -> Result<Vec<u8>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TendermintNode: Send + Sync {
    async fn commit(&self, height: u64) -> Result<CommitResult>;

    async fn validators(&self, height: u64) -> Result<Vec<Validator>>;
}

/// A contract notification recorded by the relay chain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolyEvent {
    pub tx_hash: String,
    pub height: u32,
    pub contract: String,
    pub states: Vec<Value>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PolyNode: Send + Sync {
    async fn latest_height(&self) -> Result<u32>;

    async fn header(&self, height: u32) -> Result<PolyHeader>;

    /// Audit path (hex) of a cross chain state under the root of `height`.
    async fn cross_states_proof(&self, height: u32, key: &str) -> Result<String>;

    /// Audit path (hex) of the block at `height` under the block root of
    /// `root_height`.
    async fn merkle_proof(&self, height: u32, root_height: u32) -> Result<String>;

    /// Latest header height of a side chain synced to the relay chain.
    async fn side_chain_height(&self, chain_id: u64) -> Result<u64>;

    /// Serialized epoch switch info of a BFT side chain.
    async fn side_chain_epoch(&self, chain_id: u64) -> Result<Vec<u8>>;

    async fn block_events(&self, height: u32) -> Result<Vec<PolyEvent>>;

    async fn tx_events(&self, hash: &str) -> Result<Vec<PolyEvent>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NeoNode: Send + Sync {
    async fn poly_epoch_height(&self, ccm: &str, poly_id: u64) -> Result<u64>;

    async fn from_chain_tx_exist(&self, ccm: &str, src_chain_id: u64, tx_id: Vec<u8>)
        -> Result<bool>;
}

/// A call handed to the wallet for signing and broadcast.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TxRequest {
    pub to: String,
    pub value: U256,
    /// Zero lets the wallet estimate.
    pub gas_limit: u64,
    pub gas_price: Option<U256>,
    /// Multiplier applied to the node suggested gas price.
    pub gas_price_x: Option<f64>,
    pub data: Vec<u8>,
}

/// Key custody, signing and broadcast. Implementations serialize nonce
/// allocation per account.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn accounts(&self) -> Result<Vec<Account>>;

    async fn send(&self, request: &TxRequest) -> Result<String>;

    async fn send_with_account(&self, account: &Account, request: &TxRequest) -> Result<String>;

    async fn invoke(&self, script: &[u8], account: Option<Account>) -> Result<String>;
}
