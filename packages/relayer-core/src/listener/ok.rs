use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::{EthListener, Listener};
use crate::{
    codec::Source,
    node::{
        tendermint::{Commit, TmHeader},
        TendermintNode, Validator,
    },
    types::Tx,
    Error, Result,
};

/// Header object the relay chain's BFT header sync contract accepts.
#[derive(Debug, Serialize)]
pub struct BftHeader {
    pub header: TmHeader,
    pub commit: Commit,
    pub valsets: Vec<Validator>,
}

/// Epoch switch record the relay chain keeps for a BFT side chain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EpochSwitchInfo {
    pub height: u64,
    pub block_hash: Vec<u8>,
    pub next_validators_hash: Vec<u8>,
    pub chain_id: String,
}

impl EpochSwitchInfo {
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut source = Source::new(raw);
        Ok(Self {
            height: source.read_u64()?,
            block_hash: source.read_var_bytes()?.to_vec(),
            next_validators_hash: source.read_var_bytes()?.to_vec(),
            chain_id: source.read_var_string()?,
        })
    }
}

/// EVM execution layer with a tendermint consensus layer. Only headers that
/// switch the validator set are synced.
pub struct OkListener {
    eth: EthListener,
    tm: Arc<dyn TendermintNode>,
}

impl OkListener {
    pub fn new(eth: EthListener, tm: Arc<dyn TendermintNode>) -> Self {
        Self { eth, tm }
    }
}

#[async_trait]
impl Listener for OkListener {
    fn chain_id(&self) -> u64 {
        self.eth.chain_id()
    }

    fn defer(&self) -> u64 {
        self.eth.defer()
    }

    fn listen_check(&self) -> Duration {
        self.eth.listen_check()
    }

    async fn latest_height(&self) -> Result<u64> {
        self.eth.latest_height().await
    }

    async fn header(&self, height: u64) -> Result<(Vec<u8>, Vec<u8>)> {
        let cr = self
            .tm
            .commit(height)
            .await
            .map_err(|e| Error::Chain(format!("OKex query commit result height {} error {}", height, e)))?;
        if cr.header.validators_hash == cr.header.next_validators_hash {
            return Ok((Vec::new(), Vec::new()));
        }
        let valsets = self
            .tm
            .validators(height)
            .await
            .map_err(|e| Error::Chain(format!("OKex get validators height {} error {}", height, e)))?;
        let header = BftHeader {
            header: cr.header,
            commit: cr.commit,
            valsets,
        };
        let raw = bcs::to_bytes(&header).map_err(|e| {
            Error::Serialization(format!("OKex header marshal height {}: {}", height, e))
        })?;
        Ok((raw, Vec::new()))
    }

    async fn last_header_sync(&self, force: u64, last: u64) -> Result<u64> {
        if force != 0 {
            return Ok(force);
        }
        let raw = self.eth.poly().side_chain_epoch(self.chain_id()).await?;
        if raw.is_empty() {
            return Err(Error::Chain(format!(
                "No epoch switch info recorded for chain {}",
                self.chain_id()
            )));
        }
        let info = EpochSwitchInfo::decode(&raw)?;
        Ok(info.height.max(last))
    }

    async fn scan(&self, height: u64) -> Result<Vec<Tx>> {
        self.eth.scan(height).await
    }

    async fn scan_tx(&self, hash: &str) -> Result<Tx> {
        self.eth.scan_tx(hash).await
    }

    async fn compose(&self, tx: &mut Tx) -> Result<()> {
        self.eth.compose(tx).await
    }
}
