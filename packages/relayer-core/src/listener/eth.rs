use async_trait::async_trait;
use ethers_core::utils::keccak256;
use log::debug;
use std::sync::Arc;
use std::time::Duration;

use super::{tx_id_hex, Listener};
use crate::{
    codec::decode_hex,
    config::ListenerConfig,
    node::{CrossChainEvent, EvmNode, PolyNode},
    types::{MakeTxParam, Tx, TxType},
    Error, Result,
};

/// Storage slot of the cross chain data contract's tx hash map.
const CROSS_CHAIN_TX_MAP_SLOT: u8 = 1;

/// Storage key of a cross chain index in the data contract:
/// `keccak256(pad32(id) ++ pad32(slot))`.
pub fn storage_key(cross_chain_id: &[u8]) -> Result<String> {
    if cross_chain_id.len() > 32 {
        return Err(Error::InvalidTx(format!(
            "cross chain id {} longer than 32 bytes",
            hex::encode(cross_chain_id)
        )));
    }
    let mut preimage = [0u8; 64];
    preimage[32 - cross_chain_id.len()..32].copy_from_slice(cross_chain_id);
    preimage[63] = CROSS_CHAIN_TX_MAP_SLOT;
    Ok(format!("0x{}", hex::encode(keccak256(preimage))))
}

pub struct EthListener {
    config: ListenerConfig,
    node: Arc<dyn EvmNode>,
    poly: Arc<dyn PolyNode>,
}

impl EthListener {
    pub fn new(config: ListenerConfig, node: Arc<dyn EvmNode>, poly: Arc<dyn PolyNode>) -> Self {
        Self { config, node, poly }
    }

    pub fn poly(&self) -> &Arc<dyn PolyNode> {
        &self.poly
    }

    fn event_tx(&self, ev: CrossChainEvent) -> Tx {
        Tx {
            tx_type: TxType::Src,
            tx_id: tx_id_hex(&ev.tx_id),
            src_hash: ev.tx_hash,
            src_chain_id: self.config.chain_id,
            src_height: ev.height,
            src_param: hex::encode(&ev.raw_data),
            dst_chain_id: ev.to_chain_id,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Listener for EthListener {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    fn defer(&self) -> u64 {
        self.config.defer
    }

    fn listen_check(&self) -> Duration {
        self.config.listen_check
    }

    async fn latest_height(&self) -> Result<u64> {
        self.node.block_number().await
    }

    async fn header(&self, height: u64) -> Result<(Vec<u8>, Vec<u8>)> {
        let header = self.node.header_by_number(height).await?;
        let hash = header
            .get("hash")
            .and_then(|h| h.as_str())
            .ok_or_else(|| Error::Chain(format!("Header at {} has no hash", height)))?;
        let hash = decode_hex(hash).map_err(|e| Error::Chain(e.to_string()))?;
        Ok((serde_json::to_vec(&header)?, hash))
    }

    async fn last_header_sync(&self, force: u64, last: u64) -> Result<u64> {
        if force != 0 {
            return Ok(force);
        }
        let height = self.poly.side_chain_height(self.config.chain_id).await?;
        Ok(height.max(last))
    }

    async fn scan(&self, height: u64) -> Result<Vec<Tx>> {
        let events = self
            .node
            .cross_chain_events(&self.config.ccm_contract, height)
            .await?;
        if !events.is_empty() {
            debug!(
                "Found {} cross chain events on chain {} at height {}",
                events.len(),
                self.config.chain_id,
                height
            );
        }
        Ok(events.into_iter().map(|ev| self.event_tx(ev)).collect())
    }

    async fn scan_tx(&self, hash: &str) -> Result<Tx> {
        let events = self
            .node
            .tx_cross_chain_events(&self.config.ccm_contract, hash)
            .await?;
        events
            .into_iter()
            .next()
            .map(|ev| self.event_tx(ev))
            .ok_or_else(|| Error::Chain(format!("No cross chain event found in tx {}", hash)))
    }

    async fn compose(&self, tx: &mut Tx) -> Result<()> {
        if tx.src_height == 0 || tx.tx_id.is_empty() {
            return Err(Error::InvalidTx(format!(
                "tx missing attributes src height {}, txid {:?}",
                tx.src_height, tx.tx_id
            )));
        }
        if tx.src_param.is_empty() {
            return Err(Error::InvalidTx("src param is missing".to_string()));
        }
        decode_hex(&tx.tx_id)?;
        let event = decode_hex(&tx.src_param)?;
        let param = MakeTxParam::decode(&event).map_err(|e| {
            Error::InvalidTx(format!(
                "chain {} failed to decode src param {}: {}",
                self.config.chain_id, tx.src_param, e
            ))
        })?;
        let key = storage_key(&param.cross_chain_id)?;
        let proof = self
            .node
            .storage_proof(&self.config.ccd_contract, &key, tx.src_height)
            .await?;

        tx.src_event = event;
        tx.param = Some(param);
        tx.src_proof_height = tx.src_height;
        tx.src_proof = proof;
        Ok(())
    }
}
