use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::Listener;
use crate::{
    config::ListenerConfig,
    node::{poly::CROSS_CHAIN_MANAGER_CONTRACT, PolyEvent, PolyNode},
    types::{Tx, TxType},
    Error, Result,
};

const MAKE_PROOF: &str = "makeProof";

/// Relay chain listener: turns `makeProof` notifications of the cross chain
/// manager into `POLY` txs for their destination chains.
pub struct PolyListener {
    config: ListenerConfig,
    node: Arc<dyn PolyNode>,
}

fn state_str(states: &[Value], index: usize) -> Option<String> {
    match states.get(index)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn state_u64(states: &[Value], index: usize) -> Option<u64> {
    match states.get(index)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn poly_height(height: u64) -> Result<u32> {
    u32::try_from(height).map_err(|_| Error::Chain(format!("Poly height {} out of range", height)))
}

impl PolyListener {
    pub fn new(config: ListenerConfig, node: Arc<dyn PolyNode>) -> Self {
        Self { config, node }
    }

    /// Layout of the notification states:
    /// `[method, from chain, to chain, source tx hash, source height, state key]`.
    fn event_tx(ev: &PolyEvent) -> Option<Tx> {
        if !ev.contract.eq_ignore_ascii_case(CROSS_CHAIN_MANAGER_CONTRACT) {
            return None;
        }
        if state_str(&ev.states, 0).as_deref() != Some(MAKE_PROOF) {
            return None;
        }
        let src_hash = state_str(&ev.states, 3)?;
        Some(Tx {
            tx_type: TxType::Poly,
            tx_id: format!("0x{}", src_hash.trim_start_matches("0x")),
            src_hash,
            src_chain_id: state_u64(&ev.states, 1)?,
            src_height: state_u64(&ev.states, 4).unwrap_or_default(),
            dst_chain_id: state_u64(&ev.states, 2)?,
            poly_hash: ev.tx_hash.clone(),
            poly_height: ev.height,
            poly_key: state_str(&ev.states, 5)?,
            ..Default::default()
        })
    }
}

#[async_trait]
impl Listener for PolyListener {
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
        Ok(self.node.latest_height().await? as u64)
    }

    async fn header(&self, height: u64) -> Result<(Vec<u8>, Vec<u8>)> {
        let header = self.node.header(poly_height(height)?).await?;
        Ok((header.encode(), Vec::new()))
    }

    async fn last_header_sync(&self, force: u64, last: u64) -> Result<u64> {
        Ok(if force != 0 { force } else { last })
    }

    async fn scan(&self, height: u64) -> Result<Vec<Tx>> {
        let events = self.node.block_events(poly_height(height)?).await?;
        Ok(events.iter().filter_map(Self::event_tx).collect())
    }

    async fn scan_tx(&self, hash: &str) -> Result<Tx> {
        let events = self.node.tx_events(hash).await?;
        events
            .iter()
            .find_map(Self::event_tx)
            .ok_or_else(|| Error::Chain(format!("No makeProof event found in poly tx {}", hash)))
    }

    async fn compose(&self, tx: &mut Tx) -> Result<()> {
        if tx.poly_height == 0 || tx.poly_key.is_empty() {
            return Err(Error::InvalidTx(format!(
                "poly tx {} missing height or key",
                tx.poly_hash
            )));
        }
        Ok(())
    }
}
