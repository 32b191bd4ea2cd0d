use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    chains::{self, ChainFamily},
    config::ListenerConfig,
    node::{eth::EthRpcClient, tendermint::TendermintRpcClient, PolyNode},
    types::Tx,
    Error, Result,
};

pub mod eth;
pub mod ok;
pub mod poly;

pub use eth::EthListener;
pub use ok::OkListener;
pub use poly::PolyListener;

/// Source side of a chain: block scanning, header export and proofs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Listener: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Blocks to stay behind the tip.
    fn defer(&self) -> u64;

    fn listen_check(&self) -> Duration;

    async fn latest_height(&self) -> Result<u64>;

    /// Serialized header at `height` for relay chain header sync, and its
    /// hash. An empty header means there is nothing to sync at this height.
    async fn header(&self, height: u64) -> Result<(Vec<u8>, Vec<u8>)>;

    /// Height header sync resumes from. A non-zero `force` wins, otherwise
    /// the relay chain's record is used without regressing past `last`.
    async fn last_header_sync(&self, force: u64, last: u64) -> Result<u64>;

    /// Candidate txs for every cross chain event in the block.
    async fn scan(&self, height: u64) -> Result<Vec<Tx>>;

    async fn scan_tx(&self, hash: &str) -> Result<Tx>;

    /// Decodes the source param and attaches the source inclusion proof.
    async fn compose(&self, tx: &mut Tx) -> Result<()>;
}

/// Renders a cross chain index the way it is carried in `Tx::tx_id`:
/// `0x` prefixed with leading zero digits trimmed.
pub(crate) fn tx_id_hex(id: &[u8]) -> String {
    let digits = hex::encode(id);
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{}", trimmed)
    }
}

pub fn new_listener(config: &ListenerConfig, poly: Arc<dyn PolyNode>) -> Result<Arc<dyn Listener>> {
    match chains::chain_family(config.chain_id) {
        ChainFamily::Evm => {
            let node = Arc::new(EthRpcClient::new(config.nodes.clone())?);
            Ok(Arc::new(EthListener::new(config.clone(), node, poly)))
        }
        ChainFamily::Bft => {
            let node = Arc::new(EthRpcClient::new(config.nodes.clone())?);
            let tm = Arc::new(TendermintRpcClient::new(config.extra_nodes.clone())?);
            let eth = EthListener::new(config.clone(), node, poly);
            Ok(Arc::new(OkListener::new(eth, tm)))
        }
        ChainFamily::Poly => Ok(Arc::new(PolyListener::new(config.clone(), poly))),
        _ => Err(Error::Config(format!(
            "Unsupported listener chain: {}",
            chains::chain_name(config.chain_id)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MockPolyNode;

    #[test]
    fn test_tx_id_hex() {
        assert_eq!(tx_id_hex(&[0x0a, 0xbc]), "0xabc");
        assert_eq!(tx_id_hex(&[0, 0, 0x10]), "0x10");
        assert_eq!(tx_id_hex(&[]), "0x0");
    }

    #[test]
    fn test_new_listener_dispatch() {
        let poly: Arc<dyn PolyNode> = Arc::new(MockPolyNode::new());
        let config = ListenerConfig {
            chain_id: chains::BSC,
            nodes: vec!["http://localhost:8545".to_string()],
            ..Default::default()
        };
        let listener = new_listener(&config, poly.clone()).unwrap();
        assert_eq!(listener.chain_id(), chains::BSC);

        let unsupported = ListenerConfig {
            chain_id: chains::ONT,
            ..config.clone()
        };
        assert!(matches!(new_listener(&unsupported, poly.clone()), Err(Error::Config(_))));

        // BFT listeners need the consensus layer endpoint as well.
        let ok = ListenerConfig {
            chain_id: chains::OK,
            ..config
        };
        assert!(new_listener(&ok, poly).is_err());
    }
}
