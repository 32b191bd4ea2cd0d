use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Error;

fn default_listen_check() -> u64 {
    5
}

fn default_batch() -> usize {
    1
}

/// Remote signer endpoints holding the chain's managed accounts.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct WalletConfig {
    pub nodes: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct HeaderSyncConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Forces header sync to resume from this height when non-zero.
    #[serde(default)]
    pub start_height: u64,
    #[serde(default = "default_batch")]
    pub batch: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SrcTxSyncConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub start_height: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SrcTxCommitConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PolyTxSyncConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub start_height: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PolyTxCommitConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Gas limit attached to deliveries; zero lets the wallet estimate.
    #[serde(default)]
    pub gas_limit: u64,
}

/// The closed set of handler kinds a configuration can enable.
#[derive(Debug, Clone)]
pub enum HandlerConfig {
    HeaderSync(HeaderSyncConfig),
    SrcTxSync(SrcTxSyncConfig),
    SrcTxCommit(SrcTxCommitConfig),
    PolyTxSync(PolyTxSyncConfig),
    PolyTxCommit(PolyTxCommitConfig),
}

impl HandlerConfig {
    pub fn name(&self) -> &'static str {
        match self {
            HandlerConfig::HeaderSync(_) => "HeaderSync",
            HandlerConfig::SrcTxSync(_) => "SrcTxSync",
            HandlerConfig::SrcTxCommit(_) => "SrcTxCommit",
            HandlerConfig::PolyTxSync(_) => "PolyTxSync",
            HandlerConfig::PolyTxCommit(_) => "PolyTxCommit",
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            HandlerConfig::HeaderSync(c) => c.enabled,
            HandlerConfig::SrcTxSync(c) => c.enabled,
            HandlerConfig::SrcTxCommit(c) => c.enabled,
            HandlerConfig::PolyTxSync(c) => c.enabled,
            HandlerConfig::PolyTxCommit(c) => c.enabled,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ChainConfig {
    pub chain_id: u64,
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Consensus layer RPC for chains that run one beside their execution node.
    #[serde(default)]
    pub extra_nodes: Vec<String>,
    #[serde(default)]
    pub ccm_contract: String,
    #[serde(default)]
    pub ccd_contract: String,
    pub wallet: Option<WalletConfig>,
    /// Blocks to stay behind the chain tip.
    #[serde(default)]
    pub defer: u64,
    /// Seconds between polls of the chain tip.
    #[serde(default = "default_listen_check")]
    pub listen_check: u64,
    pub header_sync: Option<HeaderSyncConfig>,
    pub src_tx_sync: Option<SrcTxSyncConfig>,
    pub src_tx_commit: Option<SrcTxCommitConfig>,
    pub poly_tx_commit: Option<PolyTxCommitConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct ListenerConfig {
    pub chain_id: u64,
    pub nodes: Vec<String>,
    pub extra_nodes: Vec<String>,
    pub ccm_contract: String,
    pub ccd_contract: String,
    pub defer: u64,
    pub listen_check: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitterConfig {
    pub chain_id: u64,
    pub nodes: Vec<String>,
    pub ccm_contract: String,
    pub ccd_contract: String,
    pub wallet: Option<WalletConfig>,
    /// Relay chain id as known by the destination chain's contracts.
    pub poly_chain_id: Option<u64>,
    pub gas_limit: u64,
}

impl ChainConfig {
    pub fn handlers(&self) -> Vec<HandlerConfig> {
        let mut handlers = Vec::new();
        if let Some(c) = &self.header_sync {
            handlers.push(HandlerConfig::HeaderSync(c.clone()));
        }
        if let Some(c) = &self.src_tx_sync {
            handlers.push(HandlerConfig::SrcTxSync(c.clone()));
        }
        if let Some(c) = &self.src_tx_commit {
            handlers.push(HandlerConfig::SrcTxCommit(c.clone()));
        }
        if let Some(c) = &self.poly_tx_commit {
            handlers.push(HandlerConfig::PolyTxCommit(c.clone()));
        }
        handlers
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            chain_id: self.chain_id,
            nodes: self.nodes.clone(),
            extra_nodes: self.extra_nodes.clone(),
            ccm_contract: self.ccm_contract.clone(),
            ccd_contract: self.ccd_contract.clone(),
            defer: self.defer,
            listen_check: Duration::from_secs(self.listen_check),
        }
    }

    pub fn submitter_config(&self, poly_chain_id: Option<u64>) -> SubmitterConfig {
        SubmitterConfig {
            chain_id: self.chain_id,
            nodes: self.nodes.clone(),
            ccm_contract: self.ccm_contract.clone(),
            ccd_contract: self.ccd_contract.clone(),
            wallet: self.wallet.clone(),
            poly_chain_id,
            gas_limit: self
                .poly_tx_commit
                .as_ref()
                .map(|c| c.gas_limit)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PolyChainConfig {
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub nodes: Vec<String>,
    pub wallet: Option<WalletConfig>,
    #[serde(default = "default_listen_check")]
    pub listen_check: u64,
    pub poly_tx_sync: Option<PolyTxSyncConfig>,
}

impl Default for PolyChainConfig {
    fn default() -> Self {
        Self {
            chain_id: None,
            nodes: Vec::new(),
            wallet: None,
            listen_check: default_listen_check(),
            poly_tx_sync: None,
        }
    }
}

impl PolyChainConfig {
    pub fn handlers(&self) -> Vec<HandlerConfig> {
        self.poly_tx_sync
            .iter()
            .map(|c| HandlerConfig::PolyTxSync(c.clone()))
            .collect()
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            chain_id: crate::chains::POLY,
            nodes: self.nodes.clone(),
            listen_check: Duration::from_secs(self.listen_check),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BusConfig {
    /// Sled database directory; queues live in memory when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RelayerConfig {
    /// Seconds a worker idles when its queue is empty.
    pub poll_interval: u64,
    /// Base delay in seconds before a requeued tx is retried.
    pub retry_delay: u64,
    pub max_retry_delay: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            poll_interval: 1,
            retry_delay: 1,
            max_retry_delay: 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub poly: PolyChainConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub relayer: RelayerConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&config_str)?,
            _ => Self::from_json(&config_str)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(s: &str) -> Result<Self, Error> {
        serde_json::from_str(s)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn from_toml(s: &str) -> Result<Self, Error> {
        toml::from_str(s).map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn validate(&self) -> Result<(), Error> {
        let mut chain_ids = HashSet::new();
        for chain in &self.chains {
            if !chain_ids.insert(chain.chain_id) {
                return Err(Error::Config(format!(
                    "Duplicate chain config: {}",
                    chain.chain_id
                )));
            }
            if chain.handlers().iter().any(|h| h.enabled()) && chain.nodes.is_empty() {
                return Err(Error::Config(format!(
                    "No nodes configured for chain {}",
                    chain.chain_id
                )));
            }
            if chain.listen_check == 0 {
                return Err(Error::Config(format!(
                    "Listen check interval of chain {} must be greater than 0",
                    chain.chain_id
                )));
            }
        }

        if self.poly.handlers().iter().any(|h| h.enabled()) && self.poly.nodes.is_empty() {
            return Err(Error::Config("No nodes configured for poly".to_string()));
        }
        if self.poly.listen_check == 0 {
            return Err(Error::Config(
                "Listen check interval of poly must be greater than 0".to_string(),
            ));
        }

        if self.relayer.poll_interval == 0 {
            return Err(Error::Config(
                "Relayer poll interval must be greater than 0".to_string(),
            ));
        }
        if self.relayer.retry_delay == 0 {
            return Err(Error::Config(
                "Relayer retry delay must be greater than 0".to_string(),
            ));
        }
        if self.relayer.retry_delay > self.relayer.max_retry_delay {
            return Err(Error::Config(
                "Relayer retry delay must not exceed max retry delay".to_string(),
            ));
        }

        Ok(())
    }

    pub fn get_chain_config(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "poly": {
            "chain_id": 41,
            "nodes": ["http://poly:20336"],
            "poly_tx_sync": { "enabled": true }
        },
        "chains": [
            {
                "chain_id": 6,
                "nodes": ["http://bsc:8545"],
                "ccm_contract": "0x0000000000000000000000000000000000000001",
                "ccd_contract": "0x0000000000000000000000000000000000000002",
                "wallet": { "nodes": ["http://signer:9000"] },
                "src_tx_sync": { "enabled": true, "start_height": 100 },
                "poly_tx_commit": { "enabled": true, "gas_limit": 300000 },
                "header_sync": { "enabled": false }
            }
        ],
        "relayer": { "poll_interval": 1, "retry_delay": 2, "max_retry_delay": 30 }
    }"#;

    #[test]
    fn test_parse_and_derive_views() {
        let config = Config::from_json(CONFIG).unwrap();
        config.validate().unwrap();

        let chain = config.get_chain_config(6).unwrap();
        let kinds: Vec<_> = chain.handlers().iter().map(|h| h.enabled()).collect();
        assert_eq!(kinds, vec![false, true, true]);

        let submitter = chain.submitter_config(config.poly.chain_id);
        assert_eq!(submitter.poly_chain_id, Some(41));
        assert_eq!(submitter.gas_limit, 300000);
        assert_eq!(chain.listener_config().listen_check, Duration::from_secs(5));
        assert_eq!(config.poly.handlers().len(), 1);
        assert!(config.bus.path.is_none());
    }

    #[test]
    fn test_toml_config() {
        let config = Config::from_toml(
            r#"
            [poly]
            nodes = ["http://poly:20336"]

            [[chains]]
            chain_id = 2
            nodes = ["http://eth:8545"]

            [chains.header_sync]
            enabled = true
            start_height = 12
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert!(config.poly.chain_id.is_none());
        assert_eq!(config.chains[0].header_sync.as_ref().unwrap().start_height, 12);
        assert_eq!(config.relayer.max_retry_delay, 60);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let mut config = Config::from_json(CONFIG).unwrap();
        config.chains.push(config.chains[0].clone());
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::from_json(CONFIG).unwrap();
        config.chains[0].nodes.clear();
        assert!(config.validate().is_err());

        let mut config = Config::from_json(CONFIG).unwrap();
        config.relayer.poll_interval = 0;
        assert!(config.validate().is_err());

        let mut config = Config::from_json(CONFIG).unwrap();
        config.poly.listen_check = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::from_json(CONFIG).unwrap();
        config.relayer.retry_delay = 0;
        config.relayer.max_retry_delay = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_relayer_block_uses_defaults() {
        let config = Config::from_json(r#"{ "relayer": { "poll_interval": 2 } }"#).unwrap();
        assert_eq!(config.relayer.poll_interval, 2);
        assert_eq!(config.relayer.retry_delay, 1);
        assert_eq!(config.relayer.max_retry_delay, 60);
        assert!(config.validate().is_ok());
    }
}
