//! Chain identifiers as registered on the relay chain.

pub const POLY: u64 = 0;
pub const ETH: u64 = 2;
pub const ONT: u64 = 3;
pub const NEO: u64 = 4;
pub const BSC: u64 = 6;
pub const HECO: u64 = 7;
pub const OK: u64 = 12;
pub const MATIC: u64 = 17;

/// Chain families that share a listener or submitter implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFamily {
    Poly,
    Evm,
    /// EVM execution with a tendermint consensus layer.
    Bft,
    Script,
    Unsupported,
}

pub fn chain_family(chain_id: u64) -> ChainFamily {
    match chain_id {
        POLY => ChainFamily::Poly,
        ETH | BSC | HECO | MATIC => ChainFamily::Evm,
        OK => ChainFamily::Bft,
        NEO => ChainFamily::Script,
        _ => ChainFamily::Unsupported,
    }
}

pub fn chain_name(chain_id: u64) -> String {
    match chain_id {
        POLY => "poly".to_string(),
        ETH => "eth".to_string(),
        ONT => "ont".to_string(),
        NEO => "neo".to_string(),
        BSC => "bsc".to_string(),
        HECO => "heco".to_string(),
        OK => "ok".to_string(),
        MATIC => "matic".to_string(),
        other => format!("chain-{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_registry() {
        assert_eq!(chain_family(BSC), ChainFamily::Evm);
        assert_eq!(chain_family(OK), ChainFamily::Bft);
        assert_eq!(chain_family(NEO), ChainFamily::Script);
        assert_eq!(chain_family(ONT), ChainFamily::Unsupported);
        assert_eq!(chain_name(HECO), "heco");
        assert_eq!(chain_name(99), "chain-99");
    }
}
