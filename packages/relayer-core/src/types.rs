use serde::{Deserialize, Serialize};

use crate::codec::{decode_hex, Sink, Source};
use crate::{Error, Result};

/// Message tag. Submitters only accept `Poly` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxType {
    /// Emitted on a source chain, not yet committed to the relay chain.
    #[default]
    Src,
    /// Committed on the relay chain and destined for a specific chain.
    Poly,
}

/// A managed account of a destination chain wallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
}

impl Account {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

/// Decoded cross chain call parameters carried by a source chain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MakeTxParam {
    #[serde(with = "hex_bytes")]
    pub tx_hash: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub cross_chain_id: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub from_contract: Vec<u8>,
    pub to_chain_id: u64,
    #[serde(with = "hex_bytes")]
    pub to_contract: Vec<u8>,
    pub method: String,
    #[serde(with = "hex_bytes")]
    pub args: Vec<u8>,
}

impl MakeTxParam {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut source = Source::new(bytes);
        Ok(Self {
            tx_hash: source.read_var_bytes()?.to_vec(),
            cross_chain_id: source.read_var_bytes()?.to_vec(),
            from_contract: source.read_var_bytes()?.to_vec(),
            to_chain_id: source.read_u64()?,
            to_contract: source.read_var_bytes()?.to_vec(),
            method: source.read_var_string()?,
            args: source.read_var_bytes()?.to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut sink = Sink::new();
        sink.write_var_bytes(&self.tx_hash)
            .write_var_bytes(&self.cross_chain_id)
            .write_var_bytes(&self.from_contract)
            .write_u64(self.to_chain_id)
            .write_var_bytes(&self.to_contract)
            .write_var_string(&self.method)
            .write_var_bytes(&self.args);
        sink.into_bytes()
    }
}

/// A relay chain block header split into its signed message and the
/// consensus material appended to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PolyHeader {
    pub height: u32,
    /// Header serialization without bookkeepers and signatures.
    #[serde(with = "hex_bytes")]
    pub message: Vec<u8>,
    #[serde(with = "hex_bytes_list")]
    pub bookkeepers: Vec<Vec<u8>>,
    #[serde(with = "hex_bytes_list")]
    pub sig_data: Vec<Vec<u8>>,
}

impl PolyHeader {
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut source = Source::new(raw);
        source.read_u32()?; // version
        source.read_u64()?; // chain id
        source.read_bytes(32 * 4)?; // prev block, txs, cross states and block roots
        source.read_u32()?; // timestamp
        let height = source.read_u32()?;
        source.read_u64()?; // consensus data
        source.read_var_bytes()?; // consensus payload
        source.read_bytes(20)?; // next bookkeeper
        let message = raw[..source.position()].to_vec();

        let mut bookkeepers = Vec::new();
        let mut sig_data = Vec::new();
        if source.remaining() > 0 {
            for _ in 0..source.read_var_uint()? {
                bookkeepers.push(source.read_var_bytes()?.to_vec());
            }
            for _ in 0..source.read_var_uint()? {
                sig_data.push(source.read_var_bytes()?.to_vec());
            }
        }
        Ok(Self {
            height,
            message,
            bookkeepers,
            sig_data,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut sink = Sink::new();
        sink.write_bytes(&self.message);
        sink.write_var_uint(self.bookkeepers.len() as u64);
        for keeper in &self.bookkeepers {
            sink.write_var_bytes(keeper);
        }
        sink.write_var_uint(self.sig_data.len() as u64);
        for sig in &self.sig_data {
            sink.write_var_bytes(sig);
        }
        sink.into_bytes()
    }

    /// Signatures in the flat layout destination contracts verify.
    pub fn sigs(&self) -> Vec<u8> {
        self.sig_data.concat()
    }
}

/// One cross chain message at some stage of delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Tx {
    pub tx_type: TxType,
    pub attempts: u32,

    pub tx_id: String,
    pub src_hash: String,
    pub src_chain_id: u64,
    pub src_height: u64,
    pub src_param: String,
    #[serde(with = "hex_bytes")]
    pub src_event: Vec<u8>,
    pub param: Option<MakeTxParam>,
    pub src_proof_height: u64,
    #[serde(with = "hex_bytes")]
    pub src_proof: Vec<u8>,

    pub poly_hash: String,
    pub poly_height: u32,
    pub poly_key: String,
    pub poly_header: Option<PolyHeader>,
    pub anchor_header: Option<PolyHeader>,
    pub anchor_proof: String,
    pub audit_path: String,
    #[serde(with = "hex_bytes")]
    pub poly_sigs: Vec<u8>,

    pub dst_chain_id: u64,
    pub dst_hash: String,
    pub dst_poly_epoch_start_height: u32,
    #[serde(with = "hex_bytes")]
    pub dst_poly_keepers: Vec<u8>,
    pub dst_gas_limit: u64,
    pub dst_gas_price: String,
    pub dst_gas_price_x: String,
    pub dst_sender: Option<Account>,
    #[serde(with = "hex_bytes")]
    pub dst_data: Vec<u8>,
}

impl Tx {
    pub fn message_type(&self) -> TxType {
        self.tx_type
    }

    /// Queue entry encoding.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(entry: &str) -> Result<Self> {
        Ok(serde_json::from_str(entry)?)
    }

    /// Source tx id as the 32 byte key destination contracts index by.
    pub fn tx_id_bytes32(&self) -> Result<[u8; 32]> {
        let bytes = decode_hex(&self.tx_id)?;
        if bytes.len() > 32 {
            return Err(Error::InvalidTx(format!(
                "tx id {} longer than 32 bytes",
                self.tx_id
            )));
        }
        let mut id = [0u8; 32];
        id[..bytes.len()].copy_from_slice(&bytes);
        Ok(id)
    }
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod hex_bytes_list {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(list: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(list.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(d)?
            .into_iter()
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_tx_round_trip_keeps_absent_fields() {
        let tx = Tx {
            tx_type: TxType::Poly,
            attempts: 3,
            tx_id: "0xabc".to_string(),
            src_chain_id: 2,
            src_height: 1000,
            src_param: hex::encode(make_tx_param(6).encode()),
            param: Some(make_tx_param(6)),
            poly_hash: "f00d".to_string(),
            poly_header: Some(poly_header(10, vec![vec![1; 65]])),
            anchor_header: None,
            dst_chain_id: 6,
            dst_sender: None,
            dst_data: vec![],
            ..Default::default()
        };
        let decoded = Tx::decode(&tx.encode().unwrap()).unwrap();
        assert_eq!(decoded, tx);
        assert!(decoded.anchor_header.is_none());
        assert!(decoded.dst_sender.is_none());

        let pinned = Tx {
            dst_sender: Some(Account::new("0x01")),
            anchor_header: Some(poly_header(9, vec![])),
            ..tx
        };
        assert_eq!(Tx::decode(&pinned.encode().unwrap()).unwrap(), pinned);
    }

    #[test]
    fn test_make_tx_param_decode() {
        let param = make_tx_param(6);
        assert_eq!(MakeTxParam::decode(&param.encode()).unwrap(), param);
        let bytes = param.encode();
        assert!(MakeTxParam::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_poly_header_decode_splits_message() {
        let header = poly_header(42, vec![vec![7; 65], vec![8; 65]]);
        let decoded = PolyHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.sigs().len(), 130);

        // A bare message carries no consensus material.
        let bare = PolyHeader::decode(&header.message).unwrap();
        assert_eq!(bare.height, 42);
        assert!(bare.sig_data.is_empty());
    }

    #[test]
    fn test_tx_id_bytes32() {
        let tx = Tx {
            tx_id: "0xabc".to_string(),
            ..Default::default()
        };
        let id = tx.tx_id_bytes32().unwrap();
        assert_eq!(&id[..2], &[0x0a, 0xbc]);
        assert!(id[2..].iter().all(|b| *b == 0));

        let long = Tx {
            tx_id: "11".repeat(33),
            ..Default::default()
        };
        assert!(long.tx_id_bytes32().unwrap_err().is_invalid_tx());
    }
}
