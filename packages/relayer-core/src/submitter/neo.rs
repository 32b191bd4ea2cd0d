use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use super::Submitter;
use crate::{
    chains,
    codec::decode_hex,
    compose::PolyComposer,
    config::SubmitterConfig,
    node::{neo::NeoRpcClient, wallet::RemoteWallet, NeoNode, Wallet},
    types::{Account, Tx, TxType},
    Error, Result,
};

pub const VERIFY_AND_EXECUTE_TX: &str = "VerifyAndExecuteTx";
pub const CHANGE_BOOK_KEEPER: &str = "ChangeBookKeeper";
pub const SYNC_BLOCK_HEADER: &str = "SyncBlockHeader";

const PUSH0: u8 = 0x00;
const PUSHBYTES75: u8 = 0x4b;
const PUSHDATA1: u8 = 0x4c;
const PUSHDATA2: u8 = 0x4d;
const PUSHDATA4: u8 = 0x4e;
const PUSHM1: u8 = 0x4f;
const PUSH1: u8 = 0x51;
const PACK: u8 = 0xc1;
const APPCALL: u8 = 0x67;

/// Invocation script assembler for the NEO VM.
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, op: u8) -> &mut Self {
        self.script.push(op);
        self
    }

    pub fn emit_push_bytes(&mut self, data: &[u8]) -> &mut Self {
        let len = data.len();
        if len <= PUSHBYTES75 as usize {
            self.script.push(len as u8);
        } else if len <= u8::MAX as usize {
            self.script.push(PUSHDATA1);
            self.script.push(len as u8);
        } else if len <= u16::MAX as usize {
            self.script.push(PUSHDATA2);
            self.script.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            self.script.push(PUSHDATA4);
            self.script.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.script.extend_from_slice(data);
        self
    }

    pub fn emit_push_int(&mut self, n: i64) -> &mut Self {
        match n {
            -1 => self.emit(PUSHM1),
            0 => self.emit(PUSH0),
            1..=16 => self.emit(PUSH1 - 1 + n as u8),
            _ => {
                let bytes = n.to_le_bytes();
                // Minimal two's complement little-endian encoding.
                let mut len = bytes.len();
                while len > 1 {
                    let last = bytes[len - 1];
                    let prev_sign = bytes[len - 2] & 0x80;
                    if (last == 0x00 && prev_sign == 0) || (last == 0xff && prev_sign != 0) {
                        len -= 1;
                    } else {
                        break;
                    }
                }
                self.emit_push_bytes(&bytes[..len])
            }
        }
    }

    /// `args` are pushed in reverse, packed into an array, then the
    /// operation name and the contract call follow.
    pub fn make_invocation_script(&mut self, script_hash: &[u8], operation: &str, args: &[Vec<u8>]) -> &mut Self {
        for arg in args.iter().rev() {
            self.emit_push_bytes(arg);
        }
        self.emit_push_int(args.len() as i64);
        self.emit(PACK);
        self.emit_push_bytes(operation.as_bytes());
        self.emit(APPCALL);
        self.script.extend_from_slice(script_hash);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.script
    }
}

/// Submitter for NEO: the cross chain manager is driven by invocation
/// scripts broadcast through the wallet.
pub struct NeoSubmitter {
    chain_id: u64,
    name: String,
    ccm: String,
    script_hash: Vec<u8>,
    poly_id: u64,
    node: Arc<dyn NeoNode>,
    wallet: Arc<dyn Wallet>,
    accounts: Vec<Account>,
}

impl NeoSubmitter {
    pub fn new(
        config: &SubmitterConfig,
        node: Arc<dyn NeoNode>,
        wallet: Arc<dyn Wallet>,
        accounts: Vec<Account>,
    ) -> Result<Self> {
        let poly_id = Self::poly_id(config)?;
        let script_hash = decode_hex(&config.ccm_contract)
            .ok()
            .filter(|h| h.len() == 20)
            .ok_or_else(|| {
                Error::Config(format!("Invalid neo ccm contract {:?}", config.ccm_contract))
            })?;
        Ok(Self {
            chain_id: config.chain_id,
            name: chains::chain_name(config.chain_id),
            ccm: config.ccm_contract.clone(),
            script_hash,
            poly_id,
            node,
            wallet,
            accounts,
        })
    }

    fn poly_id(config: &SubmitterConfig) -> Result<u64> {
        config
            .poly_chain_id
            .filter(|id| *id != 0)
            .ok_or_else(|| Error::Config("Poly chain id not set for neo submitter".to_string()))
    }

    pub async fn init(config: &SubmitterConfig) -> Result<Self> {
        Self::poly_id(config)?;
        let node = Arc::new(NeoRpcClient::new(config.nodes.clone())?);
        let wallet_config = config.wallet.as_ref().ok_or_else(|| {
            Error::Config("No wallet configured for neo submitter".to_string())
        })?;
        let wallet = Arc::new(RemoteWallet::new(wallet_config.nodes.clone())?);
        let accounts = wallet.accounts().await?;
        Self::new(config, node, wallet, accounts)
    }

    fn script(&self, operation: &str, args: &[Vec<u8>]) -> Vec<u8> {
        let mut builder = ScriptBuilder::new();
        builder.make_invocation_script(&self.script_hash, operation, args);
        builder.into_bytes()
    }

    async fn process_poly_tx(&self, tx: &mut Tx) -> Result<()> {
        let tx_id = decode_hex(&tx.tx_id)?;
        if self
            .node
            .from_chain_tx_exist(&self.ccm, tx.src_chain_id, tx_id)
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

        tx.dst_data = self.script(
            VERIFY_AND_EXECUTE_TX,
            &[path, header, proof, anchor, tx.poly_sigs.clone()],
        );
        tx.dst_hash = self.wallet.invoke(&tx.dst_data, tx.dst_sender.clone()).await?;
        Ok(())
    }
}

#[async_trait]
impl Submitter for NeoSubmitter {
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
        let height = self.node.poly_epoch_height(&self.ccm, self.poly_id).await?;
        u32::try_from(height)
            .map_err(|_| Error::Chain(format!("{} poly epoch height {} out of range", self.name, height)))
    }

    /// The ccm contract keeps its own keeper set; nothing to attach.
    async fn poly_keepers(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
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
        compose.compose(tx).await?;
        self.process_poly_tx(tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::MockPolyComposer;
    use crate::config::WalletConfig;
    use crate::node::{MockNeoNode, MockWallet};
    use crate::types::{fixtures::poly_header, PolyHeader};
    use mockall::predicate::{always, eq};

    const CCM: &str = "0x0102030405060708090a0b0c0d0e0f1011121314";

    fn config(poly_chain_id: Option<u64>) -> SubmitterConfig {
        SubmitterConfig {
            chain_id: chains::NEO,
            ccm_contract: CCM.to_string(),
            poly_chain_id,
            ..Default::default()
        }
    }

    fn script_hash() -> Vec<u8> {
        (1..=20).collect()
    }

    #[test]
    fn test_push_encodings() {
        let mut b = ScriptBuilder::new();
        b.emit_push_bytes(&[]);
        b.emit_push_bytes(&[7; 75]);
        assert_eq!(b.into_bytes()[..2], [0x00, 75]);

        let mut b = ScriptBuilder::new();
        b.emit_push_bytes(&[7; 76]);
        assert_eq!(b.into_bytes()[..2], [PUSHDATA1, 76]);

        let mut b = ScriptBuilder::new();
        b.emit_push_bytes(&[7; 256]);
        assert_eq!(b.into_bytes()[..3], [PUSHDATA2, 0x00, 0x01]);

        let mut b = ScriptBuilder::new();
        b.emit_push_bytes(&vec![7; 65536]);
        assert_eq!(b.into_bytes()[..5], [PUSHDATA4, 0x00, 0x00, 0x01, 0x00]);

        let mut b = ScriptBuilder::new();
        b.emit_push_int(0).emit_push_int(5).emit_push_int(16).emit_push_int(-1);
        b.emit_push_int(128);
        assert_eq!(b.into_bytes(), vec![0x00, 0x55, 0x60, 0x4f, 0x02, 0x80, 0x00]);
    }

    #[test]
    fn test_invocation_script_layout() {
        let mut b = ScriptBuilder::new();
        b.make_invocation_script(&script_hash(), "Op", &[vec![0xaa], vec![0xbb, 0xcc]]);
        let mut expected = vec![0x02, 0xbb, 0xcc, 0x01, 0xaa, 0x52, PACK, 0x02, b'O', b'p', APPCALL];
        expected.extend(script_hash());
        assert_eq!(b.into_bytes(), expected);
    }

    #[test]
    fn test_requires_poly_chain_id() {
        let node: Arc<dyn NeoNode> = Arc::new(MockNeoNode::new());
        let wallet: Arc<dyn Wallet> = Arc::new(MockWallet::new());
        for id in [None, Some(0)] {
            assert!(matches!(
                NeoSubmitter::new(&config(id), node.clone(), wallet.clone(), vec![]),
                Err(Error::Config(_))
            ));
        }
        assert!(NeoSubmitter::new(&config(Some(41)), node, wallet, vec![]).is_ok());
    }

    #[tokio::test]
    async fn test_init_requires_poly_chain_id() {
        let config = SubmitterConfig {
            nodes: vec!["http://localhost:10332".to_string()],
            wallet: Some(WalletConfig {
                nodes: vec!["http://localhost:9000".to_string()],
            }),
            ..config(None)
        };
        assert!(matches!(
            NeoSubmitter::init(&config).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_process_tx_invokes_verify_and_execute() {
        let mut node = MockNeoNode::new();
        node.expect_poly_epoch_height()
            .with(eq(CCM), eq(41))
            .returning(|_, _| Ok(90));
        node.expect_from_chain_tx_exist()
            .with(eq(CCM), eq(2), always())
            .returning(|_, _, _| Ok(false));

        let header = poly_header(101, vec![vec![1; 65]]);
        let mut builder = ScriptBuilder::new();
        builder.make_invocation_script(
            &script_hash(),
            VERIFY_AND_EXECUTE_TX,
            &[vec![0xbe, 0xef], header.message.clone(), vec![], vec![], vec![1; 65]],
        );
        let expected = builder.into_bytes();
        let mut wallet = MockWallet::new();
        wallet
            .expect_invoke()
            .withf(move |script, account| script == expected.as_slice() && account.is_none())
            .times(1)
            .returning(|_, _| Ok("0xneo".to_string()));

        let mut composer = MockPolyComposer::new();
        composer.expect_compose().returning(|tx| {
            assert_eq!(tx.dst_poly_epoch_start_height, 90);
            tx.audit_path = "beef".to_string();
            tx.poly_header = Some(poly_header(101, vec![vec![1; 65]]));
            tx.poly_sigs = vec![1; 65];
            Ok(())
        });

        let submitter =
            NeoSubmitter::new(&config(Some(41)), Arc::new(node), Arc::new(wallet), vec![]).unwrap();
        let mut tx = Tx {
            tx_type: TxType::Poly,
            tx_id: "0xabc".to_string(),
            src_chain_id: 2,
            dst_chain_id: chains::NEO,
            poly_height: 100,
            ..Default::default()
        };
        submitter.process_tx(&mut tx, &composer).await.unwrap();
        assert_eq!(tx.dst_hash, "0xneo");
        assert!(submitter.poly_keepers().await.unwrap().is_empty());
    }

    /// Header methods take `[raw header, keeper public keys, signatures]`.
    fn header_script(submitter: &NeoSubmitter, operation: &str, header: &PolyHeader) -> Vec<u8> {
        let args = vec![header.message.clone(), header.bookkeepers.concat(), header.sigs()];
        submitter.script(operation, &args)
    }

    #[test]
    fn test_header_scripts() {
        let header = poly_header(500, vec![vec![1; 65], vec![2; 65]]);
        let submitter = NeoSubmitter::new(
            &config(Some(41)),
            Arc::new(MockNeoNode::new()),
            Arc::new(MockWallet::new()),
            vec![],
        )
        .unwrap();

        let sync = header_script(&submitter, SYNC_BLOCK_HEADER, &header);
        let change = header_script(&submitter, CHANGE_BOOK_KEEPER, &header);
        assert_ne!(sync, change);
        let tail = [&[APPCALL][..], &script_hash()].concat();
        assert!(sync.ends_with(&tail));
        let name = [&[SYNC_BLOCK_HEADER.len() as u8][..], SYNC_BLOCK_HEADER.as_bytes()].concat();
        assert!(sync.windows(name.len()).any(|w| w == name.as_slice()));
    }
}
