use async_trait::async_trait;
use std::sync::Arc;

use crate::{node::PolyNode, types::Tx, Error, Result};

/// Fills the relay chain side of a tx (header, anchor, audit path and
/// signatures) before a submitter packs it for its destination.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PolyComposer: Send + Sync {
    async fn compose(&self, tx: &mut Tx) -> Result<()>;
}

/// Composes against the relay chain node.
///
/// The cross chain state of a tx committed at height `H` is rooted in the
/// header at `H + 1`. When the destination chain already trusts a later
/// keeper set than the one that signed that header, the header at the
/// destination's epoch start height is attached as anchor, together with a
/// merkle path proving `H + 1` under the anchor's block root.
pub struct RelayComposer {
    node: Arc<dyn PolyNode>,
}

impl RelayComposer {
    pub fn new(node: Arc<dyn PolyNode>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl PolyComposer for RelayComposer {
    async fn compose(&self, tx: &mut Tx) -> Result<()> {
        if tx.poly_height == 0 || tx.poly_key.is_empty() {
            return Err(Error::InvalidTx(format!(
                "poly tx {} missing height {} or key {:?}",
                tx.poly_hash, tx.poly_height, tx.poly_key
            )));
        }

        tx.audit_path = self
            .node
            .cross_states_proof(tx.poly_height, &tx.poly_key)
            .await?;

        let header_height = tx.poly_height + 1;
        let header = self.node.header(header_height).await?;
        let epoch = tx.dst_poly_epoch_start_height;
        if epoch > header_height {
            let anchor = self.node.header(epoch).await?;
            tx.anchor_proof = self.node.merkle_proof(header_height, epoch).await?;
            tx.poly_sigs = anchor.sigs();
            tx.anchor_header = Some(anchor);
        } else {
            tx.poly_sigs = header.sigs();
            tx.anchor_header = None;
            tx.anchor_proof.clear();
        }
        tx.poly_header = Some(header);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MockPolyNode;
    use crate::types::fixtures::poly_header;
    use crate::types::TxType;
    use mockall::predicate::eq;

    fn committed_tx(epoch: u32) -> Tx {
        Tx {
            tx_type: TxType::Poly,
            poly_hash: "aa".to_string(),
            poly_height: 100,
            poly_key: "0102".to_string(),
            dst_poly_epoch_start_height: epoch,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_compose_without_rotation() {
        let mut node = MockPolyNode::new();
        node.expect_cross_states_proof()
            .with(eq(100), eq("0102"))
            .returning(|_, _| Ok("beef".to_string()));
        node.expect_header()
            .with(eq(101))
            .times(1)
            .returning(|h| Ok(poly_header(h, vec![vec![1; 65]])));
        node.expect_merkle_proof().times(0);

        let mut tx = committed_tx(90);
        tx.anchor_proof = "stale".to_string();
        RelayComposer::new(Arc::new(node)).compose(&mut tx).await.unwrap();

        assert_eq!(tx.audit_path, "beef");
        assert_eq!(tx.poly_header.as_ref().unwrap().height, 101);
        assert!(tx.anchor_header.is_none());
        assert!(tx.anchor_proof.is_empty());
        assert_eq!(tx.poly_sigs, vec![1; 65]);
    }

    #[tokio::test]
    async fn test_compose_with_anchor() {
        let mut node = MockPolyNode::new();
        node.expect_cross_states_proof()
            .returning(|_, _| Ok("beef".to_string()));
        node.expect_header()
            .returning(|h| Ok(poly_header(h, vec![vec![h as u8; 65]])));
        node.expect_merkle_proof()
            .with(eq(101), eq(500))
            .returning(|_, _| Ok("cafe".to_string()));

        let mut tx = committed_tx(500);
        RelayComposer::new(Arc::new(node)).compose(&mut tx).await.unwrap();

        assert_eq!(tx.anchor_header.as_ref().unwrap().height, 500);
        assert_eq!(tx.anchor_proof, "cafe");
        assert_eq!(tx.poly_sigs, vec![500u32 as u8; 65]);
    }

    #[tokio::test]
    async fn test_compose_requires_commit_position() {
        let mut node = MockPolyNode::new();
        node.expect_cross_states_proof().times(0);
        let mut tx = Tx {
            poly_key: String::new(),
            ..committed_tx(0)
        };
        let err = RelayComposer::new(Arc::new(node))
            .compose(&mut tx)
            .await
            .unwrap_err();
        assert!(err.is_invalid_tx());
    }
}
