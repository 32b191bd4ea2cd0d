use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::{BusFactory, BusKey, TxBus};
use crate::{types::Tx, Error, Result};

/// Durable bus backed by one sled tree per key. Entries are keyed by the
/// database's monotonic id generator so `pop` returns the oldest entry.
pub struct SledBus {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledBus {
    pub fn open(db: sled::Db, key: BusKey) -> Result<Self> {
        let tree = db.open_tree(key.to_string())?;
        Ok(Self { db, tree })
    }
}

#[async_trait]
impl TxBus for SledBus {
    async fn push(&self, tx: &Tx) -> Result<()> {
        let entry = tx.encode()?;
        let id = self.db.generate_id()?;
        self.tree.insert(id.to_be_bytes(), entry.as_bytes())?;
        self.tree.flush_async().await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Tx>> {
        let Some((_, value)) = self.tree.pop_min()? else {
            return Ok(None);
        };
        let entry = std::str::from_utf8(&value)
            .map_err(|e| Error::Serialization(format!("bus entry is not utf8: {}", e)))?;
        Tx::decode(entry).map(Some)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.tree.len())
    }
}

pub struct SledBusFactory {
    db: sled::Db,
}

impl SledBusFactory {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    pub fn with_db(db: sled::Db) -> Self {
        Self { db }
    }
}

impl BusFactory for SledBusFactory {
    fn bus(&self, key: BusKey) -> Result<Arc<dyn TxBus>> {
        Ok(Arc::new(SledBus::open(self.db.clone(), key)?))
    }
}
