use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::{
    config::BusConfig,
    types::{Tx, TxType},
    Error, Result,
};

pub mod sled_bus;

pub use sled_bus::{SledBus, SledBusFactory};

/// Identifies one queue: the chain that owns it and the stage it feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusKey {
    pub chain_id: u64,
    pub kind: TxType,
}

impl BusKey {
    pub fn src(chain_id: u64) -> Self {
        Self {
            chain_id,
            kind: TxType::Src,
        }
    }

    pub fn poly(chain_id: u64) -> Self {
        Self {
            chain_id,
            kind: TxType::Poly,
        }
    }
}

impl fmt::Display for BusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TxType::Src => "src",
            TxType::Poly => "poly",
        };
        write!(f, "{}:{}", kind, self.chain_id)
    }
}

/// Work queue shared by every worker of a chain.
///
/// Delivery is at least once: a popped tx is only gone for good once the
/// caller finishes it, otherwise the caller pushes it back. Retried entries
/// have no ordering guarantee relative to fresh ones.
#[async_trait]
pub trait TxBus: Send + Sync {
    async fn push(&self, tx: &Tx) -> Result<()>;

    /// Returns `None` when the queue is currently empty.
    async fn pop(&self) -> Result<Option<Tx>>;

    async fn len(&self) -> Result<usize>;
}

pub trait BusFactory: Send + Sync {
    fn bus(&self, key: BusKey) -> Result<Arc<dyn TxBus>>;
}

pub fn open_bus_factory(config: &BusConfig) -> Result<Arc<dyn BusFactory>> {
    match &config.path {
        Some(path) => Ok(Arc::new(SledBusFactory::open(path)?)),
        None => Ok(Arc::new(MemoryBusFactory::default())),
    }
}

#[derive(Default)]
pub struct MemoryBus {
    entries: tokio::sync::Mutex<VecDeque<String>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TxBus for MemoryBus {
    async fn push(&self, tx: &Tx) -> Result<()> {
        let entry = tx.encode()?;
        self.entries.lock().await.push_back(entry);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Tx>> {
        let entry = self.entries.lock().await.pop_front();
        entry.map(|e| Tx::decode(&e)).transpose()
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().await.len())
    }
}

#[derive(Default)]
pub struct MemoryBusFactory {
    buses: Mutex<HashMap<BusKey, Arc<MemoryBus>>>,
}

impl BusFactory for MemoryBusFactory {
    fn bus(&self, key: BusKey) -> Result<Arc<dyn TxBus>> {
        let mut buses = self
            .buses
            .lock()
            .map_err(|_| Error::Bus("memory bus registry poisoned".to_string()))?;
        let bus: Arc<dyn TxBus> = buses.entry(key).or_default().clone();
        Ok(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poly_tx(hash: &str) -> Tx {
        Tx {
            tx_type: TxType::Poly,
            poly_hash: hash.to_string(),
            dst_chain_id: 6,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_requeue_after_failed_attempt() {
        let bus = MemoryBus::new();
        bus.push(&poly_tx("aa")).await.unwrap();

        let mut tx = bus.pop().await.unwrap().unwrap();
        assert_eq!(tx.attempts, 0);
        tx.attempts += 1;
        bus.push(&tx).await.unwrap();

        assert_eq!(bus.len().await.unwrap(), 1);
        let again = bus.pop().await.unwrap().unwrap();
        assert_eq!(again.attempts, 1);
        assert_eq!(again.poly_hash, "aa");
        assert!(bus.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_push() {
        let bus = Arc::new(MemoryBus::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                bus.push(&poly_tx(&format!("{:02x}", i))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(bus.len().await.unwrap(), 16);
    }

    #[test]
    fn test_memory_factory_shares_instances() {
        let factory = MemoryBusFactory::default();
        let a = factory.bus(BusKey::poly(6)).unwrap();
        let b = factory.bus(BusKey::poly(6)).unwrap();
        let other = factory.bus(BusKey::src(6)).unwrap();

        tokio_test::block_on(a.push(&poly_tx("bb"))).unwrap();
        assert_eq!(tokio_test::block_on(b.len()).unwrap(), 1);
        assert_eq!(tokio_test::block_on(other.len()).unwrap(), 0);
        assert_eq!(BusKey::src(2).to_string(), "src:2");
    }

    #[test]
    fn test_bus_keys_differ_by_kind() {
        use std::collections::HashSet;

        let keys: HashSet<BusKey> = [BusKey::src(6), BusKey::poly(6), BusKey::poly(6)]
            .into_iter()
            .collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&BusKey::src(6)));
    }
}
